//
// Copyright 2017-2025 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Portway Service Host Core
//!
//! This crate is a generic host for long-running TCP network services: each
//! configured service either listens on a port and serves accepted clients,
//! or opens and supervises outbound connections to remote equipment. A
//! single process hosts many services at once, each independently
//! startable, stoppable, and restartable through a shared registry.
//!
//! # Architecture
//!
//! ```text
//! ServiceRegistry ──────────────┐
//!     │  (port → Service)       │ answers ControlRequests,
//!     ▼                         │ sinks Notices
//! Service (trait) ◄──────── EventBus ◄──── every service reports here
//!     │    │
//!     │    └── ServiceCore (running flag, connection set, counters)
//!     ▼
//! ServiceListener ──accept──► Connection ──serve()──► business logic
//!
//! Watchdog (client role): connector + data monitor keep one
//! outbound Connection alive and detect silent stalls.
//! ```
//!
//! # Example
//!
//! ```no_run
//! use portway_service::{RegistryConfig, ServiceConfig, ServiceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ServiceRegistry::new(RegistryConfig::default());
//!     // register_factory("echo", ...) for each implementation, then:
//!     let configs = vec![ServiceConfig::new("echo", 7001, "echo")];
//!     registry.initialize_services(&configs).await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     registry.shutdown_services().await;
//!     Ok(())
//! }
//! ```

mod bus;
mod config;
mod connection;
mod error;
mod listener;
mod metrics;
mod registry;
mod service;
mod types;
mod watchdog;

pub use bus::{BusSubscriber, ControlReply, ControlRequest, EventBus, Notice, ServiceSelector};
pub use config::{
    DEFAULT_ACCEPT_TIMEOUT, DEFAULT_GLOBAL_CONNECTIONS, DEFAULT_MAXIMUM_CONNECTIONS,
    RegistryConfig, ServiceConfig, ServiceKind, StartupType,
};
pub use connection::{Connection, DEFAULT_MAX_LINE_LENGTH};
pub use error::{Result, ServiceError};
pub use listener::{ListenerState, ServiceListener};
pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use registry::{ServiceFactory, ServiceRegistry};
pub use service::{Service, ServiceCore};
pub use types::{ConnectionId, ConnectionState, RegistrySnapshot, ServiceSnapshot};
pub use watchdog::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_INTERVAL, DEFAULT_NODATA_INTERVAL, Watchdog,
    WatchdogConfig,
};
