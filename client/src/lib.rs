//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
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

//! # Portway Relay Client
//!
//! CLIENT-role service for the Portway host: keeps one supervised outbound
//! connection open to remote equipment and relays line-oriented records.
//!
//! ## Features
//!
//! - **Supervised Link** - The core watchdog reconnects on failure and
//!   recycles silently stalled connections
//! - **Store-and-Forward** - Records sent while the link is down land in a
//!   flat append-only spool and replay when the link returns
//! - **Attribute-Driven** - Remote endpoint, intervals, and spool path all
//!   come from the service configuration's attribute map
//! - **Async-First** - Built on Tokio, one task per unit of work
//!
//! ## Quick Start
//!
//! ```no_run
//! use portway_client::RelayService;
//! use portway_service::{RegistryConfig, ServiceConfig, ServiceKind, ServiceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ServiceRegistry::new(RegistryConfig::default());
//!     registry.register_factory("relay", RelayService::create);
//!
//!     let configs = vec![
//!         ServiceConfig::new("equipment-link", 7010, "relay")
//!             .with_kind(ServiceKind::Client)
//!             .with_attribute("remote.host", "10.1.2.3")
//!             .with_attribute("remote.port", "4001")
//!             .with_attribute("nodata.interval", "60"),
//!     ];
//!     registry.initialize_services(&configs).await;
//!
//!     tokio::signal::ctrl_c().await?;
//!     registry.shutdown_services().await;
//!     Ok(())
//! }
//! ```

mod relay;
mod spool;

pub use relay::RelayService;
pub use spool::Spool;

// Re-export the core types a relay embedder needs
pub use portway_service::{
    Connection, ConnectionId, EventBus, RegistryConfig, Result, Service, ServiceConfig,
    ServiceError, ServiceKind, ServiceRegistry, StartupType, Watchdog, WatchdogConfig,
};
