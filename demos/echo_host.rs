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

//! Simple Echo Host Example
//!
//! This example demonstrates a basic line-oriented echo service hosted by
//! the registry:
//! - Accepts connections on port 7001
//! - Echoes back any line received from clients
//! - Disconnects a client that sends the configured sentinel line
//! - Handles multiple concurrent connections
//!
//! ## Usage
//!
//! Run the host:
//! ```bash
//! cargo run --example echo_host
//! ```
//!
//! Connect with a TCP client:
//! ```bash
//! nc localhost 7001
//! ```

use async_trait::async_trait;
use portway_service::{
    Connection, ControlReply, ControlRequest, EventBus, RegistryConfig, Result, Service,
    ServiceConfig, ServiceCore, ServiceRegistry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    println!("Starting Portway Echo Host on 0.0.0.0:7001");
    println!("Connect with: nc localhost 7001");
    println!("Press Ctrl+C to stop the host\n");

    let registry = ServiceRegistry::new(
        RegistryConfig::new()
            .with_maximum_connections(100)
            .with_property("shutdown.sentinel", "quit"),
    );
    registry.register_factory("echo", EchoService::create);

    let configs = vec![ServiceConfig::new("echo", 7001, "echo").with_maximum_connections(50)];
    registry.initialize_services(&configs).await;

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    registry.shutdown_services().await;
    println!("{registry}");

    Ok(())
}

/// Line echo service with a configurable goodbye sentinel
struct EchoService {
    core: ServiceCore,
}

impl EchoService {
    fn create(bus: EventBus, config: ServiceConfig) -> Result<Arc<dyn Service>> {
        Ok(Arc::new(Self {
            core: ServiceCore::new(config, bus),
        }))
    }

    async fn sentinel(&self) -> String {
        let reply = self
            .core
            .bus()
            .request(
                self.core.name(),
                ControlRequest::GetProperty("shutdown.sentinel".into()),
            )
            .await;
        match reply {
            Ok(ControlReply::Property(Some(value))) => value,
            _ => "quit".to_string(),
        }
    }
}

#[async_trait]
impl Service for EchoService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn serve(&self, conn: Arc<Connection>) -> Result<()> {
        let sentinel = self.sentinel().await;
        conn.write_line("Welcome to the Portway Echo Host").await?;

        while let Some(line) = conn.read_line().await? {
            conn.record_received();
            self.core.note_received();
            if line == sentinel {
                conn.write_line("Goodbye!").await?;
                break;
            }
            conn.write_line(&line).await?;
            self.core.note_sent();
        }
        Ok(())
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        let owner: Arc<dyn Service> = self.clone();
        self.core.start_server(owner).await
    }
}
