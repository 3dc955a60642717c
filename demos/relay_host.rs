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

//! Relay Host Example
//!
//! Hosts a single CLIENT-role relay service that keeps an outbound
//! connection open to remote equipment, reconnecting on failure and
//! recycling the link when it goes silent.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --example relay_host -- <remote-host> <remote-port>
//! ```
//!
//! A quick local remote to talk to:
//! ```bash
//! nc -l -k 4001
//! ```

use portway_client::RelayService;
use portway_service::{
    RegistryConfig, ServiceConfig, ServiceKind, ServiceRegistry, StartupType,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let remote_host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let remote_port = args.next().unwrap_or_else(|| "4001".to_string());

    println!("Starting Portway Relay Host -> {remote_host}:{remote_port}");
    println!("Press Ctrl+C to stop\n");

    let registry = ServiceRegistry::new(RegistryConfig::default());
    registry.register_factory("relay", RelayService::create);

    let configs = vec![
        ServiceConfig::new("equipment-link", 7010, "relay")
            .with_kind(ServiceKind::Client)
            .with_startup_type(StartupType::Automatic)
            .with_attribute("remote.host", remote_host)
            .with_attribute("remote.port", remote_port)
            .with_attribute("idle.interval", "10")
            .with_attribute("nodata.interval", "60")
            .with_attribute("spool.path", "equipment-link.spool"),
    ];
    registry.initialize_services(&configs).await;

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    registry.shutdown_services().await;
    println!("{registry}");

    Ok(())
}
