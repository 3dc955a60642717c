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

//! End-to-end registry tests over real sockets

use portway_service::{RegistryConfig, Service, ServiceConfig, ServiceRegistry};
use portway_testsuite::{LineEchoService, wait_until};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn echo_registry(config: RegistryConfig, service: ServiceConfig) -> (Arc<ServiceRegistry>, SocketAddr) {
    let registry = ServiceRegistry::new(config);
    registry.register_factory("echo", LineEchoService::create);

    let port = service.connection_port;
    let registered = registry.initialize_services(std::slice::from_ref(&service)).await;
    assert_eq!(registered, 1);

    let addr = registry
        .get_service(port)
        .expect("echo service registered")
        .core()
        .local_addr()
        .expect("echo service listening");
    (registry, addr)
}

#[tokio::test]
async fn test_round_trip_with_concurrent_clients() {
    let config = ServiceConfig::new("echo", 0, "echo").with_maximum_connections(16);
    let (registry, addr) = echo_registry(RegistryConfig::default(), config).await;
    let service = registry.get_service(0).unwrap();

    // N concurrent clients, each doing one echo round-trip and staying up
    let mut clients = Vec::new();
    for i in 0..5 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let message = format!("hello-{i}\n");
        client.write_all(message.as_bytes()).await.unwrap();

        let mut buf = vec![0u8; message.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, message.as_bytes());
        clients.push(client);
    }

    let service_count = service.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            service_count.core().active_connections() == 5
        })
        .await,
        "expected 5 live connections"
    );
    // The registry-global count tracks the same accounting
    let registry_count = registry.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            registry_count.service_connections() == 5
        })
        .await,
        "global connection count must reach 5"
    );
    assert_eq!(service.snapshot().total_connections, 5);

    registry.shutdown_services().await;

    let service_count = service.clone();
    assert!(
        wait_until(Duration::from_secs(5), move || {
            service_count.core().active_connections() == 0
        })
        .await,
        "shutdown must close every connection"
    );
    assert_eq!(registry.service_connections(), 0);

    // Every client observes the close
    for mut client in clients {
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("client close timed out")
            .unwrap_or(0);
        assert_eq!(n, 0, "client should see EOF after service shutdown");
    }
}

#[tokio::test]
async fn test_per_service_connection_limit() {
    let config = ServiceConfig::new("echo", 0, "echo").with_maximum_connections(2);
    let (registry, addr) = echo_registry(RegistryConfig::default(), config).await;
    let service = registry.get_service(0).unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"a\n").await.unwrap();
    let mut buf = [0u8; 2];
    first.read_exact(&mut buf).await.unwrap();

    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(b"b\n").await.unwrap();
    second.read_exact(&mut buf).await.unwrap();

    // Third connection is over the limit: accepted at the TCP level,
    // rejected by admission, and closed without serving anything.
    let mut third = TcpStream::connect(addr).await.unwrap();
    let mut probe = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), third.read(&mut probe))
        .await
        .expect("rejected connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0, "over-limit connection must be closed unserved");

    assert_eq!(service.core().active_connections(), 2);
    registry.shutdown_services().await;
}

#[tokio::test]
async fn test_ignore_limit_bypasses_global_budget() {
    // A global budget of zero blocks everything...
    let config = ServiceConfig::new("echo", 0, "echo").with_ignore_connection_limit(true);
    let (registry, addr) = echo_registry(
        RegistryConfig::new().with_maximum_connections(0),
        config,
    )
    .await;

    // ...except services configured to ignore the limits
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"through\n").await.unwrap();
    let mut buf = vec![0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"through\n");

    registry.shutdown_services().await;
}

#[tokio::test]
async fn test_restart_after_soft_remove_serves_again() {
    let config = ServiceConfig::new("echo", 0, "echo");
    let (registry, addr) = echo_registry(RegistryConfig::default(), config).await;

    assert!(registry.remove_service(0, false).await);
    assert!(!registry.is_running(0));

    // The old port is released; restart binds a fresh one
    registry.start_service(0).await.unwrap();
    let new_addr = registry
        .get_service(0)
        .unwrap()
        .core()
        .local_addr()
        .expect("restarted service listening");

    let mut client = TcpStream::connect(new_addr).await.unwrap();
    client.write_all(b"again\n").await.unwrap();
    let mut buf = vec![0u8; 6];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"again\n");

    let _ = addr;
    registry.shutdown_services().await;
}
