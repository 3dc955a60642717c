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

//! Per-service accept loop
//!
//! One listener per running SERVER-type service. The loop blocks on accept
//! with a bounded timeout tick so it re-checks its own state and the owning
//! service's running flag even without traffic. Accepted sockets are handed
//! to the owning service, which materializes the connection and enforces
//! limits. A single bad accept never kills the loop.

use crate::error::Result;
use crate::service::Service;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Listener lifecycle state (stored as atomic u8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    /// Bound, accept loop not yet started
    Created = 0,
    /// Accept loop running
    Active = 1,
    /// Shutdown requested, loop winding down
    ShuttingDown = 2,
    /// Loop exited, socket released
    Closed = 3,
}

impl ListenerState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::ShuttingDown,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Accept-loop owner for one SERVER-type service's bound port
pub struct ServiceListener {
    local_addr: SocketAddr,
    accept_timeout: Duration,
    state: AtomicU8,
    socket: Mutex<Option<TcpListener>>,
    shutdown_notify: Notify,
}

impl ServiceListener {
    /// Bind to the given port on all interfaces
    ///
    /// Port 0 binds an ephemeral port; `local_addr()` reports the real one.
    pub async fn bind(port: u16, accept_timeout: Duration) -> Result<Self> {
        let socket = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            local_addr,
            accept_timeout,
            state: AtomicU8::new(ListenerState::Created.as_u8()),
            socket: Mutex::new(Some(socket)),
            shutdown_notify: Notify::new(),
        })
    }

    /// The address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port the listener is actually bound to
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The listener's lifecycle state
    pub fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ListenerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Whether the accept loop is running
    pub fn is_active(&self) -> bool {
        self.state() == ListenerState::Active
    }

    /// Start the accept loop on its own task
    ///
    /// Only valid once, from the Created state; later calls are no-ops.
    pub fn start(self: &Arc<Self>, service: Arc<dyn Service>) {
        if self
            .state
            .compare_exchange(
                ListenerState::Created.as_u8(),
                ListenerState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let listener = self.clone();
        tokio::spawn(async move {
            listener.accept_loop(service).await;
        });
    }

    async fn accept_loop(&self, service: Arc<dyn Service>) {
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(socket) = socket else {
            self.set_state(ListenerState::Closed);
            return;
        };

        while self.is_active() && service.is_running() {
            tokio::select! {
                accepted = socket.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(
                            service = %service.name(),
                            peer_addr = %peer_addr,
                            "accepted connection"
                        );
                        if let Err(error) = service
                            .core()
                            .add_connection(service.clone(), Some(stream))
                            .await
                        {
                            warn!(
                                service = %service.name(),
                                peer_addr = %peer_addr,
                                error = %error,
                                "connection rejected"
                            );
                        }
                    }
                    Err(error) => {
                        error!(
                            service = %service.name(),
                            port = self.port(),
                            error = %error,
                            "accept failed"
                        );
                        service.core().metrics().connection_error();

                        // Avoid a tight loop on persistent accept errors
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = self.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(self.accept_timeout) => {
                    // Timeout tick: not an error, just re-check the flags
                }
            }
        }

        info!(
            service = %service.name(),
            port = self.port(),
            "accept loop terminated"
        );
        self.set_state(ListenerState::Closed);
        // The bound socket is released here by drop
    }

    /// Request shutdown
    ///
    /// Idempotent. The loop observes the state change (or the notify) on its
    /// next iteration and releases the socket on exit; a listener that never
    /// started releases it immediately.
    pub fn shutdown(&self) {
        match self.state() {
            ListenerState::ShuttingDown | ListenerState::Closed => return,
            ListenerState::Created => {
                self.socket
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                self.set_state(ListenerState::Closed);
            }
            ListenerState::Active => {
                self.set_state(ListenerState::ShuttingDown);
                self.shutdown_notify.notify_waiters();
            }
        }
    }
}

impl std::fmt::Debug for ServiceListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceListener")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::ServiceConfig;
    use crate::connection::Connection;
    use crate::service::ServiceCore;
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    struct EchoService {
        core: ServiceCore,
    }

    impl EchoService {
        fn new() -> Arc<Self> {
            let config = ServiceConfig::new("echo", 0, "echo");
            Arc::new(Self {
                core: ServiceCore::new(config, EventBus::new()),
            })
        }
    }

    #[async_trait]
    impl Service for EchoService {
        fn core(&self) -> &ServiceCore {
            &self.core
        }

        async fn serve(&self, conn: Arc<Connection>) -> Result<()> {
            while let Some(line) = conn.read_line().await? {
                self.core.note_received();
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

    #[tokio::test]
    async fn test_listener_state_machine() {
        let listener = ServiceListener::bind(0, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(listener.state(), ListenerState::Created);
        assert_ne!(listener.port(), 0);

        // Shutdown before start releases the socket immediately
        listener.shutdown();
        assert_eq!(listener.state(), ListenerState::Closed);
        listener.shutdown();
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn test_accept_and_echo() {
        let service = EchoService::new();
        service.clone().start().await.unwrap();
        let addr = service.core().local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping\n").await.unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping\n");
        assert_eq!(service.core().active_connections(), 1);

        service.shutdown().await.unwrap();
        assert_eq!(service.core().active_connections(), 0);
    }

    #[tokio::test]
    async fn test_listener_stops_with_service() {
        let service = EchoService::new();
        service.clone().start().await.unwrap();
        let addr = service.core().local_addr().unwrap();

        service.shutdown().await.unwrap();

        // Give the loop a tick to wind down, then new connects must fail
        // to be served (the socket is released once the loop exits).
        tokio::time::sleep(Duration::from_millis(100)).await;
        let connect = TcpStream::connect(addr).await;
        if let Ok(mut stream) = connect {
            let mut buf = [0u8; 1];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            assert_eq!(n, 0, "no service should be listening after shutdown");
        }
    }
}
