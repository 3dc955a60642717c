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

//! Connection implementation
//!
//! A connection is one unit of client-serving execution. It is either
//! socket-backed (an accepted or dialed TCP stream behind a line transport)
//! or synthetic (a registry-internal handle with no socket). The connection
//! owns its activity state and a free-form property map; the business logic
//! lives in the owning service's `serve` method.
//!
//! The stream is split so reads and writes never contend on one lock: the
//! serve loop can sit in a blocking read while another task writes. A
//! deactivation notify unblocks a pending read immediately, so a forced
//! teardown never waits on a silent remote.

use crate::error::{Result, ServiceError};
use crate::service::Service;
use crate::types::{ConnectionId, ConnectionState};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info};

/// Maximum accepted line length on the wire
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;
type LineWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// One client-serving unit of execution, socket-backed or synthetic
pub struct Connection {
    // Identity
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    owner_tag: String,
    created_at: Instant,

    // Split I/O (absent for synthetic connections)
    reader: Option<Mutex<LineReader>>,
    writer: Option<Mutex<LineWriter>>,

    // Activity state (lock-free)
    state: AtomicU8,
    active: AtomicBool,
    closed: AtomicBool,
    released: AtomicBool,
    close_notify: Notify,

    // Counter read by the data monitor, advanced by serving logic
    records_received: AtomicU64,

    // Ad hoc per-connection state
    properties: RwLock<HashMap<String, String>>,
}

impl Connection {
    /// Wrap a TCP stream into a socket-backed connection
    pub fn socket(id: ConnectionId, socket: TcpStream, owner_tag: &str) -> Result<Arc<Self>> {
        let peer_addr = socket.peer_addr()?;

        info!(
            connection_id = %id,
            service = %owner_tag,
            peer_addr = %peer_addr,
            "creating connection"
        );

        counter!("portway.connections.total").increment(1);
        gauge!("portway.connections.active").increment(1.0);

        let (read_half, write_half) = socket.into_split();
        let codec = LinesCodec::new_with_max_length(DEFAULT_MAX_LINE_LENGTH);
        let reader = FramedRead::new(read_half, codec.clone());
        let writer = FramedWrite::new(write_half, codec);

        Ok(Arc::new(Self {
            id,
            peer_addr: Some(peer_addr),
            owner_tag: owner_tag.to_string(),
            created_at: Instant::now(),
            reader: Some(Mutex::new(reader)),
            writer: Some(Mutex::new(writer)),
            state: AtomicU8::new(ConnectionState::Created.as_u8()),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            close_notify: Notify::new(),
            records_received: AtomicU64::new(0),
            properties: RwLock::new(HashMap::new()),
        }))
    }

    /// Create a synthetic connection with no underlying socket
    pub fn synthetic(id: ConnectionId, owner_tag: &str) -> Arc<Self> {
        debug!(connection_id = %id, service = %owner_tag, "creating synthetic connection");
        Arc::new(Self {
            id,
            peer_addr: None,
            owner_tag: owner_tag.to_string(),
            created_at: Instant::now(),
            reader: None,
            writer: None,
            state: AtomicU8::new(ConnectionState::Created.as_u8()),
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(true),
            close_notify: Notify::new(),
            records_received: AtomicU64::new(0),
            properties: RwLock::new(HashMap::new()),
        })
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address (None for synthetic connections)
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Get when the connection was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the connection wraps a real socket
    pub fn is_socket_backed(&self) -> bool {
        self.reader.is_some()
    }

    /// Get the connection's lifecycle state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Whether the connection is active
    ///
    /// A closed transport overrides the manually-set flag: once the socket
    /// is gone, the connection reports inactive no matter what.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// Manually set the activity flag
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Record one received record (watchdog liveness input)
    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records received since the connection was created
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    /// Set a free-form property
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Get a free-form property
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Read one line from the transport
    ///
    /// Returns `Ok(None)` on end of stream, on deactivation, and for
    /// synthetic connections. An I/O failure marks the transport closed
    /// before the error is returned.
    pub async fn read_line(&self) -> Result<Option<String>> {
        let Some(reader) = &self.reader else {
            return Ok(None);
        };
        // Created before the flag check so a concurrent deactivation between
        // the check and the select is still observed.
        let notified = self.close_notify.notified();
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut guard = reader.lock().await;
        tokio::pin!(notified);
        tokio::select! {
            item = guard.next() => match item {
                Some(Ok(line)) => Ok(Some(line)),
                Some(Err(error)) => {
                    self.closed.store(true, Ordering::Release);
                    Err(error.into())
                }
                None => {
                    self.closed.store(true, Ordering::Release);
                    Ok(None)
                }
            },
            _ = &mut notified => Ok(None),
        }
    }

    /// Write one line to the transport
    pub async fn write_line(&self, line: &str) -> Result<()> {
        let Some(writer) = &self.writer else {
            return Err(ServiceError::ConnectionClosed);
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(ServiceError::ConnectionClosed);
        }
        writer.lock().await.send(line.to_string()).await?;
        Ok(())
    }

    /// Deactivate the connection and close its transport
    ///
    /// Unblocks any pending read immediately. Safe to call repeatedly;
    /// close errors are swallowed.
    pub async fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.set_state(ConnectionState::Done);
        self.close_notify.notify_waiters();
        if let Some(writer) = &self.writer {
            // Bounded: a stalled peer must not be able to hang a teardown
            // on the final flush. The socket itself closes with the halves.
            let _ = tokio::time::timeout(std::time::Duration::from_secs(1), async {
                let _ = SinkExt::<String>::close(&mut *writer.lock().await).await;
            })
            .await;
        }
        if first && !self.released.swap(true, Ordering::AcqRel) {
            gauge!("portway.connections.active").decrement(1.0);
        }
    }

    /// Run the connection to completion
    ///
    /// Marks the connection active, delegates to the owner's `serve`, and on
    /// exit deactivates and removes itself from the owner, unless the owner
    /// has already stopped, in which case mass shutdown owns the cleanup and
    /// a second removal would corrupt the accounting.
    pub async fn run(self: Arc<Self>, owner: Arc<dyn Service>) {
        self.set_state(ConnectionState::Active);
        self.set_active(true);
        debug!(
            connection_id = %self.id,
            service = %self.owner_tag,
            "connection task starting"
        );

        if let Err(error) = owner.serve(self.clone()).await {
            owner.core().metrics().message_errored();
            owner
                .core()
                .bus()
                .log_error(
                    owner.name(),
                    format!(
                        "connection {} on port {} failed: {error}",
                        self.id,
                        owner.port()
                    ),
                )
                .await;
        }

        self.deactivate().await;
        if owner.is_running() {
            owner.core().remove_connection(self.id).await;
        }
        debug!(
            connection_id = %self.id,
            service = %self.owner_tag,
            "connection task finished"
        );
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .field("records_received", &self.records_received())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::{Duration, timeout};

    async fn create_test_socket() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });

        let (server, _) = listener.accept().await.unwrap();
        let client = client_task.await.unwrap();

        (server, client)
    }

    #[tokio::test]
    async fn test_synthetic_connection() {
        let conn = Connection::synthetic(ConnectionId::new(1), "svc-test");

        assert!(!conn.is_socket_backed());
        assert_eq!(conn.peer_addr(), None);
        assert_eq!(conn.state(), ConnectionState::Created);

        conn.set_active(true);
        assert!(conn.is_active());

        assert_eq!(conn.read_line().await.unwrap(), None);
        assert!(conn.write_line("nope").await.is_err());

        conn.deactivate().await;
        assert!(!conn.is_active());
        assert_eq!(conn.state(), ConnectionState::Done);
    }

    #[tokio::test]
    async fn test_connection_properties_and_records() {
        let conn = Connection::synthetic(ConnectionId::new(2), "svc-test");

        conn.set_property("session", "abc");
        assert_eq!(conn.property("session").as_deref(), Some("abc"));
        assert_eq!(conn.property("missing"), None);

        conn.record_received();
        conn.record_received();
        assert_eq!(conn.records_received(), 2);
    }

    #[tokio::test]
    async fn test_socket_connection_read_write() {
        let (server, mut client) = create_test_socket().await;
        let conn = Connection::socket(ConnectionId::new(3), server, "svc-test").unwrap();

        assert!(conn.is_socket_backed());
        assert!(conn.peer_addr().is_some());

        client.write_all(b"hello\n").await.unwrap();
        assert_eq!(conn.read_line().await.unwrap().as_deref(), Some("hello"));

        conn.write_line("world").await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world\n");
    }

    #[tokio::test]
    async fn test_closed_transport_overrides_active_flag() {
        let (server, client) = create_test_socket().await;
        let conn = Connection::socket(ConnectionId::new(4), server, "svc-test").unwrap();

        conn.set_active(true);
        assert!(conn.is_active());

        drop(client);
        // EOF marks the transport closed
        assert_eq!(conn.read_line().await.unwrap(), None);

        conn.set_active(true);
        assert!(!conn.is_active(), "closed transport must override the flag");
    }

    #[tokio::test]
    async fn test_deactivate_unblocks_pending_read() {
        let (server, _client) = create_test_socket().await;
        let conn = Connection::socket(ConnectionId::new(5), server, "svc-test").unwrap();

        let reader = conn.clone();
        let read_task = tokio::spawn(async move { reader.read_line().await });

        // Let the read park on the silent socket, then tear down
        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.deactivate().await;

        let result = timeout(Duration::from_secs(1), read_task)
            .await
            .expect("read did not unblock")
            .unwrap();
        assert_eq!(result.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_write_while_read_blocked() {
        let (server, mut client) = create_test_socket().await;
        let conn = Connection::socket(ConnectionId::new(6), server, "svc-test").unwrap();

        let reader = conn.clone();
        let read_task = tokio::spawn(async move { reader.read_line().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A write must not wait for the blocked read
        timeout(Duration::from_secs(1), conn.write_line("ping"))
            .await
            .expect("write blocked behind a pending read")
            .unwrap();

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping\n");

        client.write_all(b"pong\n").await.unwrap();
        let line = timeout(Duration::from_secs(1), read_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line.as_deref(), Some("pong"));
    }
}
