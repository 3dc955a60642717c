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

//! Service capability trait and shared service state
//!
//! A service is one configured unit of work bound to one port. Concrete
//! variants (listening line services, outbound relay services) implement
//! the [`Service`] trait and embed a [`ServiceCore`], which consolidates
//! all shared mutable state behind a single lock: the running flag, the
//! live connection set, and the health timestamps. Monotonic counters live
//! in the lock-free [`ServiceMetrics`](crate::ServiceMetrics).
//!
//! The live connection count is always `connections.len()`, so the
//! active-connections invariant cannot drift from the set itself.

use crate::bus::{ControlReply, ControlRequest, EventBus};
use crate::config::{DEFAULT_ACCEPT_TIMEOUT, ServiceConfig};
use crate::connection::Connection;
use crate::error::{Result, ServiceError};
use crate::listener::ServiceListener;
use crate::metrics::ServiceMetrics;
use crate::types::{ConnectionId, ServiceSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Service capability interface
///
/// Lifecycle (`start`/`shutdown`/`is_running`), connection management, and
/// serving are the three capabilities every service variant provides.
/// Everything except `serve` and `start` has a default implementation that
/// delegates to the embedded [`ServiceCore`].
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// The service's shared state
    fn core(&self) -> &ServiceCore;

    /// Handle one connection to completion
    ///
    /// Invoked once per connection on the connection's own task. Errors are
    /// logged and counted by the caller; the service keeps running.
    async fn serve(&self, conn: Arc<Connection>) -> Result<()>;

    /// Start the service
    ///
    /// Server variants create their listener here; client variants spawn
    /// their supervision tasks.
    async fn start(self: Arc<Self>) -> Result<()>;

    /// Stop the service, closing the listener and every tracked connection
    async fn shutdown(&self) -> Result<()> {
        self.core().shutdown().await
    }

    /// Whether the service is currently running
    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    /// The service's unique name
    fn name(&self) -> &str {
        self.core().name()
    }

    /// The service's unique port
    fn port(&self) -> u16 {
        self.core().port()
    }

    /// The service's configuration
    fn config(&self) -> &ServiceConfig {
        self.core().config()
    }

    /// Point-in-time view of the service's counters and state
    fn snapshot(&self) -> ServiceSnapshot {
        self.core().snapshot()
    }
}

/// State guarded by the service's one lock
struct CoreState {
    running: bool,
    connections: HashMap<ConnectionId, Arc<Connection>>,
    last_action: Option<SystemTime>,
    last_receive: Option<SystemTime>,
    last_send: Option<SystemTime>,
}

/// Shared state embedded in every service variant
pub struct ServiceCore {
    config: ServiceConfig,
    bus: EventBus,
    owner_tag: String,
    next_connection_id: AtomicU64,
    state: Mutex<CoreState>,
    metrics: ServiceMetrics,
    listener: Mutex<Option<Arc<ServiceListener>>>,
    stop_notify: Notify,
}

impl ServiceCore {
    /// Create the core for a service with the given configuration
    pub fn new(config: ServiceConfig, bus: EventBus) -> Self {
        let owner_tag = format!("svc-{}", config.service_name);
        Self {
            config,
            bus,
            owner_tag,
            next_connection_id: AtomicU64::new(1),
            state: Mutex::new(CoreState {
                running: false,
                connections: HashMap::new(),
                last_action: None,
                last_receive: None,
                last_send: None,
            }),
            metrics: ServiceMetrics::new(),
            listener: Mutex::new(None),
            stop_notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The service's unique name
    pub fn name(&self) -> &str {
        &self.config.service_name
    }

    /// The service's unique port
    pub fn port(&self) -> u16 {
        self.config.connection_port
    }

    /// The tag labelling this service's tasks in logs
    pub fn owner_tag(&self) -> &str {
        &self.owner_tag
    }

    /// The service's configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The bus this service reports through
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The service's monotonic counters
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Notified when the service stops; supervision loops select on this
    pub fn stop_notify(&self) -> &Notify {
        &self.stop_notify
    }

    /// Whether the service is currently running
    pub fn is_running(&self) -> bool {
        self.state().running
    }

    fn set_running(&self, running: bool) -> bool {
        let mut state = self.state();
        std::mem::replace(&mut state.running, running)
    }

    /// Record generic service activity
    pub fn touch(&self) {
        self.state().last_action = Some(SystemTime::now());
    }

    /// Record a received message: counter plus health timestamps
    pub fn note_received(&self) {
        self.metrics.message_received();
        let mut state = self.state();
        let now = Some(SystemTime::now());
        state.last_receive = now;
        state.last_action = now;
    }

    /// Record a sent message: counter plus health timestamps
    pub fn note_sent(&self) {
        self.metrics.message_sent();
        let mut state = self.state();
        let now = Some(SystemTime::now());
        state.last_send = now;
        state.last_action = now;
    }

    /// Number of live connections
    pub fn active_connections(&self) -> usize {
        self.state().connections.len()
    }

    /// Fetch a live connection by ID
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.state().connections.get(&id).cloned()
    }

    /// IDs of every live connection
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state().connections.keys().copied().collect()
    }

    /// Address the listener is actually bound to, if one is active
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|listener| listener.local_addr())
    }

    /// Transition stopped → running without binding a listener
    ///
    /// Client variants call this from their `start`.
    pub fn mark_started(&self) -> Result<()> {
        if self.set_running(true) {
            return Err(ServiceError::AlreadyRunning(self.name().to_string()));
        }
        self.touch();
        Ok(())
    }

    /// Transition stopped → running and bring up the accept loop
    ///
    /// Server variants call this from their `start`. Exactly one listener is
    /// created per running service; a bind failure reverts the transition
    /// and propagates.
    pub async fn start_server(&self, owner: Arc<dyn Service>) -> Result<()> {
        if self.set_running(true) {
            return Err(ServiceError::AlreadyRunning(self.name().to_string()));
        }

        let accept_timeout = self
            .config
            .attr_duration("accept.timeout", DEFAULT_ACCEPT_TIMEOUT);

        let listener = match ServiceListener::bind(self.port(), accept_timeout).await {
            Ok(listener) => Arc::new(listener),
            Err(error) => {
                self.set_running(false);
                return Err(error);
            }
        };

        info!(
            service = %self.name(),
            addr = %listener.local_addr(),
            "service listening"
        );

        listener.start(owner);
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self.touch();
        Ok(())
    }

    /// Materialize and register a connection, then spawn its task
    ///
    /// `socket` is `Some` for accepted or dialed streams, `None` for
    /// synthetic handles. Admission control happens here: the per-service
    /// limit and the registry-global budget both apply unless the service
    /// is configured to ignore them. The limit check and the insertion are
    /// a single critical section, so concurrent accepts cannot overshoot.
    pub async fn add_connection(
        &self,
        owner: Arc<dyn Service>,
        socket: Option<TcpStream>,
    ) -> Result<Arc<Connection>> {
        let ignore_limit = self.config.ignore_connection_limit;

        // The global budget is a soft cap consulted over the bus.
        if !ignore_limit {
            let global = self
                .bus
                .request(self.name(), ControlRequest::GetServiceConnections)
                .await;
            let maximum = self
                .bus
                .request(self.name(), ControlRequest::GetMaximumConnections)
                .await;
            if let (Ok(ControlReply::Connections(global)), Ok(ControlReply::Maximum(maximum))) =
                (global, maximum)
            {
                if global >= maximum {
                    self.metrics.connection_error();
                    warn!(
                        service = %self.name(),
                        global,
                        maximum,
                        "global connection budget exhausted, rejecting connection"
                    );
                    return Err(ServiceError::ConnectionLimit(maximum));
                }
            }
        }

        let id = ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::SeqCst));
        let conn = match socket {
            Some(socket) => Connection::socket(id, socket, &self.owner_tag)?,
            None => Connection::synthetic(id, &self.owner_tag),
        };

        let rejected = {
            let mut state = self.state();
            if !state.running {
                Some(ServiceError::NotRunning(self.name().to_string()))
            } else if !ignore_limit && state.connections.len() >= self.config.maximum_connections {
                Some(ServiceError::ConnectionLimit(self.config.maximum_connections))
            } else {
                state.connections.insert(id, conn.clone());
                None
            }
        };

        if let Some(error) = rejected {
            self.metrics.connection_error();
            conn.deactivate().await;
            return Err(error);
        }

        self.metrics.connection_opened();
        let _ = self
            .bus
            .request(self.name(), ControlRequest::IncreaseServiceConnections)
            .await;
        self.touch();

        tokio::spawn(conn.clone().run(owner));
        Ok(conn)
    }

    /// Remove a connection from the live set
    ///
    /// Returns whether the connection was present. Absent IDs are not an
    /// error: the connection may already have been torn down by the data
    /// monitor or by mass shutdown, and the budget must be released exactly
    /// once.
    pub async fn remove_connection(&self, id: ConnectionId) -> bool {
        let removed = self.state().connections.remove(&id);
        match removed {
            Some(conn) => {
                conn.deactivate().await;
                let _ = self
                    .bus
                    .request(self.name(), ControlRequest::DecreaseServiceConnections)
                    .await;
                self.touch();
                debug!(
                    service = %self.name(),
                    connection_id = %id,
                    "connection removed"
                );
                true
            }
            None => false,
        }
    }

    /// Stop the service
    ///
    /// Flips running off first so in-flight connection tasks skip their own
    /// removal, then closes the listener and force-clears the connection
    /// set, releasing the global budget for each entry. A stopped service
    /// shuts down as a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.set_running(false) {
            return Ok(());
        }

        self.stop_notify.notify_waiters();

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.shutdown();
        }

        let drained: Vec<Arc<Connection>> = {
            let mut state = self.state();
            state.connections.drain().map(|(_, conn)| conn).collect()
        };

        futures_util::future::join_all(drained.iter().map(|conn| conn.deactivate())).await;
        for _ in &drained {
            let _ = self
                .bus
                .request(self.name(), ControlRequest::DecreaseServiceConnections)
                .await;
        }

        self.bus
            .log_info(
                self.name(),
                format!("service stopped, closed {} connections", drained.len()),
            )
            .await;
        Ok(())
    }

    /// Point-in-time view of the service's counters and state
    pub fn snapshot(&self) -> ServiceSnapshot {
        let metrics = self.metrics.snapshot();
        let state = self.state();
        ServiceSnapshot {
            name: self.config.service_name.clone(),
            port: self.config.connection_port,
            kind: self.config.service_kind,
            running: state.running,
            active_connections: state.connections.len(),
            total_connections: metrics.total_connections,
            messages_sent: metrics.messages_sent,
            messages_received: metrics.messages_received,
            messages_errored: metrics.messages_errored,
            last_action: state.last_action,
            last_receive: state.last_receive,
            last_send: state.last_send,
        }
    }
}

impl std::fmt::Debug for ServiceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCore")
            .field("name", &self.name())
            .field("port", &self.port())
            .field("kind", &self.config.service_kind)
            .field("running", &self.is_running())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleService {
        core: ServiceCore,
    }

    impl IdleService {
        fn new(name: &str, port: u16) -> Arc<Self> {
            let config = ServiceConfig::new(name, port, "idle").with_maximum_connections(2);
            Arc::new(Self {
                core: ServiceCore::new(config, EventBus::new()),
            })
        }
    }

    #[async_trait]
    impl Service for IdleService {
        fn core(&self) -> &ServiceCore {
            &self.core
        }

        async fn serve(&self, conn: Arc<Connection>) -> Result<()> {
            // Synthetic connections stay up until torn down externally
            while conn.is_active() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Ok(())
        }

        async fn start(self: Arc<Self>) -> Result<()> {
            self.core.mark_started()
        }
    }

    #[tokio::test]
    async fn test_mark_started_twice_fails() {
        let service = IdleService::new("idle", 7001);
        service.core().mark_started().unwrap();
        assert!(service.is_running());
        assert!(matches!(
            service.core().mark_started(),
            Err(ServiceError::AlreadyRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_accounting_matches_live_set() {
        let service = IdleService::new("idle", 7002);
        service.core().mark_started().unwrap();

        let owner: Arc<dyn Service> = service.clone();
        let first = service
            .core()
            .add_connection(owner.clone(), None)
            .await
            .unwrap();
        let second = service
            .core()
            .add_connection(owner.clone(), None)
            .await
            .unwrap();

        assert_eq!(service.core().active_connections(), 2);
        assert_eq!(service.core().metrics().total_connections(), 2);

        // Per-service limit of 2 is enforced atomically with the insert
        let third = service.core().add_connection(owner.clone(), None).await;
        assert!(matches!(third, Err(ServiceError::ConnectionLimit(2))));
        assert_eq!(service.core().active_connections(), 2);

        assert!(service.core().remove_connection(first.id()).await);
        assert!(!service.core().remove_connection(first.id()).await);
        assert_eq!(service.core().active_connections(), 1);

        service.core().shutdown().await.unwrap();
        assert_eq!(service.core().active_connections(), 0);
        assert!(!service.is_running());
        let _ = second;
    }

    #[tokio::test]
    async fn test_add_connection_requires_running() {
        let service = IdleService::new("idle", 7003);
        let owner: Arc<dyn Service> = service.clone();
        let result = service.core().add_connection(owner, None).await;
        assert!(matches!(result, Err(ServiceError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let service = IdleService::new("idle", 7004);
        service.core().mark_started().unwrap();
        service.core().shutdown().await.unwrap();
        service.core().shutdown().await.unwrap();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_state() {
        let service = IdleService::new("idle", 7005);
        service.core().mark_started().unwrap();
        service.core().note_received();
        service.core().note_sent();

        let snapshot = service.snapshot();
        assert_eq!(snapshot.name, "idle");
        assert_eq!(snapshot.port, 7005);
        assert!(snapshot.running);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.messages_sent, 1);
        assert!(snapshot.last_receive.is_some());
        assert!(snapshot.last_send.is_some());
    }
}
