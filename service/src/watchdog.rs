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

//! Outbound-link supervision for CLIENT-role services
//!
//! Two independent tasks keep one outbound connection alive:
//!
//! - the **connector** dials the configured remote while the link is down,
//!   registering the socket through the owning service once it connects;
//! - the **data monitor** wakes every no-data interval and treats a window
//!   with zero new received records as a stalled link, tearing the
//!   connection down and re-arming the connector. A half-open TCP
//!   connection can look healthy forever; this is the application-level
//!   substitute for transport keepalive.
//!
//! Each task is guarded by its own already-running flag so it is never
//! spawned twice, and both exit promptly when the owning service stops,
//! even mid-sleep.
//!
//! The record baseline is reset *before* a fresh link is marked connected,
//! so a new connection always gets one full no-data window before it can
//! be judged stale.

use crate::config::ServiceConfig;
use crate::connection::Connection;
use crate::error::{Result, ServiceError};
use crate::service::Service;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Default outbound connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default retry interval while the link is down
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(30);

/// Default no-data window for the liveness check
pub const DEFAULT_NODATA_INTERVAL: Duration = Duration::from_secs(60);

/// Watchdog tuning, read from service attributes
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Remote hostname or IP address
    pub remote_host: String,
    /// Remote port
    pub remote_port: u16,
    /// Outbound connect timeout
    pub connect_timeout: Duration,
    /// Retry interval while disconnected
    pub idle_interval: Duration,
    /// No-data window for the liveness check
    pub nodata_interval: Duration,
}

impl WatchdogConfig {
    /// Read the watchdog attributes from a service configuration
    ///
    /// `remote.host` defaults to localhost, `remote.port` to the service's
    /// own port, and the intervals to the module defaults. Bad values fall
    /// back with a logged warning.
    pub fn from_attributes(config: &ServiceConfig) -> Self {
        Self {
            remote_host: config.attr_str("remote.host", "localhost"),
            remote_port: config.attr_u64("remote.port", u64::from(config.connection_port)) as u16,
            connect_timeout: config.attr_duration("connect.timeout", DEFAULT_CONNECT_TIMEOUT),
            idle_interval: config.attr_duration("idle.interval", DEFAULT_IDLE_INTERVAL),
            nodata_interval: config.attr_duration("nodata.interval", DEFAULT_NODATA_INTERVAL),
        }
    }

    /// Set the remote endpoint
    pub fn with_remote(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote_host = host.into();
        self.remote_port = port;
        self
    }

    /// Set the retry interval
    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    /// Set the no-data window
    pub fn with_nodata_interval(mut self, interval: Duration) -> Self {
        self.nodata_interval = interval;
        self
    }
}

/// Reconnect and liveness supervisor for one outbound link
pub struct Watchdog {
    config: WatchdogConfig,
    connected: AtomicBool,
    connector_running: AtomicBool,
    monitor_running: AtomicBool,
    current: Mutex<Option<Arc<Connection>>>,
    last_records: AtomicU64,
}

impl Watchdog {
    /// Create a watchdog with the given tuning
    pub fn new(config: WatchdogConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            connected: AtomicBool::new(false),
            connector_running: AtomicBool::new(false),
            monitor_running: AtomicBool::new(false),
            current: Mutex::new(None),
            last_records: AtomicU64::new(0),
        })
    }

    /// The watchdog's tuning
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Whether the outbound link is currently up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The connection currently being supervised
    pub fn current_connection(&self) -> Option<Arc<Connection>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn both supervision tasks for the owning service
    pub fn start(self: Arc<Self>, owner: Arc<dyn Service>) {
        self.clone().spawn_connector(owner.clone());
        self.spawn_monitor(owner);
    }

    /// Spawn the connector task unless one is already running
    pub fn spawn_connector(self: Arc<Self>, owner: Arc<dyn Service>) {
        if self.connector_running.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(self.connector(owner));
    }

    fn spawn_monitor(self: Arc<Self>, owner: Arc<dyn Service>) {
        if self.monitor_running.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(self.monitor(owner));
    }

    async fn dial(&self) -> Result<TcpStream> {
        let address = (self.config.remote_host.as_str(), self.config.remote_port);
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(ServiceError::Timeout),
        }
    }

    /// Dial until connected or the service stops
    async fn connector(self: Arc<Self>, owner: Arc<dyn Service>) {
        let endpoint = format!("{}:{}", self.config.remote_host, self.config.remote_port);
        debug!(service = %owner.name(), endpoint = %endpoint, "connector starting");

        while owner.is_running() && !self.is_connected() {
            match self.dial().await {
                Ok(stream) => {
                    match owner
                        .core()
                        .add_connection(owner.clone(), Some(stream))
                        .await
                    {
                        Ok(conn) => {
                            // Baseline first, connected flag last
                            self.last_records.store(0, Ordering::SeqCst);
                            *self
                                .current
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());
                            self.connected.store(true, Ordering::SeqCst);
                            info!(
                                service = %owner.name(),
                                endpoint = %endpoint,
                                connection_id = %conn.id(),
                                "outbound link established"
                            );
                            break;
                        }
                        Err(error) => {
                            owner
                                .core()
                                .bus()
                                .log_error(
                                    owner.name(),
                                    format!("failed to register outbound connection: {error}"),
                                )
                                .await;
                        }
                    }
                }
                Err(error) => {
                    owner
                        .core()
                        .bus()
                        .log_debug(
                            owner.name(),
                            format!("connect to {endpoint} failed: {error}"),
                        )
                        .await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.idle_interval) => {}
                _ = owner.core().stop_notify().notified() => break,
            }
        }

        debug!(service = %owner.name(), "connector exiting");
        self.connector_running.store(false, Ordering::SeqCst);
    }

    /// Liveness probe loop
    async fn monitor(self: Arc<Self>, owner: Arc<dyn Service>) {
        debug!(service = %owner.name(), "data monitor starting");

        while owner.is_running() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.nodata_interval) => {}
                _ = owner.core().stop_notify().notified() => break,
            }
            if !owner.is_running() {
                break;
            }

            if !self.is_connected() {
                // Link is down: make sure a connector is working on it
                self.clone().spawn_connector(owner.clone());
                continue;
            }

            let Some(conn) = self.current_connection() else {
                continue;
            };

            let seen = conn.records_received();
            let last = self.last_records.swap(seen, Ordering::SeqCst);
            if seen == last {
                // Stalled link: no new records within the window
                warn!(
                    service = %owner.name(),
                    connection_id = %conn.id(),
                    window = ?self.config.nodata_interval,
                    "no data received within window, recycling connection"
                );
                owner
                    .core()
                    .bus()
                    .log_error(
                        owner.name(),
                        format!(
                            "connection {} stalled, no data within {:?}",
                            conn.id(),
                            self.config.nodata_interval
                        ),
                    )
                    .await;

                self.connected.store(false, Ordering::SeqCst);
                *self
                    .current
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                owner.core().remove_connection(conn.id()).await;
                self.last_records.store(0, Ordering::SeqCst);

                self.clone().spawn_connector(owner.clone());
            }
        }

        debug!(service = %owner.name(), "data monitor exiting");
        self.monitor_running.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("remote_host", &self.config.remote_host)
            .field("remote_port", &self.config.remote_port)
            .field("connected", &self.is_connected())
            .finish()
    }
}
