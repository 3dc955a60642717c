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

//! Outbound relay service
//!
//! A CLIENT-role service that keeps one line-oriented connection open to a
//! piece of remote equipment. The core watchdog supervises the link;
//! records sent while the link is down are queued in the spool and replayed
//! when a fresh connection comes up.

use crate::spool::Spool;
use async_trait::async_trait;
use portway_service::{
    Connection, EventBus, Result, Service, ServiceConfig, ServiceCore, Watchdog, WatchdogConfig,
};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Relay service: supervised outbound link plus store-and-forward spool
///
/// Attributes read from the service configuration:
/// `remote.host`, `remote.port`, `connect.timeout`, `idle.interval`,
/// `nodata.interval` (watchdog tuning) and `spool.path`.
pub struct RelayService {
    core: ServiceCore,
    watchdog: Arc<Watchdog>,
    spool: Spool,
}

impl RelayService {
    /// Factory entry point, suitable for `ServiceRegistry::register_factory`
    pub fn create(bus: EventBus, config: ServiceConfig) -> Result<Arc<dyn Service>> {
        Ok(Self::with_config(bus, config))
    }

    /// Build a relay service from its configuration
    pub fn with_config(bus: EventBus, config: ServiceConfig) -> Arc<Self> {
        let watchdog_config = WatchdogConfig::from_attributes(&config);
        let spool_path =
            config.attr_str("spool.path", &format!("{}.spool", config.service_name));
        Arc::new(Self {
            core: ServiceCore::new(config, bus),
            watchdog: Watchdog::new(watchdog_config),
            spool: Spool::new(spool_path),
        })
    }

    /// The link supervisor
    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    /// The store-and-forward spool
    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// Whether the outbound link is currently up
    pub fn is_connected(&self) -> bool {
        self.watchdog.is_connected()
    }

    /// Send one record to the remote, spooling it if the link is down
    pub async fn send_line(&self, line: &str) -> Result<()> {
        match self.watchdog.current_connection() {
            Some(conn) if conn.is_active() => {
                if let Err(error) = conn.write_line(line).await {
                    debug!(service = %self.core.name(), %error, "send failed, record spooled");
                    self.spool.append(line).await?;
                } else {
                    self.core.note_sent();
                }
                Ok(())
            }
            _ => {
                debug!(service = %self.core.name(), "link down, record spooled");
                self.spool.append(line).await?;
                Ok(())
            }
        }
    }

    async fn replay_backlog(&self, conn: &Arc<Connection>) -> Result<()> {
        let mut backlog = self.spool.drain().await?.into_iter();
        let total = backlog.len();
        if total == 0 {
            return Ok(());
        }

        info!(service = %self.core.name(), total, "replaying spooled records");
        while let Some(line) = backlog.next() {
            if let Err(error) = conn.write_line(&line).await {
                // Keep what did not make it out
                self.spool.append(&line).await?;
                for rest in backlog {
                    self.spool.append(&rest).await?;
                }
                return Err(error);
            }
            self.core.note_sent();
        }
        Ok(())
    }
}

#[async_trait]
impl Service for RelayService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn serve(&self, conn: Arc<Connection>) -> Result<()> {
        self.replay_backlog(&conn).await?;

        while let Some(line) = conn.read_line().await? {
            conn.record_received();
            self.core.note_received();
            trace!(
                service = %self.core.name(),
                connection_id = %conn.id(),
                length = line.len(),
                "record received"
            );
        }
        Ok(())
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        self.core.mark_started()?;
        let owner: Arc<dyn Service> = self.clone();
        self.watchdog.clone().start(owner);
        Ok(())
    }
}
