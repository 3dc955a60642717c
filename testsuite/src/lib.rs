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

//! Shared fixtures for the Portway integration tests

use async_trait::async_trait;
use portway_service::{
    Connection, EventBus, Result, Service, ServiceConfig, ServiceCore,
};
use std::sync::Arc;
use std::time::Duration;

/// Line-oriented echo service, the canonical SERVER-role fixture
pub struct LineEchoService {
    core: ServiceCore,
}

impl LineEchoService {
    /// Factory entry point for `ServiceRegistry::register_factory`
    pub fn create(bus: EventBus, config: ServiceConfig) -> Result<Arc<dyn Service>> {
        Ok(Arc::new(Self {
            core: ServiceCore::new(config, bus),
        }))
    }
}

#[async_trait]
impl Service for LineEchoService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn serve(&self, conn: Arc<Connection>) -> Result<()> {
        while let Some(line) = conn.read_line().await? {
            conn.record_received();
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

/// Poll a condition until it holds or the deadline passes
pub async fn wait_until<F>(deadline: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let started = tokio::time::Instant::now();
    while started.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
