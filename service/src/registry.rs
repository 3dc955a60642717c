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

//! Process-wide service registry
//!
//! The registry owns every service instance, keyed by port, and is the
//! factory that constructs them from configuration. It subscribes to the
//! event bus and answers every control request, so services reach registry
//! state (connection budget, property lookups, logging) without holding a
//! reference to the registry itself. Direct calls run only in the other
//! direction: registry → service (start, shutdown, add, remove).
//!
//! All registry state sits behind one lock, and the duplicate-port /
//! duplicate-name check is in the same critical section as the insertion,
//! so two racing registrations cannot both pass the check.

use crate::bus::{BusSubscriber, ControlReply, ControlRequest, EventBus, Notice, ServiceSelector};
use crate::config::{RegistryConfig, ServiceConfig, StartupType};
use crate::error::{Result, ServiceError};
use crate::service::Service;
use crate::types::RegistrySnapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Factory constructing a service from its configuration
///
/// The factory table is the explicit replacement for runtime type
/// discovery: every implementation identifier is mapped to one of these at
/// process start.
pub type ServiceFactory = Arc<dyn Fn(EventBus, ServiceConfig) -> Result<Arc<dyn Service>> + Send + Sync>;

/// State guarded by the registry's one lock
struct RegistryState {
    services: HashMap<u16, Arc<dyn Service>>,
    names: HashMap<String, u16>,
    factories: HashMap<String, ServiceFactory>,
    maximum_connections: usize,
    service_connections: usize,
}

/// Process-wide owner of all service instances, keyed by port
pub struct ServiceRegistry {
    config: RegistryConfig,
    bus: EventBus,
    state: Mutex<RegistryState>,
}

impl ServiceRegistry {
    /// Create a registry and subscribe it to a fresh bus
    pub fn new(config: RegistryConfig) -> Arc<Self> {
        let bus = EventBus::new();
        let registry = Arc::new(Self {
            state: Mutex::new(RegistryState {
                services: HashMap::new(),
                names: HashMap::new(),
                factories: HashMap::new(),
                maximum_connections: config.maximum_connections,
                service_connections: 0,
            }),
            bus: bus.clone(),
            config,
        });
        bus.subscribe(registry.clone());
        registry
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The bus this registry answers on
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The registry's configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Map an implementation identifier to a factory
    pub fn register_factory<F>(&self, service_impl: impl Into<String>, factory: F)
    where
        F: Fn(EventBus, ServiceConfig) -> Result<Arc<dyn Service>> + Send + Sync + 'static,
    {
        self.state()
            .factories
            .insert(service_impl.into(), Arc::new(factory));
    }

    /// Construct a service through the factory table
    fn construct(&self, config: &ServiceConfig) -> Result<Arc<dyn Service>> {
        let factory = self
            .state()
            .factories
            .get(&config.service_impl)
            .cloned()
            .ok_or_else(|| ServiceError::UnknownImplementation(config.service_impl.clone()))?;
        factory(self.bus.clone(), config.clone())
    }

    /// Register a service
    ///
    /// A port or name collision is logged and rejected without mutating the
    /// map. Services with an eager startup policy (AUTOMATIC, SYSTEM) are
    /// started before this returns; a start failure propagates to the
    /// caller with the service left registered but stopped.
    pub async fn add_service(&self, service: Arc<dyn Service>) -> Result<()> {
        let name = service.name().to_string();
        let port = service.port();

        {
            let mut state = self.state();
            if state.services.contains_key(&port) {
                warn!(port, service = %name, "duplicate port, service not registered");
                return Err(ServiceError::DuplicatePort(port));
            }
            if state.names.contains_key(&name) {
                warn!(port, service = %name, "duplicate name, service not registered");
                return Err(ServiceError::DuplicateName(name));
            }
            state.services.insert(port, service.clone());
            state.names.insert(name.clone(), port);
        }

        self.bus
            .log_info("registry", format!("service {name:?} registered on port {port}"))
            .await;

        if service.config().startup_type.is_eager() {
            if let Err(start_error) = self
                .bus
                .request("registry", ControlRequest::StartService(port))
                .await
            {
                error!(
                    port,
                    service = %name,
                    error = %start_error,
                    "service failed to start on registration"
                );
                return Err(start_error);
            }
        }

        Ok(())
    }

    /// Shut down and optionally delete the service on a port
    ///
    /// Returns false when no service is bound to the port. Shutdown is
    /// always signalled first; with `delete = false` the stopped service
    /// stays addressable for a later restart.
    pub async fn remove_service(&self, port: u16, delete: bool) -> bool {
        let service = self.state().services.get(&port).cloned();
        let Some(service) = service else {
            warn!(port, "remove requested for unknown port");
            return false;
        };

        if let Err(shutdown_error) = service.shutdown().await {
            self.bus
                .log_error(
                    "registry",
                    format!(
                        "service {:?} failed to shut down cleanly: {shutdown_error}",
                        service.name()
                    ),
                )
                .await;
        }

        if delete {
            let mut state = self.state();
            state.services.remove(&port);
            state.names.remove(service.name());
            info!(port, service = %service.name(), "service deleted");
        } else {
            info!(port, service = %service.name(), "service stopped, kept registered");
        }
        true
    }

    /// Start the service on a port
    ///
    /// Idempotent: starting a running service is a no-op success.
    pub async fn start_service(&self, port: u16) -> Result<()> {
        let service = self
            .state()
            .services
            .get(&port)
            .cloned()
            .ok_or(ServiceError::ServiceNotFound(port))?;

        if service.is_running() {
            return Ok(());
        }
        service.start().await
    }

    /// Two-phase bring-up from a list of top-level configurations
    ///
    /// Phase 1 constructs and registers every non-disabled configuration in
    /// order; eager services start as they are added. Phase 2 starts the
    /// DelayedStart services. A failure in any one service is logged, the
    /// partial registration is torn down, and bring-up continues: one bad
    /// configuration must not take the rest down with it.
    ///
    /// Returns the number of services registered.
    pub async fn initialize_services(&self, configs: &[ServiceConfig]) -> usize {
        let mut registered = 0;
        let mut delayed: Vec<u16> = Vec::new();

        for config in configs {
            if config.startup_type == StartupType::Disabled {
                debug!(service = %config.service_name, "disabled, skipping");
                continue;
            }
            let port = config.connection_port;

            let service = match self.construct(config) {
                Ok(service) => service,
                Err(construct_error) => {
                    self.bus
                        .log_error(
                            "registry",
                            format!(
                                "failed to construct service {:?}: {construct_error}",
                                config.service_name
                            ),
                        )
                        .await;
                    continue;
                }
            };

            match self.add_service(service).await {
                Ok(()) => {
                    registered += 1;
                    if config.startup_type == StartupType::DelayedStart {
                        delayed.push(port);
                    }
                }
                Err(add_error) if add_error.is_collision() => {
                    // Nothing was inserted; the colliding service stays
                    self.bus
                        .log_error(
                            "registry",
                            format!(
                                "service {:?} collides with an existing registration: {add_error}",
                                config.service_name
                            ),
                        )
                        .await;
                }
                Err(start_error) => {
                    // Registered but failed to start: tear the partial down
                    self.bus
                        .log_error(
                            "registry",
                            format!(
                                "service {:?} failed to start during bring-up: {start_error}",
                                config.service_name
                            ),
                        )
                        .await;
                    self.remove_service(port, true).await;
                }
            }
        }

        for port in delayed {
            if let Err(start_error) = self.start_service(port).await {
                self.bus
                    .log_error(
                        "registry",
                        format!("delayed start failed on port {port}: {start_error}"),
                    )
                    .await;
            }
        }

        info!(registered, "service bring-up complete");
        registered
    }

    /// Start the named service if it is configured but stopped
    ///
    /// The self-heal hook for an external heartbeat caller. Unknown names
    /// fail; a running service is a no-op success.
    pub async fn validate_service(&self, name: &str) -> Result<()> {
        let port = self
            .state()
            .names
            .get(name)
            .copied()
            .ok_or_else(|| ServiceError::NotConfigured(name.to_string()))?;
        self.start_service(port).await
    }

    /// Signal shutdown to every running service
    ///
    /// A process-level stop: nothing is removed from the registry.
    pub async fn shutdown_services(&self) {
        let running: Vec<Arc<dyn Service>> = self
            .state()
            .services
            .values()
            .filter(|service| service.is_running())
            .cloned()
            .collect();

        let count = running.len();
        let results =
            futures_util::future::join_all(running.iter().map(|service| service.shutdown())).await;
        for (service, result) in running.iter().zip(results) {
            if let Err(shutdown_error) = result {
                error!(
                    service = %service.name(),
                    error = %shutdown_error,
                    "service failed to shut down cleanly"
                );
            }
        }
        info!(count, "all running services signalled to shut down");
    }

    /// Fetch the service registered on a port
    pub fn get_service(&self, port: u16) -> Option<Arc<dyn Service>> {
        self.state().services.get(&port).cloned()
    }

    /// Fetch the service registered under a name
    pub fn get_service_by_name(&self, name: &str) -> Option<Arc<dyn Service>> {
        let state = self.state();
        let port = state.names.get(name)?;
        state.services.get(port).cloned()
    }

    /// Whether the service on a port is running
    pub fn is_running(&self, port: u16) -> bool {
        self.get_service(port)
            .map(|service| service.is_running())
            .unwrap_or(false)
    }

    /// Whether the named service is running
    pub fn is_running_name(&self, name: &str) -> bool {
        self.get_service_by_name(name)
            .map(|service| service.is_running())
            .unwrap_or(false)
    }

    /// The global connection budget
    pub fn maximum_connections(&self) -> usize {
        self.state().maximum_connections
    }

    /// Replace the global connection budget
    pub fn set_maximum_connections(&self, maximum: usize) {
        self.state().maximum_connections = maximum;
    }

    /// The global active connection count
    pub fn service_connections(&self) -> usize {
        self.state().service_connections
    }

    fn increase_service_connections(&self) -> usize {
        let mut state = self.state();
        state.service_connections += 1;
        state.service_connections
    }

    fn decrease_service_connections(&self) -> usize {
        let mut state = self.state();
        state.service_connections = state.service_connections.saturating_sub(1);
        state.service_connections
    }

    /// Diagnostic view of every registered service
    pub fn snapshot(&self) -> RegistrySnapshot {
        let (maximum_connections, service_connections, services) = {
            let state = self.state();
            let mut services: Vec<_> = state.services.values().cloned().collect();
            services.sort_by_key(|service| service.port());
            (
                state.maximum_connections,
                state.service_connections,
                services,
            )
        };
        RegistrySnapshot {
            maximum_connections,
            service_connections,
            services: services.iter().map(|service| service.snapshot()).collect(),
        }
    }
}

impl fmt::Display for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ServiceRegistry")
            .field("services", &state.services.len())
            .field("service_connections", &state.service_connections)
            .field("maximum_connections", &state.maximum_connections)
            .finish()
    }
}

#[async_trait]
impl BusSubscriber for ServiceRegistry {
    async fn on_request(
        &self,
        sender: &str,
        request: &ControlRequest,
    ) -> Option<Result<ControlReply>> {
        Some(match request {
            ControlRequest::GetMaximumConnections => {
                Ok(ControlReply::Maximum(self.maximum_connections()))
            }
            ControlRequest::SetMaximumConnections(maximum) => {
                self.set_maximum_connections(*maximum);
                info!(sender, maximum, "global connection budget updated");
                Ok(ControlReply::Accepted)
            }
            ControlRequest::GetServiceConnections => {
                Ok(ControlReply::Connections(self.service_connections()))
            }
            ControlRequest::IncreaseServiceConnections => {
                Ok(ControlReply::Connections(self.increase_service_connections()))
            }
            ControlRequest::DecreaseServiceConnections => {
                Ok(ControlReply::Connections(self.decrease_service_connections()))
            }
            ControlRequest::GetProperty(key) => Ok(ControlReply::Property(
                self.config.get_property(key).map(String::from),
            )),
            ControlRequest::GetProperties => {
                Ok(ControlReply::Properties(self.config.properties.clone()))
            }
            ControlRequest::GetConfig(port) => match self.get_service(*port) {
                Some(service) => Ok(ControlReply::Config(Box::new(service.config().clone()))),
                None => Err(ServiceError::ServiceNotFound(*port)),
            },
            ControlRequest::GetService(port) => match self.get_service(*port) {
                Some(service) => Ok(ControlReply::Service(service)),
                None => Err(ServiceError::ServiceNotFound(*port)),
            },
            ControlRequest::AddService(service) => self
                .add_service(service.clone())
                .await
                .map(|_| ControlReply::Accepted),
            ControlRequest::RemoveService { port, delete } => {
                Ok(ControlReply::Removed(self.remove_service(*port, *delete).await))
            }
            ControlRequest::StartService(port) => self
                .start_service(*port)
                .await
                .map(|_| ControlReply::Accepted),
            ControlRequest::ValidateService(name) => self
                .validate_service(name)
                .await
                .map(|_| ControlReply::Accepted),
            ControlRequest::IsServiceRunning(selector) => Ok(ControlReply::Running(match selector {
                ServiceSelector::Port(port) => self.is_running(*port),
                ServiceSelector::Name(name) => self.is_running_name(name),
            })),
            ControlRequest::Describe => Ok(ControlReply::Description(self.to_string())),
        })
    }

    async fn on_notice(&self, sender: &str, notice: &Notice) {
        match notice {
            Notice::Debug(message) => debug!(service = sender, "{message}"),
            Notice::Info(message) => info!(service = sender, "{message}"),
            Notice::Error(message) => error!(service = sender, "{message}"),
        }
    }
}
