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

//! Service and registry configuration types and builders
//!
//! Configuration is built once during process bring-up and handed by value
//! into service constructors; nothing in here is reloaded at runtime. Bad or
//! missing attribute values fall back to documented defaults with a logged
//! warning, never an error.
//!
//! # Examples
//!
//! ```
//! use portway_service::{ServiceConfig, ServiceKind, StartupType};
//!
//! let config = ServiceConfig::new("relay", 7010, "relay")
//!     .with_kind(ServiceKind::Client)
//!     .with_startup_type(StartupType::DelayedStart)
//!     .with_maximum_connections(1)
//!     .with_attribute("remote.host", "10.1.2.3")
//!     .with_attribute("remote.port", "4001");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Default per-service connection limit
pub const DEFAULT_MAXIMUM_CONNECTIONS: usize = 10;

/// Default registry-wide connection budget
pub const DEFAULT_GLOBAL_CONNECTIONS: usize = 1000;

/// Default listener accept timeout (bounds the accept loop's wake interval)
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Policy governing when (and if) a service is started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupType {
    /// Never constructed or started
    Disabled,
    /// Constructed and registered, started only on explicit request
    Manual,
    /// Started as soon as it is registered
    Automatic,
    /// Started in the second bring-up phase, after all automatic services
    DelayedStart,
    /// Infrastructure service, started like Automatic
    System,
}

impl StartupType {
    /// Whether registration should immediately trigger a start
    pub fn is_eager(self) -> bool {
        matches!(self, Self::Automatic | Self::System)
    }

    /// Parse a startup type from its configuration spelling
    ///
    /// Unknown spellings yield `None`; callers fall back to a default and
    /// log a warning.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "manual" => Some(Self::Manual),
            "automatic" => Some(Self::Automatic),
            "delayedstart" => Some(Self::DelayedStart),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for StartupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Manual => write!(f, "manual"),
            Self::Automatic => write!(f, "automatic"),
            Self::DelayedStart => write!(f, "delayedstart"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Role of a service: listening or outbound-connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Listens on a TCP port and serves accepted clients
    Server,
    /// Opens and supervises outbound connections to remote equipment
    Client,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Immutable-after-load description of one service
///
/// The port is the service's unique key within the registry; the name must
/// also be unique across the registry. Child-service configurations
/// (subscribers/publishers) are carried along but never started at the top
/// level.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Unique service name
    pub service_name: String,

    /// Unique listening (server) or remote (client) port
    pub connection_port: u16,

    /// Implementation identifier, resolved through the registry's factory table
    pub service_impl: String,

    /// Startup policy
    pub startup_type: StartupType,

    /// Server or client role
    pub service_kind: ServiceKind,

    /// Exempt this service from per-service and global connection limits
    pub ignore_connection_limit: bool,

    /// Per-service connection limit
    pub maximum_connections: usize,

    /// Free-form string attributes; read through the typed `attr_*` getters
    pub attributes: HashMap<String, String>,

    /// Nested child services in the subscriber role
    pub subscribers: Vec<ServiceConfig>,

    /// Nested child services in the publisher role
    pub publishers: Vec<ServiceConfig>,
}

impl ServiceConfig {
    /// Create a configuration with the given name, port, and implementation tag
    pub fn new(name: impl Into<String>, port: u16, service_impl: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            connection_port: port,
            service_impl: service_impl.into(),
            startup_type: StartupType::Automatic,
            service_kind: ServiceKind::Server,
            ignore_connection_limit: false,
            maximum_connections: DEFAULT_MAXIMUM_CONNECTIONS,
            attributes: HashMap::new(),
            subscribers: Vec::new(),
            publishers: Vec::new(),
        }
    }

    /// Set the startup policy
    pub fn with_startup_type(mut self, startup_type: StartupType) -> Self {
        self.startup_type = startup_type;
        self
    }

    /// Set the service role
    pub fn with_kind(mut self, kind: ServiceKind) -> Self {
        self.service_kind = kind;
        self
    }

    /// Exempt the service from connection limits
    pub fn with_ignore_connection_limit(mut self, ignore: bool) -> Self {
        self.ignore_connection_limit = ignore;
        self
    }

    /// Set the per-service connection limit
    pub fn with_maximum_connections(mut self, maximum: usize) -> Self {
        self.maximum_connections = maximum;
        self
    }

    /// Add a free-form attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add a nested subscriber-role child configuration
    pub fn with_subscriber(mut self, child: ServiceConfig) -> Self {
        self.subscribers.push(child);
        self
    }

    /// Add a nested publisher-role child configuration
    pub fn with_publisher(mut self, child: ServiceConfig) -> Self {
        self.publishers.push(child);
        self
    }

    /// Get a string attribute, falling back to `default` when absent
    pub fn attr_str(&self, key: &str, default: &str) -> String {
        self.attributes
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Get an integer attribute
    ///
    /// A missing key yields the default silently; an unparseable value yields
    /// the default with a warning.
    pub fn attr_u64(&self, key: &str, default: u64) -> u64 {
        match self.attributes.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    service = %self.service_name,
                    key,
                    value = %raw,
                    "attribute is not a valid integer, using default {default}"
                );
                default
            }),
        }
    }

    /// Get a duration attribute expressed in whole seconds
    pub fn attr_duration(&self, key: &str, default: Duration) -> Duration {
        match self.attributes.get(key) {
            None => default,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    warn!(
                        service = %self.service_name,
                        key,
                        value = %raw,
                        "attribute is not a valid duration in seconds, using default {default:?}"
                    );
                    default
                }
            },
        }
    }
}

/// Process-wide registry configuration
///
/// Holds the global connection budget and the shared property map consulted
/// by services over the bus (connection terminator, shutdown sentinel, and
/// similar tunables).
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Global soft cap on simultaneous connections across all services
    pub maximum_connections: usize,

    /// Accept timeout used by every service listener
    pub accept_timeout: Duration,

    /// Process-wide shared properties
    pub properties: HashMap<String, String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            maximum_connections: DEFAULT_GLOBAL_CONNECTIONS,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            properties: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the global connection budget
    pub fn with_maximum_connections(mut self, maximum: usize) -> Self {
        self.maximum_connections = maximum;
        self
    }

    /// Set the listener accept timeout
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Add a process-wide property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a process-wide property
    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_defaults() {
        let config = ServiceConfig::new("echo", 7001, "echo");
        assert_eq!(config.service_name, "echo");
        assert_eq!(config.connection_port, 7001);
        assert_eq!(config.startup_type, StartupType::Automatic);
        assert_eq!(config.service_kind, ServiceKind::Server);
        assert!(!config.ignore_connection_limit);
        assert_eq!(config.maximum_connections, DEFAULT_MAXIMUM_CONNECTIONS);
    }

    #[test]
    fn test_service_config_builder() {
        let child = ServiceConfig::new("relay-out", 7011, "relay");
        let config = ServiceConfig::new("relay", 7010, "relay")
            .with_kind(ServiceKind::Client)
            .with_startup_type(StartupType::DelayedStart)
            .with_ignore_connection_limit(true)
            .with_maximum_connections(1)
            .with_attribute("remote.host", "10.1.2.3")
            .with_subscriber(child);

        assert_eq!(config.service_kind, ServiceKind::Client);
        assert_eq!(config.startup_type, StartupType::DelayedStart);
        assert!(config.ignore_connection_limit);
        assert_eq!(config.maximum_connections, 1);
        assert_eq!(config.attr_str("remote.host", "localhost"), "10.1.2.3");
        assert_eq!(config.subscribers.len(), 1);
    }

    #[test]
    fn test_attr_fallbacks() {
        let config = ServiceConfig::new("echo", 7001, "echo")
            .with_attribute("count", "12")
            .with_attribute("bogus", "not-a-number");

        assert_eq!(config.attr_u64("count", 1), 12);
        assert_eq!(config.attr_u64("missing", 7), 7);
        assert_eq!(config.attr_u64("bogus", 7), 7);
        assert_eq!(
            config.attr_duration("missing", Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.attr_duration("count", Duration::from_secs(30)),
            Duration::from_secs(12)
        );
    }

    #[test]
    fn test_startup_type_parse() {
        assert_eq!(StartupType::parse("AUTOMATIC"), Some(StartupType::Automatic));
        assert_eq!(
            StartupType::parse("delayedstart"),
            Some(StartupType::DelayedStart)
        );
        assert_eq!(StartupType::parse("nonsense"), None);
        assert!(StartupType::System.is_eager());
        assert!(!StartupType::Manual.is_eager());
    }

    #[test]
    fn test_registry_config_properties() {
        let config = RegistryConfig::new()
            .with_maximum_connections(50)
            .with_property("line.terminator", ".");

        assert_eq!(config.maximum_connections, 50);
        assert_eq!(config.get_property("line.terminator"), Some("."));
        assert_eq!(config.get_property("missing"), None);
    }
}
