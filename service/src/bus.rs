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

//! Internal event bus for control and logging traffic
//!
//! The bus is the indirection layer between services and the registry:
//! services never hold a direct reference to registry state. Control calls
//! travel as [`ControlRequest`]/[`ControlReply`] pairs through [`EventBus::request`];
//! logging travels as fire-and-forget [`Notice`] values through
//! [`EventBus::notify`]. The two channels are deliberately separate so a
//! caller that needs a failure gets one, and a caller that does not never
//! has to inspect a reply.
//!
//! Dispatch is synchronous and in subscription order. Every subscriber sees
//! every call; the first subscriber producing a reply supplies the call's
//! result. A subscriber's error is itself a legitimate first reply and does
//! not stop dispatch to the remaining subscribers.

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::service::Service;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Selector for running-state queries, by port or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSelector {
    /// Select the service bound to a port
    Port(u16),
    /// Select the service with a name
    Name(String),
}

/// Control requests carried over the bus
///
/// This is the closed vocabulary of everything a service may ask of the
/// registry. Each variant carries its typed payload; replies arrive as
/// [`ControlReply`].
#[derive(Clone)]
pub enum ControlRequest {
    /// Read the global connection budget
    GetMaximumConnections,
    /// Replace the global connection budget
    SetMaximumConnections(usize),
    /// Read the global active connection count
    GetServiceConnections,
    /// Count one connection against the global budget
    IncreaseServiceConnections,
    /// Release one connection from the global budget
    DecreaseServiceConnections,
    /// Look up a process-wide property
    GetProperty(String),
    /// Fetch the whole process-wide property map
    GetProperties,
    /// Fetch the configuration of the service on a port
    GetConfig(u16),
    /// Fetch the service registered on a port
    GetService(u16),
    /// Register a new service
    AddService(Arc<dyn Service>),
    /// Shut down and optionally delete the service on a port
    RemoveService {
        /// Port of the service to remove
        port: u16,
        /// Delete from the registry map, or keep addressable for restart
        delete: bool,
    },
    /// Start the service on a port
    StartService(u16),
    /// Start the named service if it is configured but stopped
    ValidateService(String),
    /// Query whether a service is running
    IsServiceRunning(ServiceSelector),
    /// Produce the registry's diagnostic text dump
    Describe,
}

impl fmt::Debug for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GetMaximumConnections => write!(f, "GetMaximumConnections"),
            Self::SetMaximumConnections(n) => write!(f, "SetMaximumConnections({n})"),
            Self::GetServiceConnections => write!(f, "GetServiceConnections"),
            Self::IncreaseServiceConnections => write!(f, "IncreaseServiceConnections"),
            Self::DecreaseServiceConnections => write!(f, "DecreaseServiceConnections"),
            Self::GetProperty(key) => write!(f, "GetProperty({key:?})"),
            Self::GetProperties => write!(f, "GetProperties"),
            Self::GetConfig(port) => write!(f, "GetConfig({port})"),
            Self::GetService(port) => write!(f, "GetService({port})"),
            Self::AddService(service) => write!(f, "AddService({:?})", service.name()),
            Self::RemoveService { port, delete } => {
                write!(f, "RemoveService {{ port: {port}, delete: {delete} }}")
            }
            Self::StartService(port) => write!(f, "StartService({port})"),
            Self::ValidateService(name) => write!(f, "ValidateService({name:?})"),
            Self::IsServiceRunning(selector) => write!(f, "IsServiceRunning({selector:?})"),
            Self::Describe => write!(f, "Describe"),
        }
    }
}

/// Replies to control requests
#[derive(Clone)]
pub enum ControlReply {
    /// A connection budget value
    Maximum(usize),
    /// A connection count
    Connections(usize),
    /// A property lookup result
    Property(Option<String>),
    /// The full property map
    Properties(HashMap<String, String>),
    /// A service configuration
    Config(Box<ServiceConfig>),
    /// A registered service
    Service(Arc<dyn Service>),
    /// A running-state answer
    Running(bool),
    /// A removal answer: whether the service existed
    Removed(bool),
    /// The request was carried out
    Accepted,
    /// The registry's diagnostic dump
    Description(String),
}

impl fmt::Debug for ControlReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maximum(n) => write!(f, "Maximum({n})"),
            Self::Connections(n) => write!(f, "Connections({n})"),
            Self::Property(value) => write!(f, "Property({value:?})"),
            Self::Properties(map) => write!(f, "Properties({} entries)", map.len()),
            Self::Config(config) => write!(f, "Config({:?})", config.service_name),
            Self::Service(service) => write!(f, "Service({:?})", service.name()),
            Self::Running(value) => write!(f, "Running({value})"),
            Self::Removed(value) => write!(f, "Removed({value})"),
            Self::Accepted => write!(f, "Accepted"),
            Self::Description(_) => write!(f, "Description(..)"),
        }
    }
}

/// Fire-and-forget leveled log notice
#[derive(Debug, Clone)]
pub enum Notice {
    /// Debug-level text
    Debug(String),
    /// Info-level text
    Info(String),
    /// Error-level text
    Error(String),
}

impl Notice {
    /// The notice's level name
    pub fn level(&self) -> &'static str {
        match self {
            Self::Debug(_) => "debug",
            Self::Info(_) => "info",
            Self::Error(_) => "error",
        }
    }

    /// The notice's message text
    pub fn message(&self) -> &str {
        match self {
            Self::Debug(text) | Self::Info(text) | Self::Error(text) => text,
        }
    }
}

/// Bus subscriber
///
/// The registry is the canonical subscriber; tests install lightweight ones.
/// `on_request` returns `None` when the subscriber does not handle the
/// request kind, `Some(result)` otherwise, including `Some(Err(_))`, which
/// is a legitimate reply the caller must check.
#[async_trait]
pub trait BusSubscriber: Send + Sync + 'static {
    /// Handle a control request, or decline it with `None`
    async fn on_request(
        &self,
        sender: &str,
        request: &ControlRequest,
    ) -> Option<Result<ControlReply>>;

    /// Observe a log notice
    async fn on_notice(&self, _sender: &str, _notice: &Notice) {}
}

/// Process-local publish/subscribe dispatcher
///
/// Cheap to clone; every clone shares the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn BusSubscriber>>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber; dispatch order is subscription order
    pub fn subscribe(&self, subscriber: Arc<dyn BusSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(subscriber);
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    // The list is cloned so the lock is never held across an await.
    fn subscriber_list(&self) -> Vec<Arc<dyn BusSubscriber>> {
        self.subscribers
            .read()
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default()
    }

    /// Dispatch a control request and return its reply
    ///
    /// Every subscriber sees the request; the first one to produce a reply
    /// supplies the result. With no repliers the call fails with
    /// [`ServiceError::Unhandled`].
    pub async fn request(&self, sender: &str, request: ControlRequest) -> Result<ControlReply> {
        let mut reply: Option<Result<ControlReply>> = None;
        for subscriber in self.subscriber_list() {
            let answer = subscriber.on_request(sender, &request).await;
            if reply.is_none() {
                reply = answer;
            }
        }
        reply.unwrap_or(Err(ServiceError::Unhandled))
    }

    /// Dispatch a fire-and-forget notice to every subscriber
    pub async fn notify(&self, sender: &str, notice: Notice) {
        for subscriber in self.subscriber_list() {
            subscriber.on_notice(sender, &notice).await;
        }
    }

    /// Emit a debug-level notice
    pub async fn log_debug(&self, sender: &str, message: impl Into<String>) {
        self.notify(sender, Notice::Debug(message.into())).await;
    }

    /// Emit an info-level notice
    pub async fn log_info(&self, sender: &str, message: impl Into<String>) {
        self.notify(sender, Notice::Info(message.into())).await;
    }

    /// Emit an error-level notice
    pub async fn log_error(&self, sender: &str, message: impl Into<String>) {
        self.notify(sender, Notice::Error(message.into())).await;
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
