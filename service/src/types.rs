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

//! Core types for the service host

use crate::config::ServiceKind;
use std::fmt;
use std::time::SystemTime;

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state (stored as atomic u8 for lock-free state management)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Connection has been created but its task has not run yet
    Created = 0,
    /// Connection task is executing the serving logic
    Active = 1,
    /// Connection task has finished (normally or with an error)
    Done = 2,
}

impl ConnectionState {
    /// Convert from u8 (for atomic operations)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Active,
            _ => Self::Done,
        }
    }

    /// Convert to u8 (for atomic operations)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if the connection has reached its terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Point-in-time view of one service's counters and state
///
/// Snapshots are produced without holding the service lock across any await
/// and are the building block of the registry's diagnostic dump.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    /// Service name
    pub name: String,
    /// Bound or remote port
    pub port: u16,
    /// Server or client role
    pub kind: ServiceKind,
    /// Whether the service is currently running
    pub running: bool,
    /// Number of live connections
    pub active_connections: usize,
    /// Total connections accepted or opened since creation
    pub total_connections: u64,
    /// Total messages sent across all connections
    pub messages_sent: u64,
    /// Total messages received across all connections
    pub messages_received: u64,
    /// Total connections that ended with a serving error
    pub messages_errored: u64,
    /// Last time the service did anything
    pub last_action: Option<SystemTime>,
    /// Last time the service received data
    pub last_receive: Option<SystemTime>,
    /// Last time the service sent data
    pub last_send: Option<SystemTime>,
}

impl fmt::Display for ServiceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [port {}] {} {}: active={}, total={}, sent={}, received={}, errored={}",
            self.name,
            self.port,
            self.kind,
            if self.running { "running" } else { "stopped" },
            self.active_connections,
            self.total_connections,
            self.messages_sent,
            self.messages_received,
            self.messages_errored,
        )
    }
}

/// Diagnostic view of the whole registry
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    /// Global connection budget
    pub maximum_connections: usize,
    /// Global active connection count
    pub service_connections: usize,
    /// One snapshot per registered service, ordered by port
    pub services: Vec<ServiceSnapshot>,
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ServiceRegistry: {} services, {}/{} connections",
            self.services.len(),
            self.service_connections,
            self.maximum_connections,
        )?;
        for snapshot in &self.services {
            writeln!(f, "  {snapshot}")?;
        }
        Ok(())
    }
}
