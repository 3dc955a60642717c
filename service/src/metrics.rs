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

//! Lock-free per-service metrics
//!
//! Every counter here is monotonic; the live connection count is derived
//! from the service's connection set, not tracked here, so the two can
//! never drift apart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free service metrics
///
/// All metrics are stored as atomics and can be accessed concurrently
/// without locks. Use the `snapshot()` method to get a consistent view
/// of all metrics at a point in time.
#[derive(Debug)]
pub struct ServiceMetrics {
    // Connections
    total_connections: AtomicU64,
    connection_errors: AtomicU64,

    // Traffic
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_errored: AtomicU64,

    // Service start time
    started_at: Instant,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_errored: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a new connection being opened
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed or rejected connection attempt
    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message sent
    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message received
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a serving error
    pub fn message_errored(&self) {
        self.messages_errored.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of connections since service creation
    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Get the number of failed or rejected connection attempts
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    /// Get the total number of messages sent
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Get the total number of messages received
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Get the total number of serving errors
    pub fn messages_errored(&self) -> u64 {
        self.messages_errored.load(Ordering::Relaxed)
    }

    /// Get a consistent point-in-time view of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections(),
            connection_errors: self.connection_errors(),
            messages_sent: self.messages_sent(),
            messages_received: self.messages_received(),
            messages_errored: self.messages_errored(),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// Point-in-time view of a service's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Total connections since creation
    pub total_connections: u64,
    /// Failed or rejected connection attempts
    pub connection_errors: u64,
    /// Messages sent
    pub messages_sent: u64,
    /// Messages received
    pub messages_received: u64,
    /// Serving errors
    pub messages_errored: u64,
    /// Time since metrics creation
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counters() {
        let metrics = ServiceMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.message_sent();
        metrics.message_received();
        metrics.message_received();
        metrics.message_errored();
        metrics.connection_error();

        assert_eq!(metrics.total_connections(), 2);
        assert_eq!(metrics.messages_sent(), 1);
        assert_eq!(metrics.messages_received(), 2);
        assert_eq!(metrics.messages_errored(), 1);
        assert_eq!(metrics.connection_errors(), 1);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ServiceMetrics::new();
        metrics.connection_opened();
        metrics.message_sent();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 1);
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.messages_received, 0);
    }
}
