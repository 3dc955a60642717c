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

//! Error types for the service host

use crate::types::ConnectionId;
use thiserror::Error;

/// Result type for service host operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service host error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// I/O error from the underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Line transport error from the codec layer
    #[error("Line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// A service is already registered on this port
    #[error("Port {0} is already registered")]
    DuplicatePort(u16),

    /// A service with this name is already registered
    #[error("Service name {0:?} is already registered")]
    DuplicateName(String),

    /// No service is registered on the given port
    #[error("No service registered on port {0}")]
    ServiceNotFound(u16),

    /// No service with the given name exists in the configuration
    #[error("Service {0:?} is not configured")]
    NotConfigured(String),

    /// No factory is registered for the implementation identifier
    #[error("No implementation registered for {0:?}")]
    UnknownImplementation(String),

    /// The service is already running
    #[error("Service {0:?} is already running")]
    AlreadyRunning(String),

    /// The service is not running
    #[error("Service {0:?} is not running")]
    NotRunning(String),

    /// Connection with the given ID was not found
    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Maximum number of connections reached
    #[error("Connection limit ({0}) reached")]
    ConnectionLimit(usize),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// No bus subscriber produced a reply for a control request
    #[error("No subscriber handled the request")]
    Unhandled,

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl ServiceError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors are those that don't indicate a fatal condition
    /// and where retrying the operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout
                | ServiceError::ConnectionClosed
                | ServiceError::ConnectionLimit(_)
                | ServiceError::Io(_)
        )
    }

    /// Check if the error is a registration collision (duplicate port or name)
    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            ServiceError::DuplicatePort(_) | ServiceError::DuplicateName(_)
        )
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ServiceError::ConnectionNotFound(_)
                | ServiceError::ConnectionClosed
                | ServiceError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_recoverable() {
        assert!(ServiceError::Timeout.is_recoverable());
        assert!(ServiceError::ConnectionClosed.is_recoverable());
        assert!(ServiceError::ConnectionLimit(10).is_recoverable());
        assert!(!ServiceError::DuplicatePort(7001).is_recoverable());
        assert!(!ServiceError::NotConfigured("relay".into()).is_recoverable());
    }

    #[test]
    fn test_error_is_collision() {
        assert!(ServiceError::DuplicatePort(7001).is_collision());
        assert!(ServiceError::DuplicateName("echo".into()).is_collision());
        assert!(!ServiceError::ServiceNotFound(7001).is_collision());
    }

    #[test]
    fn test_error_display() {
        let err = ServiceError::ConnectionNotFound(ConnectionId::new(42));
        assert_eq!(err.to_string(), "Connection conn-42 not found");

        let err = ServiceError::DuplicatePort(7001);
        assert_eq!(err.to_string(), "Port 7001 is already registered");

        let err = ServiceError::ConnectionLimit(100);
        assert_eq!(err.to_string(), "Connection limit (100) reached");
    }
}
