//! Hub Error Types
//!
//! Every registry and dispatcher operation returns its failures as a
//! [`HubError`] value. Nothing in the core panics across a component boundary,
//! and heartbeat-driven eviction is never reported here; it only shows up as a
//! later [`HubError::NotFound`] and in the logs.

use thiserror::Error;

/// Errors returned by the registry, dispatcher and configuration layers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// A required identifier was missing or empty
    #[error("{field} is required")]
    Validation {
        /// Name of the offending field (e.g. `client_id`)
        field: &'static str,
    },

    /// An operation referenced an unknown client, device or unique id
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up
        kind: NotFoundKind,
        /// The identifier that could not be resolved
        id: String,
    },

    /// A targeted dispatch reached zero devices
    #[error("failed to send notification to any device of client {client_id} ({attempted} attempted)")]
    Delivery {
        /// Target client
        client_id: String,
        /// Number of devices the dispatch considered
        attempted: usize,
    },

    /// Collaborator-level configuration problem (e.g. missing shared secret)
    ///
    /// Displays the message alone, since it is shown to HTTP callers verbatim.
    #[error("{0}")]
    Configuration(String),
}

/// The kind of entity a [`HubError::NotFound`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No client group for this client id
    Client,
    /// No device with this `(client_id, device_id)` pair
    Device,
    /// No device resolves from this unique id
    UniqueId,
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Device => write!(f, "device"),
            Self::UniqueId => write!(f, "connection"),
        }
    }
}

impl HubError {
    /// Shorthand for a missing required field
    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::Validation { field }
    }

    /// Shorthand for an unknown entity
    #[must_use]
    pub fn not_found(kind: NotFoundKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error means the referenced entity does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias used throughout the core
pub type HubResult<T> = Result<T, HubError>;
