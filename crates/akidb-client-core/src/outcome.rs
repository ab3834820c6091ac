//! Per-object results of a batch operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ClientError, TransportError, TransportErrorKind};
use crate::ids::CorrelationToken;

/// Terminal status of one submitted object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    NotAttempted,
}

impl OutcomeStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::NotAttempted => "not_attempted",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an object failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The server rejected this object.
    Rejected {
        kind: TransportErrorKind,
        message: String,
    },
    /// The whole call failed with a permanent error.
    Transport { error: TransportError },
    /// Every allowed attempt failed with a transient error.
    RetriesExhausted {
        attempts: u32,
        last_error: TransportError,
    },
    /// The object cannot be expressed in the negotiated schema.
    SchemaIncompatible { detail: String },
    /// The server reply could not be decoded.
    Protocol { detail: String },
    /// The object was invalid before it reached the network.
    Validation { detail: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { kind, message } => write!(f, "rejected ({kind}): {message}"),
            Self::Transport { error } => write!(f, "transport: {error}"),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "retries exhausted after {attempts} attempts: {last_error}"),
            Self::SchemaIncompatible { detail } => write!(f, "schema incompatible: {detail}"),
            Self::Protocol { detail } => write!(f, "protocol: {detail}"),
            Self::Validation { detail } => write!(f, "validation: {detail}"),
        }
    }
}

impl From<ClientError> for FailureReason {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(error) => Self::Transport { error },
            ClientError::SchemaIncompatible { .. } => Self::SchemaIncompatible {
                detail: err.to_string(),
            },
            ClientError::Protocol(detail) => Self::Protocol { detail },
            ClientError::Validation(detail) => Self::Validation { detail },
            other => Self::Protocol {
                detail: other.to_string(),
            },
        }
    }
}

/// Final result for one submitted object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOutcome {
    pub token: CorrelationToken,
    pub id: Uuid,
    pub status: OutcomeStatus,
    /// Set only when `status` is `Failed`.
    pub error: Option<FailureReason>,
    /// Dispatch attempts that carried this object.
    pub attempts: u32,
}

impl ObjectOutcome {
    #[must_use]
    pub fn succeeded(token: CorrelationToken, id: Uuid, attempts: u32) -> Self {
        Self {
            token,
            id,
            status: OutcomeStatus::Succeeded,
            error: None,
            attempts,
        }
    }

    #[must_use]
    pub fn failed(token: CorrelationToken, id: Uuid, reason: FailureReason, attempts: u32) -> Self {
        Self {
            token,
            id,
            status: OutcomeStatus::Failed,
            error: Some(reason),
            attempts,
        }
    }

    #[must_use]
    pub fn not_attempted(token: CorrelationToken, id: Uuid, attempts: u32) -> Self {
        Self {
            token,
            id,
            status: OutcomeStatus::NotAttempted,
            error: None,
            attempts,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Succeeded
    }
}

/// Counts of outcomes by status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

impl OutcomeSummary {
    #[must_use]
    pub fn from_outcomes(outcomes: &[ObjectOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut summary, outcome| {
            match outcome.status {
                OutcomeStatus::Succeeded => summary.succeeded += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::NotAttempted => summary.not_attempted += 1,
            }
            summary
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.not_attempted
    }
}
