//! Errors surfaced by the harness
use std::{error::Error as StdError, time::Duration};

use thiserror::Error;

use crate::{codec::CodecError, lifecycle::ServiceKind};

/// boxed error kept as the source of a harness failure
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Every harness operation fails with exactly one of these
#[derive(Debug, Error)]
pub enum HarnessError {
    /// a service of the session did not start or did not become ready
    #[error("{service} failed to start: {source}")]
    InfrastructureStartupFailed {
        /// which service
        service: ServiceKind,
        /// what went wrong
        #[source]
        source: BoxError,
    },

    /// there is no session, or its broker cannot be reached
    #[error("broker unavailable: {reason}")]
    BrokerUnavailable {
        /// what was missing
        reason: String,
        /// transport failure, if any
        #[source]
        source: Option<BoxError>,
    },

    /// nothing arrived on the topic in time
    #[error("no message on topic '{topic}' within {waited:?}")]
    ConsumeTimeout {
        /// topic that was read
        topic: String,
        /// how long the caller allowed
        waited: Duration,
    },

    /// the broker understood the request and refused it
    #[error("broker rejected request ({code:?}): {message}")]
    BrokerRejected {
        /// failure class reported by the broker
        code: broker::ErrorCode,
        /// detail from the broker
        message: String,
    },

    /// the payload could not be converted
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl HarnessError {
    pub(crate) fn no_session() -> Self {
        HarnessError::BrokerUnavailable {
            reason: "no active session".into(),
            source: None,
        }
    }

    pub(crate) fn startup(service: ServiceKind, source: impl Into<BoxError>) -> Self {
        HarnessError::InfrastructureStartupFailed {
            service,
            source: source.into(),
        }
    }

    /// Returns true for [`HarnessError::InfrastructureStartupFailed`]
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, HarnessError::InfrastructureStartupFailed { .. })
    }

    /// Returns true for [`HarnessError::BrokerUnavailable`]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, HarnessError::BrokerUnavailable { .. })
    }

    /// Returns true for [`HarnessError::ConsumeTimeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::ConsumeTimeout { .. })
    }
}

impl From<broker::ClientError> for HarnessError {
    fn from(err: broker::ClientError) -> Self {
        match err {
            broker::ClientError::Rejected { code, message } => {
                HarnessError::BrokerRejected { code, message }
            }
            err => HarnessError::BrokerUnavailable {
                reason: "broker did not answer".into(),
                source: Some(err.into()),
            },
        }
    }
}
