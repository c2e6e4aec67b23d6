use std::error::Error as StdError;

use thiserror::Error;

use crate::Variable;

/// Errors raised while recording or replaying a tape.
///
/// None of these are recovered locally: every one surfaces to the caller as a
/// hard failure, and the message identifies the offending variable or
/// equation index where one exists.
#[derive(Debug, Error)]
pub enum Error {
    /// The host passed a solve the tape cannot classify, or referenced an
    /// operator that was not produced through the tracked assembly path.
    #[error("invalid inputs: {0}")]
    InvalidInputs(String),

    /// A callback needed by a reverse-mode or tangent-linear operation was
    /// not supplied by the host.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A value needed during replay is neither stored nor recomputable under
    /// the configured checkpoint strategy.
    #[error("no stored or recomputable value for {variable} (needed by equation {index})")]
    StorageMissing { variable: Variable, index: usize },

    /// The tape's bookkeeping does not add up.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// A host callback failed.
    #[error("host callback failed: {0}")]
    Host(#[source] Box<dyn StdError + Send + Sync>),

    /// Reading, writing, or decoding a checkpoint artifact failed.
    #[error("checkpoint storage failed for `{artifact}`: {source}")]
    Storage {
        artifact: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    pub fn invalid_inputs(message: impl Into<String>) -> Self {
        Self::InvalidInputs(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented(message.into())
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation(message.into())
    }

    pub fn host<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Host(Box::new(err))
    }

    pub fn storage<E: StdError + Send + Sync + 'static>(artifact: impl Into<String>, err: E) -> Self {
        Self::Storage {
            artifact: artifact.into(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_missing_names_variable_and_index() {
        let err = Error::StorageMissing {
            variable: Variable::forward("u", 3, 0),
            index: 7,
        };
        let message = err.to_string();

        assert!(message.contains("u:3:0:Forward"));
        assert!(message.contains("equation 7"));
    }

    #[test]
    fn host_errors_keep_their_source() {
        let err = Error::host(std::fmt::Error);
        assert!(StdError::source(&err).is_some());
    }
}
