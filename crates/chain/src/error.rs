//! Errors raised by ledger, oracle and signer collaborators.

use std::future::Future;
use std::time::Duration;

/// Failure of an external call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The call did not complete before its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Network or RPC transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested entity does not exist on the ledger.
    #[error("not found: {0}")]
    NotFound(String),

    /// The ledger refused the transaction.
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// The transaction was already processed under this signature.
    #[error("transaction {signature} already processed at slot {slot}")]
    AlreadyProcessed { signature: String, slot: u64 },

    /// Data returned by the collaborator failed validation.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Local signing failure.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl GatewayError {
    /// Transient failures may succeed if the same call is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidData(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Run an external call under a deadline.
///
/// Exceeding the deadline maps to [`GatewayError::Timeout`], which callers
/// treat as a transient failure rather than ledger state.
pub async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    fut: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            operation,
            after: deadline,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Transport("reset".into()).is_transient());
        assert!(GatewayError::Timeout {
            operation: "get_accounts",
            after: Duration::from_millis(10)
        }
        .is_transient());
        assert!(!GatewayError::Rejected("bad".into()).is_transient());
        assert!(!GatewayError::NotFound("x".into()).is_transient());
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_timeout() {
        let result: Result<(), _> = with_deadline("slow_call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        match result {
            Err(GatewayError::Timeout { operation, .. }) => assert_eq!(operation, "slow_call"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_passes_through_result() {
        let result = with_deadline("fast_call", Duration::from_secs(1), async { Ok(7u32) }).await;
        assert_eq!(result, Ok(7));
    }
}
