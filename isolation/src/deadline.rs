use std::future::Future;
use std::time::Duration;

use crate::bail;
use crate::error::{ErrorKind, IsolationResult};

/// Awaits `future` for at most `deadline`.
///
/// An expired deadline becomes [`ErrorKind::TimeoutError`], never the error kind of the
/// operation itself, so a server that did not answer is distinguishable from one that refused.
pub async fn within<T, F>(deadline: Duration, operation: &str, future: F) -> IsolationResult<T>
where
    F: Future<Output = IsolationResult<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => bail!(
            ErrorKind::TimeoutError,
            "Operation exceeded its deadline",
            format!("{operation} did not finish within {deadline:?}")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation_error;

    #[tokio::test]
    async fn test_expired_deadline_is_a_timeout() {
        let err = within(Duration::from_millis(10), "create database", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert!(!err.is_provisioning());
        assert!(err.detail().unwrap().starts_with("create database"));
    }

    #[tokio::test]
    async fn test_inner_errors_pass_through() {
        let err = within::<(), _>(Duration::from_secs(1), "create schema", async {
            Err(isolation_error!(ErrorKind::ProvisioningError, "Create failed"))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProvisioningError);
    }
}
