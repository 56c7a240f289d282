//! Bounded fan-out of independent fallible operations.
//!
//! Bulk lifecycle operations need to issue one backend call per service
//! without hand-rolling task management at every call site. The
//! parallelizer runs a set of keyed operations concurrently on a bounded
//! worker pool and reports, per key, whether the operation succeeded or
//! failed. It holds no state across calls and interprets nothing about the
//! keys — it only correlates results back to them.
//!
//! Barrier semantics: the call returns only once every submitted operation
//! has completed. There are no partial or streaming results, and completion
//! order across operations is unspecified — callers must not depend on
//! per-operation ordering within one batch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::NetworkError;

/// Default worker pool bound when the caller has no batch size of its own.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 25;

/// Opaque identifier correlating an operation with its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(String);

impl OperationId {
    /// Wraps a caller-chosen identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single fallible unit of work.
pub type Operation<T> = Pin<Box<dyn Future<Output = Result<T, NetworkError>> + Send>>;

/// Runs all operations concurrently, bounded by `max_concurrency` workers,
/// and returns disjoint success and failure maps.
///
/// Every submitted ID appears in exactly one of the two maps. A panicking
/// operation is reported as a failure for its own ID and does not affect
/// any other operation.
pub async fn run_operations_in_parallel<T>(
    operations: HashMap<OperationId, Operation<T>>,
    max_concurrency: usize,
) -> (HashMap<OperationId, T>, HashMap<OperationId, NetworkError>)
where
    T: Send + 'static,
{
    let total = operations.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut handles: Vec<(OperationId, JoinHandle<Result<T, NetworkError>>)> =
        Vec::with_capacity(total);

    for (operation_id, operation) in operations {
        let semaphore = Arc::clone(&semaphore);
        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return Err(NetworkError::internal_bug(
                        "operation worker pool semaphore was closed",
                    ))
                }
            };
            operation.await
        });
        handles.push((operation_id, handle));
    }

    let mut successes = HashMap::new();
    let mut failures = HashMap::new();
    for (operation_id, handle) in handles {
        match handle.await {
            Ok(Ok(result)) => {
                trace!(operation = %operation_id, "Operation succeeded");
                successes.insert(operation_id, result);
            }
            Ok(Err(err)) => {
                trace!(operation = %operation_id, error = %err, "Operation failed");
                failures.insert(operation_id, err);
            }
            Err(join_err) => {
                failures.insert(
                    operation_id,
                    NetworkError::internal_bug(format!("operation panicked: {join_err}")),
                );
            }
        }
    }

    debug!(
        total,
        succeeded = successes.len(),
        failed = failures.len(),
        "Parallel operation batch complete"
    );
    (successes, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn op_ok(value: u32) -> Operation<u32> {
        Box::pin(async move { Ok(value) })
    }

    fn op_err(reason: &str) -> Operation<u32> {
        let reason = reason.to_string();
        Box::pin(async move { Err(NetworkError::validation(reason)) })
    }

    #[tokio::test]
    async fn test_every_id_lands_in_exactly_one_map() {
        let mut operations = HashMap::new();
        for i in 0..20u32 {
            let id = OperationId::new(format!("op-{i}"));
            if i % 3 == 0 {
                operations.insert(id, op_err("divisible by three"));
            } else {
                operations.insert(id, op_ok(i));
            }
        }

        let (successes, failures) = run_operations_in_parallel(operations, 4).await;

        assert_eq!(successes.len() + failures.len(), 20);
        for i in 0..20u32 {
            let id = OperationId::new(format!("op-{i}"));
            let in_success = successes.contains_key(&id);
            let in_failure = failures.contains_key(&id);
            assert!(in_success ^ in_failure, "id {id} must be in exactly one map");
        }
        assert_eq!(successes[&OperationId::new("op-1")], 1);
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut operations: HashMap<OperationId, Operation<()>> = HashMap::new();
        for i in 0..12 {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            operations.insert(
                OperationId::new(format!("op-{i}")),
                Box::pin(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        let (successes, failures) = run_operations_in_parallel(operations, 3).await;

        assert_eq!(successes.len(), 12);
        assert!(failures.is_empty());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panic_is_contained_to_its_operation() {
        let mut operations: HashMap<OperationId, Operation<u32>> = HashMap::new();
        operations.insert(
            OperationId::new("panics"),
            Box::pin(async { panic!("operation blew up") }),
        );
        operations.insert(OperationId::new("fine"), op_ok(7));

        let (successes, failures) = run_operations_in_parallel(operations, 2).await;

        assert_eq!(successes[&OperationId::new("fine")], 7);
        let err = &failures[&OperationId::new("panics")];
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty_maps() {
        let operations: HashMap<OperationId, Operation<u32>> = HashMap::new();
        let (successes, failures) = run_operations_in_parallel(operations, 5).await;
        assert!(successes.is_empty());
        assert!(failures.is_empty());
    }
}
