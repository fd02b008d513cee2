//! Race-tolerant get-or-create.
//!
//! Every get-or-create in the catalog follows the same contract: read; on
//! a miss, insert; if the insert loses a race and the store reports a
//! uniqueness [`Conflict`](StoreError::Conflict), read again. The loop is
//! bounded so a store that keeps reporting conflicts without ever
//! returning the row surfaces as [`StoreError::RetriesExhausted`] instead
//! of spinning.

use std::future::Future;

use crate::error::{StoreError, StoreResult};

/// Attempts made by [`get_or_create`] unless the caller says otherwise.
pub const DEFAULT_ATTEMPTS: usize = 3;

/// Result of [`get_or_create`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub value: T,
    pub created: bool,
}

/// Read with `find`; on a miss create with `create`; on a conflict read
/// again. Gives up after `attempts` rounds.
pub async fn get_or_create<T, F, FFut, C, CFut>(
    what: &str,
    attempts: usize,
    mut find: F,
    mut create: C,
) -> StoreResult<Upserted<T>>
where
    F: FnMut() -> FFut,
    FFut: Future<Output = StoreResult<Option<T>>>,
    C: FnMut() -> CFut,
    CFut: Future<Output = StoreResult<T>>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(value) = find().await? {
            return Ok(Upserted {
                value,
                created: false,
            });
        }
        match create().await {
            Ok(value) => {
                return Ok(Upserted {
                    value,
                    created: true,
                })
            }
            Err(StoreError::Conflict(detail)) => {
                tracing::debug!(
                    "{} created concurrently ({}), re-reading (attempt {}/{})",
                    what,
                    detail,
                    attempt,
                    attempts
                );
            }
            Err(other) => return Err(other),
        }
    }
    Err(StoreError::RetriesExhausted {
        what: what.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_found_on_first_read() {
        let got = get_or_create(
            "thing",
            3,
            || async { Ok(Some(7)) },
            || async { Err(StoreError::NotFound("create must not run".into())) },
        )
        .await
        .unwrap();
        assert_eq!(got, Upserted { value: 7, created: false });
    }

    #[tokio::test]
    async fn test_created_on_miss() {
        let got = get_or_create("thing", 3, || async { Ok(None) }, || async { Ok(1) })
            .await
            .unwrap();
        assert!(got.created);
    }

    #[tokio::test]
    async fn test_conflict_rereads_winner() {
        // The first read misses, the insert loses the race, the second read
        // sees the row the other writer committed.
        let reads = Cell::new(0);
        let got = get_or_create(
            "agent",
            3,
            || {
                reads.set(reads.get() + 1);
                let n = reads.get();
                async move { Ok(if n == 1 { None } else { Some(42) }) }
            },
            || async { Err(StoreError::Conflict("agents.name".into())) },
        )
        .await
        .unwrap();
        assert_eq!(got.value, 42);
        assert!(!got.created);
        assert_eq!(reads.get(), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let creates = Cell::new(0);
        let err = get_or_create::<i64, _, _, _, _>(
            "agent",
            2,
            || async { Ok(None) },
            || {
                creates.set(creates.get() + 1);
                async { Err(StoreError::Conflict("agents.name".into())) }
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(creates.get(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let err = get_or_create::<i64, _, _, _, _>(
            "agent",
            3,
            || async { Ok(None) },
            || async { Err(StoreError::NotFound("source 9".into())) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
