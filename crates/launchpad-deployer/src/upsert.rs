//! Create-or-update over a remote resource.

use launchpad_core::deployer::{PlatformError, PlatformResult};
use launchpad_core::resource::ResourceAction;
use std::future::Future;
use tracing::debug;

/// What to do with a failed create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The resource is already there; fall through to the update path.
    Update,
    Propagate,
}

/// Which path produced the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted<T> {
    Created(T),
    Updated(T),
}

impl<T> Upserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Upserted::Created(v) | Upserted::Updated(v) => v,
        }
    }

    pub fn action(&self) -> ResourceAction {
        match self {
            Upserted::Created(_) => ResourceAction::Created,
            Upserted::Updated(_) => ResourceAction::Updated,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Upserted::Created(_))
    }
}

/// Default classification: existing-resource signals recover, everything
/// else propagates.
pub fn on_existing(err: &PlatformError) -> Recovery {
    if err.is_existing() {
        Recovery::Update
    } else {
        Recovery::Propagate
    }
}

/// Attempt `create`; on a failure `classify` maps to `Update`, run `update`
/// with that failure instead.
pub async fn create_or_update<T, C, CFut, K, U, UFut>(
    create: C,
    classify: K,
    update: U,
) -> PlatformResult<Upserted<T>>
where
    C: FnOnce() -> CFut,
    CFut: Future<Output = PlatformResult<T>>,
    K: FnOnce(&PlatformError) -> Recovery,
    U: FnOnce(PlatformError) -> UFut,
    UFut: Future<Output = PlatformResult<T>>,
{
    match create().await {
        Ok(value) => Ok(Upserted::Created(value)),
        Err(err) => match classify(&err) {
            Recovery::Update => {
                debug!(operation = err.operation, kind = %err.kind, "create fell through to update");
                update(err).await.map(Upserted::Updated)
            }
            Recovery::Propagate => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_core::deployer::PlatformErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_created() {
        let result = create_or_update(
            || async { Ok::<_, PlatformError>("arn:new") },
            on_existing,
            |_| async { panic!("update must not run") },
        )
        .await
        .unwrap();
        assert_eq!(result, Upserted::Created("arn:new"));
        assert_eq!(result.action(), ResourceAction::Created);
    }

    #[tokio::test]
    async fn test_conflict_falls_through_to_update() {
        let updates = AtomicUsize::new(0);
        let result = create_or_update(
            || async {
                Err(PlatformError::new(
                    "create_function",
                    PlatformErrorKind::Conflict,
                    "Function already exist: demo",
                ))
            },
            on_existing,
            |err| {
                assert_eq!(err.operation, "create_function");
                updates.fetch_add(1, Ordering::SeqCst);
                async { Ok("arn:existing") }
            },
        )
        .await
        .unwrap();

        assert_eq!(result.clone().into_inner(), "arn:existing");
        assert!(!result.was_created());
        assert_eq!(updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_failures_propagate() {
        let err = create_or_update(
            || async { Err::<(), _>(PlatformError::other("create_function", "AccessDenied")) },
            on_existing,
            |_| async { Ok(()) },
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, PlatformErrorKind::Other);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let not_found = || async {
            Err::<(), _>(PlatformError::new("lookup", PlatformErrorKind::NotFound, "gone"))
        };
        let recovered = create_or_update(
            not_found,
            |e| {
                if e.kind == PlatformErrorKind::NotFound {
                    Recovery::Update
                } else {
                    Recovery::Propagate
                }
            },
            |_| async { Ok(()) },
        )
        .await
        .unwrap();
        assert_eq!(recovered, Upserted::Updated(()));
    }

    #[tokio::test]
    async fn test_update_failure_is_returned() {
        let err = create_or_update(
            || async {
                Err::<(), _>(PlatformError::new("create", PlatformErrorKind::Conflict, ""))
            },
            on_existing,
            |_| async { Err(PlatformError::other("update", "Throttled")) },
        )
        .await
        .unwrap_err();
        assert_eq!(err.operation, "update");
    }
}
