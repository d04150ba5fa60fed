//! Policy-driven execution of side effects such as notifications and
//! workspace reclamation.

use std::future::Future;

use tracing::{error, warn};

use crate::domain::errors::DomainResult;

/// How a failed side effect is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffectPolicy {
    /// Log the failure and carry on.
    BestEffort,
    /// Log the failure and return it to the caller.
    MustEscalate,
}

/// Run a side effect under the given policy.
///
/// Returns `Ok(Some(value))` on success and `Ok(None)` for a swallowed
/// best-effort failure.
pub async fn run_side_effect<T, F>(
    policy: SideEffectPolicy,
    name: &str,
    effect: F,
) -> DomainResult<Option<T>>
where
    F: Future<Output = DomainResult<T>>,
{
    match effect.await {
        Ok(value) => Ok(Some(value)),
        Err(err) => match policy {
            SideEffectPolicy::BestEffort => {
                warn!(side_effect = name, error = %err, "side effect failed, continuing");
                Ok(None)
            }
            SideEffectPolicy::MustEscalate => {
                error!(side_effect = name, error = %err, "side effect failed");
                Err(err)
            }
        },
    }
}
