use converge_core::StoreError;
use metrics::counter;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::{patch_object, Error, Identity, ObjectStore, Result, RetryPolicy, VerbResult};

/// Attempt counter and clock for one retry or poll loop.
pub(crate) struct Budget {
    policy: RetryPolicy,
    started: Instant,
    attempts: u32,
}

impl Budget {
    pub(crate) fn start(policy: RetryPolicy) -> Self {
        Self { policy, started: Instant::now(), attempts: 0 }
    }

    pub(crate) fn attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Sleep before the next attempt; `false` once the budget is spent.
    pub(crate) async fn pause(&self) -> bool {
        match self.policy.next_delay(self.attempts, self.started.elapsed()) {
            Some(delay) => {
                sleep(delay).await;
                true
            }
            None => false,
        }
    }

    pub(crate) fn exhausted(&self, operation: &'static str, kind: &str, target: String, last: Option<StoreError>) -> Error {
        counter!("converge_exhausted_total", 1u64, "operation" => operation);
        Error::Exhausted { operation, kind: kind.to_string(), target, attempts: self.attempts, last }
    }
}

/// Read-modify-write with a full update, re-reading and re-applying `transform` after
/// every failed write.
///
/// A missing object aborts immediately. When `transform` leaves the object as it was, no
/// update is sent and the fetched object is returned.
pub async fn update_with_retry<S, F>(store: &S, identity: &Identity, transform: F, policy: RetryPolicy) -> Result<S::Object>
where
    S: ObjectStore + ?Sized,
    F: Fn(S::Object) -> S::Object,
{
    let mut budget = Budget::start(policy);
    let mut last = None;
    loop {
        let attempt = budget.attempt();
        let err = match store.get(identity).await {
            Err(e) if e.is_not_found() => return Err(e.into()),
            Err(e) => e,
            Ok(current) => {
                let modified = transform(current.clone());
                if converge_patch::same_state(&current, &modified)? {
                    debug!(kind = store.kind(), target = %identity, attempt, "transform made no change; skipping update");
                    return Ok(current);
                }
                match store.update(&modified).await {
                    Ok(out) => {
                        counter!("converge_writes_total", 1u64, "verb" => "updated");
                        return Ok(out);
                    }
                    Err(e) => e,
                }
            }
        };
        warn!(kind = store.kind(), target = %identity, attempt, error = %err, "update attempt failed");
        last = Some(err);
        if !budget.pause().await {
            break;
        }
    }
    Err(budget.exhausted("update", store.kind(), identity.to_string(), last))
}

/// Like [`update_with_retry`] but writes a patch, so the result carries a [`VerbResult`].
pub async fn patch_with_retry<S, F>(store: &S, identity: &Identity, transform: F, policy: RetryPolicy) -> Result<(S::Object, VerbResult)>
where
    S: ObjectStore + ?Sized,
    F: Fn(S::Object) -> S::Object,
{
    let mut budget = Budget::start(policy);
    let mut last = None;
    loop {
        let attempt = budget.attempt();
        let err = match store.get(identity).await {
            Err(e) if e.is_not_found() => return Err(e.into()),
            Err(e) => e,
            Ok(current) => {
                let modified = transform(current.clone());
                match patch_object(store, identity, current, &modified).await {
                    Err(Error::Store(e)) => e,
                    done => return done,
                }
            }
        };
        warn!(kind = store.kind(), target = %identity, attempt, error = %err, "patch attempt failed");
        last = Some(err);
        if !budget.pause().await {
            break;
        }
    }
    Err(budget.exhausted("patch", store.kind(), identity.to_string(), last))
}
