use tracing::debug;

use crate::retry::Budget;
use crate::{Identity, ObjectStore, Result, RetryPolicy, Selector};

/// Poll one object until `condition` holds. The first fetch happens immediately.
///
/// The condition sees `None` while the object does not exist. Any other fetch error counts
/// as "not yet" and polling continues until the budget runs out.
pub async fn wait_until<S, C>(store: &S, identity: &Identity, policy: RetryPolicy, condition: C) -> Result<()>
where
    S: ObjectStore + ?Sized,
    C: Fn(Option<&S::Object>) -> bool,
{
    let mut budget = Budget::start(policy);
    let mut last = None;
    loop {
        let attempt = budget.attempt();
        let done = match store.get(identity).await {
            Ok(obj) => condition(Some(&obj)),
            Err(e) if e.is_not_found() => condition(None),
            Err(e) => {
                debug!(kind = store.kind(), target = %identity, attempt, error = %e, "poll fetch failed");
                last = Some(e);
                false
            }
        };
        if done {
            debug!(kind = store.kind(), target = %identity, attempt, "condition met");
            return Ok(());
        }
        if !budget.pause().await {
            break;
        }
    }
    Err(budget.exhausted("wait for", store.kind(), identity.to_string(), last))
}

pub async fn wait_until_absent<S>(store: &S, identity: &Identity, policy: RetryPolicy) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    wait_until(store, identity, policy, |obj| obj.is_none()).await
}

/// Poll the objects matching `selector` until `condition` holds for the listed set.
/// List errors count as "not yet".
pub async fn wait_until_listed<S, C>(store: &S, selector: &Selector, policy: RetryPolicy, condition: C) -> Result<()>
where
    S: ObjectStore + ?Sized,
    C: Fn(&[S::Object]) -> bool,
{
    let mut budget = Budget::start(policy);
    let mut last = None;
    loop {
        let attempt = budget.attempt();
        match store.list(selector).await {
            Ok(items) if condition(items.as_slice()) => {
                debug!(kind = store.kind(), selector = %selector, attempt, "condition met");
                return Ok(());
            }
            Ok(items) => debug!(kind = store.kind(), selector = %selector, attempt, remaining = items.len(), "still waiting"),
            Err(e) => {
                debug!(kind = store.kind(), selector = %selector, attempt, error = %e, "poll list failed");
                last = Some(e);
            }
        }
        if !budget.pause().await {
            break;
        }
    }
    Err(budget.exhausted("wait for", store.kind(), selector.to_string(), last))
}

/// Poll until nothing matches `selector`, e.g. to confirm a deletion propagated.
pub async fn wait_until_empty<S>(store: &S, selector: &Selector, policy: RetryPolicy) -> Result<()>
where
    S: ObjectStore + ?Sized,
{
    wait_until_listed(store, selector, policy, |items| items.is_empty()).await
}
