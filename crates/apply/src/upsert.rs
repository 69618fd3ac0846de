use metrics::counter;
use tracing::debug;

use crate::{Identity, ObjectStore, Result, VerbResult};

/// Fetch `identity`; create it from `zero` when missing, otherwise patch it toward
/// `transform(current)`.
///
/// At most one read and one write. Errors from the store are returned as they are; retrying
/// the whole upsert is the caller's call.
pub async fn upsert<S, F>(store: &S, identity: &Identity, zero: S::Object, transform: F) -> Result<(S::Object, VerbResult)>
where
    S: ObjectStore + ?Sized,
    F: FnOnce(S::Object) -> S::Object,
{
    let current = match store.get(identity).await {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => {
            let mut fresh = zero;
            store.stamp(&mut fresh, identity);
            let obj = transform(fresh);
            debug!(kind = store.kind(), target = %identity, "creating");
            let created = store.create(&obj).await?;
            counter!("converge_writes_total", 1u64, "verb" => VerbResult::Created.as_str());
            return Ok((created, VerbResult::Created));
        }
        Err(e) => return Err(e.into()),
    };
    let modified = transform(current.clone());
    patch_object(store, identity, current, &modified).await
}

/// Patch `current` toward `modified` using the store's strategy.
///
/// An empty patch returns `current` untouched with [`VerbResult::Unchanged`] and no write.
pub async fn patch_object<S>(store: &S, identity: &Identity, current: S::Object, modified: &S::Object) -> Result<(S::Object, VerbResult)>
where
    S: ObjectStore + ?Sized,
{
    let patch = converge_patch::diff(&current, modified, store.strategy())?;
    if patch.is_empty() {
        return Ok((current, VerbResult::Unchanged));
    }
    debug!(kind = store.kind(), target = %identity, patch = %patch, "patching");
    let out = store.patch(identity, &patch).await?;
    counter!("converge_writes_total", 1u64, "verb" => VerbResult::Patched.as_str());
    Ok((out, VerbResult::Patched))
}
