use async_trait::async_trait;
use converge_core::{Identity, Selector, StoreError};
use converge_patch::{Patch, PatchStrategy};
use serde::Serialize;

/// Per-kind store binding: the remote operations plus the kind's patch strategy and
/// type stamping. One implementation serves every call for that kind.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    type Object: Clone + Serialize + Send + Sync + 'static;

    /// Kind name used in diagnostics.
    fn kind(&self) -> &str;

    fn strategy(&self) -> &PatchStrategy;

    /// Stamp type metadata and `identity` onto a fresh object before it is created.
    fn stamp(&self, obj: &mut Self::Object, identity: &Identity);

    async fn get(&self, identity: &Identity) -> Result<Self::Object, StoreError>;

    async fn create(&self, obj: &Self::Object) -> Result<Self::Object, StoreError>;

    /// Full replace, subject to the store's optimistic-concurrency check.
    async fn update(&self, obj: &Self::Object) -> Result<Self::Object, StoreError>;

    async fn patch(&self, identity: &Identity, patch: &Patch) -> Result<Self::Object, StoreError>;

    async fn list(&self, selector: &Selector) -> Result<Vec<Self::Object>, StoreError>;
}
