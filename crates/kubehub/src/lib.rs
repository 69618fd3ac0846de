//! Converge kubehub: `ObjectStore` bindings backed by kube-rs.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use async_trait::async_trait;
use converge_apply::{Identity, ObjectStore, Patch, PatchStrategy, Selector, StoreError};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{
    api::{Api, ListParams, PatchParams, PostParams},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as Json;
use tracing::debug;

pub mod kinds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Namespaced,
    Cluster,
}

/// Object store for one kube resource kind.
///
/// Merge patches go out as strategic-merge patches and operation lists as JSON patches, so
/// custom resources (which have no strategic-merge support) should be bound with
/// [`PatchStrategy::OperationList`].
pub struct KubeStore<K> {
    client: Client,
    scope: Scope,
    kind: String,
    strategy: PatchStrategy,
    make_api: fn(Client, Option<&str>) -> Api<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn namespaced(client: Client, strategy: PatchStrategy) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self {
            client,
            scope: Scope::Namespaced,
            kind: K::kind(&()).to_string(),
            strategy,
            make_api: |client, ns| match ns {
                Some(ns) => Api::namespaced(client, ns),
                None => Api::all(client),
            },
        }
    }

    pub fn cluster(client: Client, strategy: PatchStrategy) -> Self
    where
        K: Resource<Scope = ClusterResourceScope>,
    {
        Self {
            client,
            scope: Scope::Cluster,
            kind: K::kind(&()).to_string(),
            strategy,
            make_api: |client, _| Api::all(client),
        }
    }

    fn api_for(&self, identity: &Identity) -> Result<Api<K>, StoreError> {
        match (self.scope, identity.namespace()) {
            (Scope::Namespaced, None) => Err(StoreError::Invalid(format!("{} {}: namespace required for namespaced kind", self.kind, identity))),
            (Scope::Namespaced, ns) => Ok((self.make_api)(self.client.clone(), ns)),
            (Scope::Cluster, _) => Ok((self.make_api)(self.client.clone(), None)),
        }
    }
}

/// Map a kube client error onto the store taxonomy by HTTP status.
pub fn store_error(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(resp) => match resp.code {
            404 => StoreError::NotFound(resp.message),
            409 => StoreError::Conflict(resp.message),
            400 | 422 => StoreError::Invalid(resp.message),
            code => StoreError::Transient(format!("{} (HTTP {})", resp.message, code)),
        },
        other => StoreError::Transient(other.to_string()),
    }
}

/// Wire form of a patch for the kube API.
pub fn wire_patch(patch: &Patch) -> kube::api::Patch<Json> {
    match patch {
        Patch::Merge(doc) => kube::api::Patch::Strategic(doc.clone()),
        Patch::Operations(ops) => kube::api::Patch::Json(ops.clone()),
    }
}

/// Set name and (for namespaced kinds) namespace. Type metadata comes from the kube types'
/// own serialization.
pub fn stamp_meta<K: Resource>(obj: &mut K, identity: &Identity, namespaced: bool) {
    let meta = obj.meta_mut();
    meta.name = Some(identity.name.clone());
    meta.namespace = if namespaced { identity.namespace().map(|s| s.to_string()) } else { None };
}

fn identity_of<K: Resource>(obj: &K) -> Result<Identity, StoreError> {
    let meta = obj.meta();
    let name = meta.name.clone().ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))?;
    Ok(Identity { namespace: meta.namespace.clone(), name })
}

#[async_trait]
impl<K> ObjectStore for KubeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Object = K;

    fn kind(&self) -> &str {
        &self.kind
    }

    fn strategy(&self) -> &PatchStrategy {
        &self.strategy
    }

    fn stamp(&self, obj: &mut K, identity: &Identity) {
        stamp_meta(obj, identity, self.scope == Scope::Namespaced);
    }

    async fn get(&self, identity: &Identity) -> Result<K, StoreError> {
        let api = self.api_for(identity)?;
        api.get(&identity.name).await.map_err(store_error)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let identity = identity_of(obj)?;
        let api = self.api_for(&identity)?;
        api.create(&PostParams::default(), obj).await.map_err(store_error)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let identity = identity_of(obj)?;
        let api = self.api_for(&identity)?;
        api.replace(&identity.name, &PostParams::default(), obj).await.map_err(store_error)
    }

    async fn patch(&self, identity: &Identity, patch: &Patch) -> Result<K, StoreError> {
        let api = self.api_for(identity)?;
        let body = wire_patch(patch);
        api.patch(&identity.name, &PatchParams::default(), &body).await.map_err(store_error)
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<K>, StoreError> {
        let ns = match self.scope {
            Scope::Namespaced => selector.namespace.as_deref().filter(|ns| !ns.is_empty()),
            Scope::Cluster => None,
        };
        let api = (self.make_api)(self.client.clone(), ns);
        let labels = selector.label_string();
        let lp = if labels.is_empty() { ListParams::default() } else { ListParams::default().labels(&labels) };
        let list = api.list(&lp).await.map_err(store_error)?;
        debug!(kind = %self.kind, selector = %selector, count = list.items.len(), "listed");
        Ok(list.items)
    }
}
