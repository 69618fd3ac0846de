//! In-memory store with optimistic concurrency and scripted failures.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use converge_apply::{Identity, MergeKeys, ObjectStore, Patch, PatchStrategy, Selector, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub const API_VERSION: &str = "demo.converge.io/v1";

pub fn init_tracing() {
    let env = std::env::var("CONVERGE_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSpec {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    /// Byte-string keys have no JSON form; a non-empty map fails to serialize.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blobs: BTreeMap<Vec<u8>, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetStatus {
    #[serde(default)]
    pub ready_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: Meta,
    #[serde(default)]
    pub spec: WidgetSpec,
    #[serde(default)]
    pub status: WidgetStatus,
}

impl Widget {
    pub fn identity(&self) -> Identity {
        Identity { namespace: self.metadata.namespace.clone(), name: self.metadata.name.clone() }
    }
}

pub fn widget(id: &Identity, replicas: i32) -> Widget {
    Widget {
        api_version: API_VERSION.into(),
        kind: "Widget".into(),
        metadata: Meta { name: id.name.clone(), namespace: id.namespace.clone(), ..Default::default() },
        spec: WidgetSpec { replicas, ..Default::default() },
        status: WidgetStatus::default(),
    }
}

type Hook = Box<dyn FnMut(u32, &mut BTreeMap<Identity, Widget>) + Send>;
type Write = Box<dyn FnOnce(&mut Widget) + Send>;

pub fn hook(f: impl FnMut(u32, &mut BTreeMap<Identity, Widget>) + Send + 'static) -> Option<Hook> {
    Some(Box::new(f))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub get: u32,
    pub create: u32,
    pub update: u32,
    pub patch: u32,
    pub list: u32,
}

#[derive(Default)]
pub struct State {
    pub objects: BTreeMap<Identity, Widget>,
    pub calls: Calls,
    next_rv: u64,
    pub get_failures: VecDeque<StoreError>,
    pub create_failures: VecDeque<StoreError>,
    pub update_failures: VecDeque<StoreError>,
    pub list_failures: VecDeque<StoreError>,
    /// Writes from "another client" that land right before the next update call.
    pub interleaved_writes: VecDeque<Write>,
    /// Called with the call number before each get is served.
    pub on_get: Option<Hook>,
    /// Called with the call number before each list is served.
    pub on_list: Option<Hook>,
}

impl State {
    fn bump(&mut self, w: &mut Widget) {
        self.next_rv += 1;
        w.metadata.resource_version = self.next_rv.to_string();
    }
}

pub struct MemoryStore {
    strategy: PatchStrategy,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_strategy(PatchStrategy::StructuralMerge(MergeKeys::new().with("spec.ports", "port")))
    }

    pub fn with_strategy(strategy: PatchStrategy) -> Self {
        Self { strategy, state: Mutex::new(State::default()) }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Calls {
        self.state().calls
    }

    pub fn insert(&self, mut w: Widget) -> Widget {
        let mut st = self.state();
        st.bump(&mut w);
        st.objects.insert(w.identity(), w.clone());
        w
    }

    pub fn stored(&self, id: &Identity) -> Option<Widget> {
        self.state().objects.get(id).cloned()
    }

    pub fn stored_json(&self, id: &Identity) -> Option<Json> {
        self.stored(id).map(|w| serde_json::to_value(w).unwrap())
    }
}

fn not_found(id: &Identity) -> StoreError {
    StoreError::NotFound(format!("widget {}", id))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    type Object = Widget;

    fn kind(&self) -> &str {
        "Widget"
    }

    fn strategy(&self) -> &PatchStrategy {
        &self.strategy
    }

    fn stamp(&self, obj: &mut Widget, identity: &Identity) {
        obj.api_version = API_VERSION.into();
        obj.kind = "Widget".into();
        obj.metadata.name = identity.name.clone();
        obj.metadata.namespace = identity.namespace.clone();
    }

    async fn get(&self, identity: &Identity) -> Result<Widget, StoreError> {
        let mut st = self.state();
        st.calls.get += 1;
        let n = st.calls.get;
        if let Some(mut hook) = st.on_get.take() {
            hook(n, &mut st.objects);
            st.on_get = Some(hook);
        }
        if let Some(e) = st.get_failures.pop_front() {
            return Err(e);
        }
        st.objects.get(identity).cloned().ok_or_else(|| not_found(identity))
    }

    async fn create(&self, obj: &Widget) -> Result<Widget, StoreError> {
        let mut st = self.state();
        st.calls.create += 1;
        if let Some(e) = st.create_failures.pop_front() {
            return Err(e);
        }
        let id = obj.identity();
        if st.objects.contains_key(&id) {
            return Err(StoreError::Conflict(format!("widget {} already exists", id)));
        }
        let mut w = obj.clone();
        st.bump(&mut w);
        st.objects.insert(id, w.clone());
        Ok(w)
    }

    async fn update(&self, obj: &Widget) -> Result<Widget, StoreError> {
        let mut st = self.state();
        st.calls.update += 1;
        let id = obj.identity();
        if let Some(write) = st.interleaved_writes.pop_front() {
            let mut other = st.objects.get(&id).cloned().ok_or_else(|| not_found(&id))?;
            write(&mut other);
            st.bump(&mut other);
            st.objects.insert(id.clone(), other);
        }
        if let Some(e) = st.update_failures.pop_front() {
            return Err(e);
        }
        let stored_rv = st.objects.get(&id).map(|w| w.metadata.resource_version.clone()).ok_or_else(|| not_found(&id))?;
        if stored_rv != obj.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "widget {}: resourceVersion {} is stale (stored {})",
                id, obj.metadata.resource_version, stored_rv
            )));
        }
        let mut w = obj.clone();
        st.bump(&mut w);
        st.objects.insert(id, w.clone());
        Ok(w)
    }

    async fn patch(&self, identity: &Identity, patch: &Patch) -> Result<Widget, StoreError> {
        let mut st = self.state();
        st.calls.patch += 1;
        let current = st.objects.get(identity).cloned().ok_or_else(|| not_found(identity))?;
        let mut doc = serde_json::to_value(&current).map_err(|e| StoreError::Invalid(e.to_string()))?;
        patch.apply(&mut doc, &self.strategy).map_err(|e| StoreError::Invalid(e.to_string()))?;
        let mut w: Widget = serde_json::from_value(doc).map_err(|e| StoreError::Invalid(e.to_string()))?;
        st.bump(&mut w);
        st.objects.insert(identity.clone(), w.clone());
        Ok(w)
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<Widget>, StoreError> {
        let mut st = self.state();
        st.calls.list += 1;
        let n = st.calls.list;
        if let Some(mut hook) = st.on_list.take() {
            hook(n, &mut st.objects);
            st.on_list = Some(hook);
        }
        if let Some(e) = st.list_failures.pop_front() {
            return Err(e);
        }
        Ok(st
            .objects
            .values()
            .filter(|w| selector.namespace.is_none() || w.metadata.namespace == selector.namespace)
            .filter(|w| selector.matches(&w.metadata.labels))
            .cloned()
            .collect())
    }
}
