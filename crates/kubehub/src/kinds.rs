//! Kind bindings: merge keys and scope for the kinds converge reconciles, plus the
//! per-kind helpers controllers use around them.

use converge_apply::{wait_until, wait_until_empty, Identity, MergeKeys, ObjectStore, PatchStrategy, Result, Selector, Settings};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Client, CustomResource};
use serde::{Deserialize, Serialize};

use crate::KubeStore;

/// kubedb `Postgres` database resource.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(group = "kubedb.com", version = "v1alpha1", kind = "Postgres", plural = "postgreses", namespaced, schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct PostgresSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub do_not_pause: bool,
}

/// kubedb record of a deleted database, kept so it can be resumed or wiped out.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[kube(group = "kubedb.com", version = "v1alpha1", kind = "DormantDatabase", plural = "dormantdatabases", namespaced, schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct DormantDatabaseSpec {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wipe_out: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resume: bool,
    #[serde(default)]
    pub origin: Origin,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Origin {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: OriginSpec,
}

/// Spec of the database the dormant record was taken from.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OriginSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresSpec>,
}

pub fn services(client: Client) -> KubeStore<Service> {
    KubeStore::namespaced(client, PatchStrategy::StructuralMerge(MergeKeys::new().with("spec.ports", "port")))
}

pub fn replica_sets(client: Client) -> KubeStore<ReplicaSet> {
    KubeStore::namespaced(client, PatchStrategy::StructuralMerge(pod_template_keys("spec.template.spec")))
}

/// Subjects have no merge key and are replaced wholesale.
pub fn cluster_role_bindings(client: Client) -> KubeStore<ClusterRoleBinding> {
    KubeStore::cluster(client, PatchStrategy::default())
}

/// Custom resources take JSON patches only.
pub fn postgreses(client: Client) -> KubeStore<Postgres> {
    KubeStore::namespaced(client, PatchStrategy::OperationList)
}

pub fn dormant_databases(client: Client) -> KubeStore<DormantDatabase> {
    KubeStore::namespaced(client, PatchStrategy::OperationList)
}

fn pod_template_keys(pod_spec: &str) -> MergeKeys {
    let containers = format!("{}.containers", pod_spec);
    MergeKeys::new()
        .with(containers.clone(), "name")
        .with(format!("{}.ports", containers), "containerPort")
        .with(format!("{}.env", containers), "name")
        .with(format!("{}.volumeMounts", containers), "mountPath")
        .with(format!("{}.initContainers", pod_spec), "name")
        .with(format!("{}.volumes", pod_spec), "name")
}

/// Carry server-assigned node ports and defaulted protocols from `cur` into `desired`,
/// matching by port number. Ports only in `desired` are left as they are.
pub fn merge_service_ports(cur: &[ServicePort], mut desired: Vec<ServicePort>) -> Vec<ServicePort> {
    for dp in desired.iter_mut() {
        let Some(cp) = cur.iter().find(|cp| cp.port == dp.port) else {
            continue;
        };
        if dp.node_port.unwrap_or(0) == 0 {
            dp.node_port = cp.node_port;
        }
        if dp.protocol.as_deref().unwrap_or("").is_empty() {
            dp.protocol = cp.protocol.clone();
        }
    }
    desired
}

/// Every desired replica (default 1) reports ready.
pub fn replica_set_ready(rs: Option<&ReplicaSet>) -> bool {
    let Some(rs) = rs else {
        return false;
    };
    let want = rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = rs.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    want == ready
}

pub async fn wait_until_replica_set_ready<S>(store: &S, identity: &Identity, settings: &Settings) -> Result<()>
where
    S: ObjectStore<Object = ReplicaSet>,
{
    wait_until(store, identity, settings.readiness(), replica_set_ready).await
}

pub async fn wait_until_services_deleted<S>(store: &S, selector: &Selector, settings: &Settings) -> Result<()>
where
    S: ObjectStore<Object = Service>,
{
    wait_until_empty(store, selector, settings.readiness()).await
}
