//! Shared fixtures: an in-memory store, a scriptable CSP-abstraction
//! transport, and a seeded catalog.

// each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use serde_json::{json, Value};

use mci_api_types::{ImageInfo, SpecInfo};
use mci_kvstore::MemKvStore;
use mci_orchestrator::config::Pacing;
use mci_orchestrator::{catalog, Context};
use mci_spider_client::{SpiderClient, SpiderError, SpiderResponse, SpiderTransport};

#[derive(Default)]
struct MockState {
    /// CSP-side VM name to native status.
    vms: BTreeMap<String, String>,
    /// CSP-side resource names that exist (vpcs, keys, groups).
    resources: BTreeSet<String>,
    /// Cluster name to node group names.
    clusters: BTreeMap<String, Vec<String>>,
    vm_create_calls: usize,
    /// 1-based indices of `POST /vm` calls to fail with 500 "capacity".
    fail_vm_create_nth: BTreeSet<usize>,
    /// Path prefixes that fail outright.
    fail_paths: Vec<(String, u16, String)>,
    calls: Vec<(Method, String)>,
}

/// Scriptable transport simulating the CSP-abstraction service.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the n-th (1-based) VM create with `CspError{500, "capacity"}`.
    pub fn fail_nth_vm_create(&self, nth: usize) {
        self.state.lock().unwrap().fail_vm_create_nth.insert(nth);
    }

    /// Fail every request whose path starts with `prefix`.
    pub fn fail_path(&self, prefix: &str, status: u16, message: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_paths
            .push((prefix.to_string(), status, message.to_string()));
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, method: &Method, path_prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(m, p)| m == method && p.starts_with(path_prefix))
            .count()
    }

    /// Native status of a CSP-side VM, if it exists.
    pub fn vm_status(&self, csp_name: &str) -> Option<String> {
        self.state.lock().unwrap().vms.get(csp_name).cloned()
    }

    pub fn resource_exists(&self, csp_name: &str) -> bool {
        self.state.lock().unwrap().resources.contains(csp_name)
    }

    fn ok(body: Value) -> Result<SpiderResponse, SpiderError> {
        Ok(SpiderResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
        })
    }

    fn fail(status: u16, message: &str) -> Result<SpiderResponse, SpiderError> {
        Ok(SpiderResponse {
            status,
            body: Bytes::from(json!({ "message": message }).to_string()),
        })
    }

    fn vm_info(name: &str, index: usize) -> Value {
        json!({
            "IId": { "NameId": name, "SystemId": format!("i-{index:04}") },
            "PublicIP": format!("3.3.3.{}", index % 250 + 1),
            "PrivateIP": format!("10.0.1.{}", index % 250 + 1),
            "SSHAccessPoint": format!("3.3.3.{}:22", index % 250 + 1),
        })
    }

    fn cluster_info(name: &str, node_groups: &[String]) -> Value {
        json!({
            "IId": { "NameId": name, "SystemId": format!("ck-{name}") },
            "Version": "",
            "Status": "Active",
            "AccessInfo": { "Endpoint": format!("https://{name}.example:6443") },
            "NodeGroupList": node_groups
                .iter()
                .map(|ng| {
                    json!({
                        "IId": { "NameId": ng, "SystemId": format!("ng-{ng}") },
                        "Status": "Active",
                    })
                })
                .collect::<Vec<_>>(),
        })
    }
}

#[async_trait]
impl SpiderTransport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        _timeout: Duration,
    ) -> Result<SpiderResponse, SpiderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((method.clone(), path.to_string()));

        for (prefix, status, message) in &state.fail_paths {
            if path.starts_with(prefix.as_str()) {
                let (status, message) = (*status, message.clone());
                return Self::fail(status, &message);
            }
        }

        let req_name = body
            .as_ref()
            .and_then(|b| b.get("ReqInfo"))
            .and_then(|r| r.get("Name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

        match (method.as_str(), segments.as_slice()) {
            ("POST", ["vpc"]) | ("POST", ["regvpc"]) => {
                state.resources.insert(req_name.clone());
                Self::ok(json!({
                    "IId": { "NameId": req_name, "SystemId": format!("vpc-{req_name}") },
                    "IPv4_CIDR": "10.0.0.0/16",
                    "SubnetInfoList": [{
                        "IId": { "NameId": req_name, "SystemId": format!("sn-{req_name}") },
                        "IPv4_CIDR": "10.0.1.0/24",
                    }],
                }))
            }
            ("GET", ["vpc", name]) => {
                if state.resources.contains(*name) {
                    Self::ok(json!({
                        "IId": { "NameId": name, "SystemId": format!("vpc-{name}") },
                        "SubnetInfoList": [],
                    }))
                } else {
                    Self::fail(404, "no such vpc")
                }
            }
            ("DELETE", ["vpc", name]) => {
                state.resources.remove(*name);
                Self::ok(json!({ "Result": "true" }))
            }
            ("POST", ["subnet"]) => Self::ok(json!({
                "IId": { "NameId": "", "SystemId": "" },
                "SubnetInfoList": [{
                    "IId": { "NameId": req_name, "SystemId": format!("sn-{req_name}") },
                }],
            })),
            ("POST", ["keypair"]) => {
                state.resources.insert(req_name.clone());
                Self::ok(json!({
                    "IId": { "NameId": req_name, "SystemId": format!("key-{req_name}") },
                    "Fingerprint": "ab:cd",
                    "PublicKey": "ssh-rsa AAAA",
                }))
            }
            ("DELETE", ["keypair", name]) => {
                state.resources.remove(*name);
                Self::ok(json!({ "Result": "true" }))
            }
            ("POST", ["securitygroup"]) => {
                state.resources.insert(req_name.clone());
                Self::ok(json!({
                    "IId": { "NameId": req_name, "SystemId": format!("sg-{req_name}") },
                    "SecurityRules": [],
                }))
            }
            ("DELETE", ["securitygroup", name]) => {
                state.resources.remove(*name);
                Self::ok(json!({ "Result": "true" }))
            }
            ("POST", ["securitygroup", _, "rules"])
            | ("DELETE", ["securitygroup", _, "rules"]) => {
                Self::ok(json!({ "Result": "true" }))
            }
            ("POST", ["vm"]) | ("POST", ["regvm"]) => {
                state.vm_create_calls += 1;
                let nth = state.vm_create_calls;
                if state.fail_vm_create_nth.contains(&nth) {
                    return Self::fail(500, "capacity");
                }
                state.vms.insert(req_name.clone(), "Running".to_string());
                Self::ok(Self::vm_info(&req_name, nth))
            }
            ("GET", ["vm", name]) => match state.vms.contains_key(*name) {
                true => Self::ok(Self::vm_info(name, 1)),
                false => Self::fail(404, "no such vm"),
            },
            ("GET", ["vmstatus", name]) => {
                let status = state.vms.get(*name).cloned().unwrap_or_default();
                Self::ok(json!({ "Status": status }))
            }
            ("GET", ["controlvm", rest]) => {
                let (name, action) = rest
                    .split_once('?')
                    .map(|(n, q)| (n, q.trim_start_matches("action=")))
                    .unwrap_or((*rest, ""));
                let next = match action {
                    "suspend" => "Suspended",
                    "resume" | "reboot" => "Running",
                    _ => return Self::fail(400, "unknown action"),
                };
                match state.vms.get_mut(name) {
                    Some(status) => {
                        *status = next.to_string();
                        Self::ok(json!({}))
                    }
                    None => Self::fail(404, "no such vm"),
                }
            }
            ("DELETE", ["vm", name]) => {
                match state.vms.get_mut(*name) {
                    Some(status) => *status = "Terminated".to_string(),
                    None => {
                        // terminate of an unknown VM still reports success
                    }
                }
                Self::ok(json!({ "Result": "true" }))
            }
            ("POST", ["disk"]) => Self::ok(json!({
                "IId": { "NameId": req_name, "SystemId": format!("d-{req_name}") },
                "Status": "Available",
            })),
            ("PUT", ["disk", name, "attach"]) => Self::ok(json!({
                "IId": { "NameId": name, "SystemId": format!("d-{name}") },
                "Status": "Attached",
            })),
            ("PUT", ["disk", _, "detach"]) => Self::ok(json!({ "Result": "true" })),
            ("POST", ["cluster"]) => {
                let node_groups: Vec<String> = body
                    .as_ref()
                    .and_then(|b| b.get("ReqInfo"))
                    .and_then(|r| r.get("NodeGroupList"))
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|ng| ng.get("Name").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                state.clusters.insert(req_name.clone(), node_groups.clone());
                Self::ok(Self::cluster_info(&req_name, &node_groups))
            }
            ("GET", ["cluster", name]) => match state.clusters.get(*name) {
                Some(node_groups) => {
                    let node_groups = node_groups.clone();
                    Self::ok(Self::cluster_info(name, &node_groups))
                }
                None => Self::fail(404, "no such cluster"),
            },
            ("DELETE", ["cluster", name]) => {
                state.clusters.remove(*name);
                Self::ok(json!({ "Result": "true" }))
            }
            ("POST", ["cluster", name, "nodegroup"]) => {
                let name = name.to_string();
                match state.clusters.get_mut(&name) {
                    Some(groups) => {
                        groups.push(req_name);
                        let groups = groups.clone();
                        Self::ok(Self::cluster_info(&name, &groups))
                    }
                    None => Self::fail(404, "no such cluster"),
                }
            }
            ("DELETE", ["cluster", name, "nodegroup", ng]) => {
                let name = name.to_string();
                let ng = ng.to_string();
                if let Some(groups) = state.clusters.get_mut(&name) {
                    groups.retain(|g| *g != ng);
                }
                Self::ok(json!({ "Result": "true" }))
            }
            ("PUT", ["cluster", name, "nodegroup", _, "onautoscaling"])
            | ("PUT", ["cluster", name, "nodegroup", _, "autoscalesize"])
            | ("PUT", ["cluster", name, "upgrade"]) => {
                match state.clusters.get(*name) {
                    Some(groups) => {
                        let groups = groups.clone();
                        Self::ok(Self::cluster_info(name, &groups))
                    }
                    None => Self::fail(404, "no such cluster"),
                }
            }
            _ => Self::fail(400, &format!("mock: unhandled {method} {path}")),
        }
    }
}

/// A context over a fresh store and mock transport, with instant pacing.
pub fn test_ctx() -> (Context, Arc<MockTransport>, Arc<MemKvStore>) {
    let transport = MockTransport::new();
    let kv = Arc::new(MemKvStore::new());
    let spider = SpiderClient::with_transport(transport.clone())
        .status_retry_backoff(Duration::ZERO);
    let ctx = Context::new(kv.clone(), spider).with_pacing(Pacing::immediate());
    (ctx, transport, kv)
}

/// Seed the system catalog with the specs/images the scenarios use.
pub async fn seed_catalog(ctx: &Context) {
    let system_ns = ctx.settings.system_ns.clone();
    catalog::put_spec(
        ctx,
        &system_ns,
        &SpecInfo {
            id: "aws-ap-northeast-2-t2-small".into(),
            connection_name: "aws-ap-northeast-2".into(),
            csp_spec_name: "t2.small".into(),
            provider_name: "aws".into(),
            region_name: "ap-northeast-2".into(),
            v_cpu: Some(1),
            memory_gib: Some(2.0),
            cost_per_hour: Some(0.026),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    catalog::put_image(
        ctx,
        &system_ns,
        &ImageInfo {
            id: "ubuntu22.04".into(),
            connection_name: "aws-ap-northeast-2".into(),
            csp_image_name: "ami-ubuntu-22-04".into(),
            provider_name: "aws".into(),
            os_family: Some("ubuntu".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    catalog::put_spec(
        ctx,
        &system_ns,
        &SpecInfo {
            id: "gcp+europe-north1+f1-micro".into(),
            connection_name: "gcp-europe-north1".into(),
            csp_spec_name: "f1-micro".into(),
            provider_name: "gcp".into(),
            region_name: "europe-north1".into(),
            cost_per_hour: Some(0.0076),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    catalog::put_image(
        ctx,
        &system_ns,
        &ImageInfo {
            id: "ubuntu22.04-gcp".into(),
            connection_name: "gcp-europe-north1".into(),
            csp_image_name: "ubuntu22.04".into(),
            provider_name: "gcp".into(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
}
