//! Typed client for the upstream CSP-abstraction REST service.
//!
//! The service is the single touchpoint to every cloud provider; it exposes
//! one logical endpoint per resource kind and identifies everything by the
//! name the caller chose at creation time. This crate wraps those endpoints
//! in typed methods, applies the tier-appropriate timeout per call, and
//! confines the one sanctioned retry (status reads) behind the typed
//! surface.

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde_json::json;

mod error;
pub use error::{CspError, SpiderError};

mod transport;
pub use transport::{HyperTransport, SpiderResponse, SpiderTransport};

mod types;
pub use types::*;

/// Timeout for status reads.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for resource create/attach calls.
pub const MEDIUM_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Timeout for VM and cluster creation.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Extra attempts for `GET /vmstatus/{name}` on empty or failed reads.
const STATUS_READ_RETRIES: usize = 2;

/// Typed client handle. Cheap to clone.
#[derive(Clone)]
pub struct SpiderClient {
    transport: Arc<dyn SpiderTransport>,
    status_retry_backoff: Duration,
}

impl SpiderClient {
    /// Client against a live service, e.g. `http://localhost:1024/spider`.
    pub fn new(base_url: &str) -> Self {
        Self::with_transport(Arc::new(HyperTransport::new(base_url)))
    }

    /// Client over an arbitrary transport (tests use a scripted one).
    pub fn with_transport(transport: Arc<dyn SpiderTransport>) -> Self {
        Self {
            transport,
            status_retry_backoff: Duration::from_secs(5),
        }
    }

    /// Back-off between status-read retries; tests set this to zero.
    pub fn status_retry_backoff(mut self, backoff: Duration) -> Self {
        self.status_retry_backoff = backoff;
        self
    }

    async fn post<T: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        connection_name: &str,
        req_info: T,
        timeout: Duration,
    ) -> Result<R, SpiderError> {
        let body = serde_json::to_value(SpiderRequest {
            connection_name: connection_name.to_string(),
            req_info,
        })
        .map_err(|err| SpiderError::BadResponse(format!("unencodable request: {err}")))?;
        self.transport
            .request(Method::POST, path, Some(body), timeout)
            .await?
            .expect_json()
    }

    async fn get<R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        connection_name: &str,
        timeout: Duration,
    ) -> Result<R, SpiderError> {
        let body = json!({ "ConnectionName": connection_name });
        self.transport
            .request(Method::GET, path, Some(body), timeout)
            .await?
            .expect_json()
    }

    async fn delete(
        &self,
        path: &str,
        connection_name: &str,
        timeout: Duration,
    ) -> Result<(), SpiderError> {
        let body = json!({ "ConnectionName": connection_name });
        let result: BooleanResult = self
            .transport
            .request(Method::DELETE, path, Some(body), timeout)
            .await?
            .expect_json()?;
        if result.is_true() {
            Ok(())
        } else {
            Err(SpiderError::BadResponse(format!(
                "deletion of '{path}' reported '{}'",
                result.result
            )))
        }
    }

    async fn put<T: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        connection_name: &str,
        req_info: T,
        timeout: Duration,
    ) -> Result<R, SpiderError> {
        let body = serde_json::to_value(SpiderRequest {
            connection_name: connection_name.to_string(),
            req_info,
        })
        .map_err(|err| SpiderError::BadResponse(format!("unencodable request: {err}")))?;
        self.transport
            .request(Method::PUT, path, Some(body), timeout)
            .await?
            .expect_json()
    }

    // network

    pub async fn create_vpc(
        &self,
        connection_name: &str,
        req: VpcReqInfo,
    ) -> Result<VpcInfo, SpiderError> {
        self.post("/vpc", connection_name, req, MEDIUM_TIMEOUT).await
    }

    pub async fn get_vpc(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<VpcInfo, SpiderError> {
        self.get(&format!("/vpc/{name}"), connection_name, SHORT_TIMEOUT)
            .await
    }

    /// Register an externally created VPC under this service.
    pub async fn register_vpc(
        &self,
        connection_name: &str,
        req: VpcReqInfo,
    ) -> Result<VpcInfo, SpiderError> {
        self.post("/regvpc", connection_name, req, MEDIUM_TIMEOUT)
            .await
    }

    pub async fn delete_vpc(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<(), SpiderError> {
        self.delete(&format!("/vpc/{name}"), connection_name, MEDIUM_TIMEOUT)
            .await
    }

    pub async fn add_subnet(
        &self,
        connection_name: &str,
        req: SubnetAddReqInfo,
    ) -> Result<VpcInfo, SpiderError> {
        self.post("/subnet", connection_name, req, MEDIUM_TIMEOUT)
            .await
    }

    // ssh keys

    pub async fn create_keypair(
        &self,
        connection_name: &str,
        req: KeyPairReqInfo,
    ) -> Result<KeyPairInfo, SpiderError> {
        self.post("/keypair", connection_name, req, MEDIUM_TIMEOUT)
            .await
    }

    pub async fn delete_keypair(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<(), SpiderError> {
        self.delete(&format!("/keypair/{name}"), connection_name, MEDIUM_TIMEOUT)
            .await
    }

    // security groups

    pub async fn create_security_group(
        &self,
        connection_name: &str,
        req: SecurityGroupReqInfo,
    ) -> Result<SecurityGroupInfo, SpiderError> {
        self.post("/securitygroup", connection_name, req, MEDIUM_TIMEOUT)
            .await
    }

    pub async fn delete_security_group(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<(), SpiderError> {
        self.delete(
            &format!("/securitygroup/{name}"),
            connection_name,
            MEDIUM_TIMEOUT,
        )
        .await
    }

    pub async fn add_security_rules(
        &self,
        connection_name: &str,
        name: &str,
        rules: Vec<SecurityRuleInfo>,
    ) -> Result<SecurityGroupInfo, SpiderError> {
        self.post(
            &format!("/securitygroup/{name}/rules"),
            connection_name,
            SecurityRulesReqInfo {
                rule_info_list: rules,
            },
            MEDIUM_TIMEOUT,
        )
        .await
    }

    pub async fn remove_security_rules(
        &self,
        connection_name: &str,
        name: &str,
        rules: Vec<SecurityRuleInfo>,
    ) -> Result<(), SpiderError> {
        let body = serde_json::to_value(SpiderRequest {
            connection_name: connection_name.to_string(),
            req_info: SecurityRulesReqInfo {
                rule_info_list: rules,
            },
        })
        .map_err(|err| SpiderError::BadResponse(format!("unencodable request: {err}")))?;
        let result: BooleanResult = self
            .transport
            .request(
                Method::DELETE,
                &format!("/securitygroup/{name}/rules"),
                Some(body),
                MEDIUM_TIMEOUT,
            )
            .await?
            .expect_json()?;
        if result.is_true() {
            Ok(())
        } else {
            Err(SpiderError::BadResponse(format!(
                "rule removal on '{name}' reported '{}'",
                result.result
            )))
        }
    }

    // vms

    pub async fn create_vm(
        &self,
        connection_name: &str,
        req: VmReqInfo,
    ) -> Result<SpiderVmInfo, SpiderError> {
        self.post("/vm", connection_name, req, LONG_TIMEOUT).await
    }

    /// Register an externally created VM under this service.
    pub async fn register_vm(
        &self,
        connection_name: &str,
        req: VmReqInfo,
    ) -> Result<SpiderVmInfo, SpiderError> {
        self.post("/regvm", connection_name, req, MEDIUM_TIMEOUT)
            .await
    }

    pub async fn get_vm(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<SpiderVmInfo, SpiderError> {
        self.get(&format!("/vm/{name}"), connection_name, SHORT_TIMEOUT)
            .await
    }

    /// Read the native status of a VM.
    ///
    /// The only auto-retried call: up to [`STATUS_READ_RETRIES`] extra
    /// attempts when the read fails or comes back with an empty status,
    /// with a back-off in between.
    pub async fn get_vm_status(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<VmStatusInfo, SpiderError> {
        let path = format!("/vmstatus/{name}");
        let mut last = self.get::<VmStatusInfo>(&path, connection_name, SHORT_TIMEOUT).await;
        for retry in 1..=STATUS_READ_RETRIES {
            match &last {
                Ok(info) if !info.status.is_empty() => return last,
                Ok(_) => log::debug!("empty status for vm '{name}' (retry {retry})"),
                Err(err) => log::debug!("status read for vm '{name}' failed (retry {retry}): {err}"),
            }
            if !self.status_retry_backoff.is_zero() {
                tokio::time::sleep(self.status_retry_backoff).await;
            }
            last = self.get(&path, connection_name, SHORT_TIMEOUT).await;
        }
        last
    }

    /// Suspend/resume/reboot a VM.
    pub async fn control_vm(
        &self,
        connection_name: &str,
        name: &str,
        action: VmControlAction,
    ) -> Result<(), SpiderError> {
        let body = json!({ "ConnectionName": connection_name });
        let response = self
            .transport
            .request(
                Method::GET,
                &format!("/controlvm/{name}?action={action}"),
                Some(body),
                MEDIUM_TIMEOUT,
            )
            .await?;
        response.check_status().map(drop)
    }

    /// Terminate a VM on the CSP side.
    pub async fn terminate_vm(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<(), SpiderError> {
        self.delete(&format!("/vm/{name}"), connection_name, MEDIUM_TIMEOUT)
            .await
    }

    // disks

    pub async fn create_disk(
        &self,
        connection_name: &str,
        req: DiskReqInfo,
    ) -> Result<DiskInfo, SpiderError> {
        self.post("/disk", connection_name, req, MEDIUM_TIMEOUT).await
    }

    pub async fn attach_disk(
        &self,
        connection_name: &str,
        name: &str,
        vm_name: &str,
    ) -> Result<DiskInfo, SpiderError> {
        self.put(
            &format!("/disk/{name}/attach"),
            connection_name,
            DiskAttachReqInfo {
                vm_name: vm_name.to_string(),
            },
            MEDIUM_TIMEOUT,
        )
        .await
    }

    pub async fn detach_disk(
        &self,
        connection_name: &str,
        name: &str,
        vm_name: &str,
    ) -> Result<(), SpiderError> {
        let body = serde_json::to_value(SpiderRequest {
            connection_name: connection_name.to_string(),
            req_info: DiskAttachReqInfo {
                vm_name: vm_name.to_string(),
            },
        })
        .map_err(|err| SpiderError::BadResponse(format!("unencodable request: {err}")))?;
        let response = self
            .transport
            .request(
                Method::PUT,
                &format!("/disk/{name}/detach"),
                Some(body),
                MEDIUM_TIMEOUT,
            )
            .await?;
        response.check_status().map(drop)
    }

    // clusters

    pub async fn create_cluster(
        &self,
        connection_name: &str,
        req: ClusterReqInfo,
    ) -> Result<ClusterInfo, SpiderError> {
        self.post("/cluster", connection_name, req, LONG_TIMEOUT)
            .await
    }

    pub async fn get_cluster(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<ClusterInfo, SpiderError> {
        self.get(&format!("/cluster/{name}"), connection_name, SHORT_TIMEOUT)
            .await
    }

    pub async fn delete_cluster(
        &self,
        connection_name: &str,
        name: &str,
    ) -> Result<(), SpiderError> {
        self.delete(&format!("/cluster/{name}"), connection_name, LONG_TIMEOUT)
            .await
    }

    pub async fn add_node_group(
        &self,
        connection_name: &str,
        cluster_name: &str,
        req: NodeGroupReqInfo,
    ) -> Result<ClusterInfo, SpiderError> {
        self.post(
            &format!("/cluster/{cluster_name}/nodegroup"),
            connection_name,
            req,
            LONG_TIMEOUT,
        )
        .await
    }

    pub async fn remove_node_group(
        &self,
        connection_name: &str,
        cluster_name: &str,
        node_group_name: &str,
    ) -> Result<(), SpiderError> {
        self.delete(
            &format!("/cluster/{cluster_name}/nodegroup/{node_group_name}"),
            connection_name,
            MEDIUM_TIMEOUT,
        )
        .await
    }

    pub async fn set_node_group_autoscaling(
        &self,
        connection_name: &str,
        cluster_name: &str,
        node_group_name: &str,
        on: bool,
    ) -> Result<ClusterInfo, SpiderError> {
        self.put(
            &format!("/cluster/{cluster_name}/nodegroup/{node_group_name}/onautoscaling"),
            connection_name,
            SetAutoscalingReqInfo {
                on_auto_scaling: on.to_string(),
            },
            MEDIUM_TIMEOUT,
        )
        .await
    }

    pub async fn change_node_group_scale(
        &self,
        connection_name: &str,
        cluster_name: &str,
        node_group_name: &str,
        desired: u32,
        min: u32,
        max: u32,
    ) -> Result<ClusterInfo, SpiderError> {
        self.put(
            &format!("/cluster/{cluster_name}/nodegroup/{node_group_name}/autoscalesize"),
            connection_name,
            ChangeAutoscaleSizeReqInfo {
                desired_node_size: desired.to_string(),
                min_node_size: min.to_string(),
                max_node_size: max.to_string(),
            },
            MEDIUM_TIMEOUT,
        )
        .await
    }

    pub async fn upgrade_cluster(
        &self,
        connection_name: &str,
        cluster_name: &str,
        version: &str,
    ) -> Result<ClusterInfo, SpiderError> {
        self.put(
            &format!("/cluster/{cluster_name}/upgrade"),
            connection_name,
            UpgradeClusterReqInfo {
                version: version.to_string(),
            },
            LONG_TIMEOUT,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    /// Scripted transport returning canned responses and logging calls.
    struct Script {
        responses: Mutex<Vec<Result<SpiderResponse, SpiderError>>>,
        calls: Mutex<Vec<(Method, String)>>,
    }

    impl Script {
        fn new(responses: Vec<Result<SpiderResponse, SpiderError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpiderTransport for Script {
        async fn request(
            &self,
            method: Method,
            path: &str,
            _body: Option<serde_json::Value>,
            _timeout: Duration,
        ) -> Result<SpiderResponse, SpiderError> {
            self.calls.lock().unwrap().push((method, path.to_string()));
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn ok(body: &str) -> Result<SpiderResponse, SpiderError> {
        Ok(SpiderResponse {
            status: 200,
            body: Bytes::from(body.to_string()),
        })
    }

    #[tokio::test]
    async fn status_read_retries_on_empty_body() {
        let script = std::sync::Arc::new(Script::new(vec![
            ok(r#"{"Status": ""}"#),
            ok(r#"{"Status": "Running"}"#),
        ]));
        let client = SpiderClient::with_transport(script.clone())
            .status_retry_backoff(Duration::ZERO);

        let status = client.get_vm_status("aws", "aws-v").await.unwrap();
        assert_eq!(status.status, "Running");
        assert_eq!(script.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn status_read_gives_up_after_two_retries() {
        let script = std::sync::Arc::new(Script::new(vec![
            ok(r#"{"Status": ""}"#),
            ok(r#"{"Status": ""}"#),
            ok(r#"{"Status": ""}"#),
        ]));
        let client = SpiderClient::with_transport(script.clone())
            .status_retry_backoff(Duration::ZERO);

        let status = client.get_vm_status("aws", "aws-v").await.unwrap();
        assert_eq!(status.status, "");
        assert_eq!(script.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn create_calls_are_not_retried() {
        let script = std::sync::Arc::new(Script::new(vec![Err(SpiderError::Api(CspError {
            status: 500,
            message: "capacity".into(),
        }))]));
        let client = SpiderClient::with_transport(script.clone());

        let err = client
            .create_vm(
                "aws",
                VmReqInfo {
                    name: "aws-v".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(script.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_checks_result_flag() {
        let script = std::sync::Arc::new(Script::new(vec![ok(r#"{"Result": "true"}"#)]));
        let client = SpiderClient::with_transport(script.clone());
        client.delete_vpc("aws", "aws-demo-shared").await.unwrap();

        let calls = script.calls.lock().unwrap();
        assert_eq!(calls[0], (Method::DELETE, "/vpc/aws-demo-shared".into()));
    }
}
