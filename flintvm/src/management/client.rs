//! Management client bound to one hypervisor.

use super::protocol::{ActionType, ApiRequest, ApiResponse, FaultBody, StateTarget, VmInfo};
use super::schema::ApiSchema;
use super::transport::ApiTransport;
use crate::config::{VmBootSource, VmDrive, VmMachineConfiguration};
use flintvm_shared::{FlintError, FlintResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Request/response client over a single [`ApiTransport`].
///
/// Requests are serialized: concurrent callers wait on the transport lock.
pub struct ManagementClient {
    schema: ApiSchema,
    transport: Mutex<Box<dyn ApiTransport>>,
    requests: AtomicU64,
}

impl ManagementClient {
    pub fn new(schema: ApiSchema, transport: Box<dyn ApiTransport>) -> Self {
        Self {
            schema,
            transport: Mutex::new(transport),
            requests: AtomicU64::new(0),
        }
    }

    pub fn schema(&self) -> &ApiSchema {
        &self.schema
    }

    /// Total requests issued through this client.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub async fn get_info(&self) -> FlintResult<VmInfo> {
        self.call(self.schema.get_info()).await
    }

    pub async fn get_version(&self) -> FlintResult<String> {
        #[derive(Deserialize)]
        struct Version {
            firecracker_version: String,
        }
        let version: Version = self.call(self.schema.get_version()).await?;
        Ok(version.firecracker_version)
    }

    pub async fn get_machine_config(&self) -> FlintResult<VmMachineConfiguration> {
        let response = self.send(self.schema.get_machine_config()).await?;
        self.schema.parse_machine_config(&response.body)
    }

    pub async fn put_boot_source(&self, boot: &VmBootSource) -> FlintResult<()> {
        self.call_empty(self.schema.put_boot_source(boot)?).await
    }

    pub async fn put_machine_config(&self, machine: &VmMachineConfiguration) -> FlintResult<()> {
        self.call_empty(self.schema.put_machine_config(machine)).await
    }

    pub async fn put_drive(&self, drive: &VmDrive) -> FlintResult<()> {
        self.call_empty(self.schema.put_drive(drive)?).await
    }

    /// Point an attached drive at a different backing file.
    pub async fn patch_drive(&self, drive_id: &str, path_on_host: &Path) -> FlintResult<()> {
        self.call_empty(self.schema.patch_drive(drive_id, path_on_host))
            .await
    }

    pub async fn update_state(&self, target: StateTarget) -> FlintResult<()> {
        self.call_empty(self.schema.patch_state(target)).await
    }

    pub async fn perform_action(&self, action: ActionType) -> FlintResult<()> {
        self.call_empty(self.schema.put_action(action)).await
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> FlintResult<T> {
        let path = request.path.clone();
        let response = self.send(request).await?;
        if response.body.is_empty() {
            return Err(FlintError::Protocol(format!("empty response body for {path}")));
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| FlintError::Protocol(format!("malformed response for {path}: {e}")))
    }

    async fn call_empty(&self, request: ApiRequest) -> FlintResult<()> {
        self.send(request).await.map(|_| ())
    }

    async fn send(&self, request: ApiRequest) -> FlintResult<ApiResponse> {
        let method = request.method;
        let path = request.path.clone();

        let response = {
            let mut transport = self.transport.lock().await;
            self.requests.fetch_add(1, Ordering::Relaxed);
            transport.send(request).await?
        };

        tracing::trace!(%method, path = %path, status = response.status, "API round trip");

        if response.is_success() {
            return Ok(response);
        }

        match serde_json::from_slice::<FaultBody>(&response.body) {
            Ok(fault) => Err(FlintError::Api {
                status: response.status,
                fault_message: fault.fault_message,
            }),
            Err(_) => Err(FlintError::Protocol(format!(
                "{} {} returned HTTP {} with unrecognised body: {}",
                method,
                path,
                response.status,
                String::from_utf8_lossy(&response.body)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flintvm_shared::ErrorKind;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct Scripted {
        replies: VecDeque<FlintResult<ApiResponse>>,
        seen: Arc<parking_lot::Mutex<Vec<ApiRequest>>>,
    }

    #[async_trait]
    impl ApiTransport for Scripted {
        async fn send(&mut self, request: ApiRequest) -> FlintResult<ApiResponse> {
            self.seen.lock().push(request);
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(FlintError::Transport("channel closed".into())))
        }
    }

    fn client(
        replies: Vec<FlintResult<ApiResponse>>,
    ) -> (ManagementClient, Arc<parking_lot::Mutex<Vec<ApiRequest>>>) {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let transport = Scripted {
            replies: replies.into(),
            seen: Arc::clone(&seen),
        };
        let schema = ApiSchema::for_version("v1.7.0").unwrap();
        (ManagementClient::new(schema, Box::new(transport)), seen)
    }

    #[tokio::test]
    async fn test_get_info_decodes_response() {
        let (client, seen) = client(vec![Ok(ApiResponse::new(
            200,
            br#"{"id":"a1","state":"Running","vmm_version":"1.7.0","app_name":"Firecracker"}"#.to_vec(),
        ))]);
        let info = client.get_info().await.unwrap();
        assert_eq!(info.vmm_version, "1.7.0");
        assert_eq!(seen.lock()[0].path, "/");
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_info_is_protocol_error() {
        let (client, _) = client(vec![
            Ok(ApiResponse::new(200, b"not json".to_vec())),
            Ok(ApiResponse::new(200, br#"{"id":"a1"}"#.to_vec())),
            Ok(ApiResponse::new(200, Vec::new())),
        ]);
        for _ in 0..3 {
            let err = client.get_info().await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ProtocolError);
        }
    }

    #[tokio::test]
    async fn test_closed_channel_is_transport_error() {
        let (client, _) = client(vec![]);
        let err = client.get_info().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }

    #[tokio::test]
    async fn test_fault_message_surfaces() {
        let (client, _) = client(vec![Ok(ApiResponse::new(
            400,
            br#"{"fault_message":"Invalid request method"}"#.to_vec(),
        ))]);
        let err = client.update_state(StateTarget::Paused).await.unwrap_err();
        match err {
            FlintError::Api {
                status,
                fault_message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(fault_message, "Invalid request method");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_without_fault_body_is_protocol_error() {
        let (client, _) = client(vec![Ok(ApiResponse::new(500, b"<html>".to_vec()))]);
        let err = client.perform_action(ActionType::FlushMetrics).await.unwrap_err();
        assert!(matches!(err, FlintError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_version_and_machine_config() {
        let (client, _) = client(vec![
            Ok(ApiResponse::new(200, br#"{"firecracker_version":"1.7.0"}"#.to_vec())),
            Ok(ApiResponse::new(
                200,
                br#"{"vcpu_count":2,"mem_size_mib":1024,"smt":false}"#.to_vec(),
            )),
        ]);
        assert_eq!(client.get_version().await.unwrap(), "1.7.0");
        let machine = client.get_machine_config().await.unwrap();
        assert_eq!(machine, VmMachineConfiguration::new(1024, 2));
    }
}
