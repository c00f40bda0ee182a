//! Carriers for control-protocol requests.

use super::protocol::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use bytes::Bytes;
use flintvm_shared::{FlintError, FlintResult};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::SendRequest;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;

/// A request/response channel to one hypervisor.
///
/// Implementations are not required to support concurrent requests; the
/// management client never issues more than one at a time.
#[async_trait]
pub trait ApiTransport: Send {
    async fn send(&mut self, request: ApiRequest) -> FlintResult<ApiResponse>;
}

/// HTTP/1.1 over the hypervisor's Unix domain socket.
pub struct UnixApiTransport {
    socket_path: PathBuf,
    sender: SendRequest<Full<Bytes>>,
    request_timeout: Duration,
}

impl UnixApiTransport {
    pub async fn connect(socket_path: &Path, request_timeout: Duration) -> FlintResult<Self> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            FlintError::Transport(format!(
                "failed to connect to {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| FlintError::Transport(format!("HTTP handshake failed: {e}")))?;

        let socket = socket_path.display().to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(socket = %socket, "API connection closed: {}", e);
            }
        });

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            sender,
            request_timeout,
        })
    }

    fn build(request: &ApiRequest) -> FlintResult<Request<Full<Bytes>>> {
        let method = match request.method {
            super::ApiMethod::Get => Method::GET,
            super::ApiMethod::Put => Method::PUT,
            super::ApiMethod::Patch => Method::PATCH,
        };

        let mut builder = Request::builder()
            .method(method)
            .uri(request.path.as_str())
            .header(HOST, "localhost");

        let body = match &request.body {
            Some(value) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(value)?)
            }
            None => Bytes::new(),
        };

        builder
            .body(Full::new(body))
            .map_err(|e| FlintError::Protocol(format!("invalid request {}: {}", request.path, e)))
    }

    async fn round_trip(&mut self, request: Request<Full<Bytes>>) -> FlintResult<ApiResponse> {
        self.sender
            .ready()
            .await
            .map_err(|e| FlintError::Transport(format!("channel closed: {e}")))?;

        let response = self
            .sender
            .send_request(request)
            .await
            .map_err(|e| FlintError::Transport(format!("request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| FlintError::Transport(format!("failed to read response body: {e}")))?
            .to_bytes();

        Ok(ApiResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl ApiTransport for UnixApiTransport {
    async fn send(&mut self, request: ApiRequest) -> FlintResult<ApiResponse> {
        let http_request = Self::build(&request)?;
        let timeout = self.request_timeout;

        match tokio::time::timeout(timeout, self.round_trip(http_request)).await {
            Ok(result) => result,
            Err(_) => Err(FlintError::Transport(format!(
                "{} {} on {} timed out after {}ms",
                request.method,
                request.path,
                self.socket_path.display(),
                timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::ApiMethod;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    /// Accept one connection, capture the request head, answer with `reply`.
    async fn serve_once(listener: UnixListener, reply: &'static str) -> String {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut read = 0;
        loop {
            let n = stream.read(&mut buf[read..]).await.unwrap();
            read += n;
            let text = String::from_utf8_lossy(&buf[..read]).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text
                    .lines()
                    .map(|l| l.to_ascii_lowercase())
                    .find_map(|l| l.strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if read >= head_end + 4 + content_length {
                    stream.write_all(reply.as_bytes()).await.unwrap();
                    return text;
                }
            }
            if n == 0 {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn test_put_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n",
        ));

        let mut transport = UnixApiTransport::connect(&path, Duration::from_secs(2))
            .await
            .unwrap();
        let response = transport
            .send(ApiRequest::put(
                "/actions",
                serde_json::json!({"action_type": "InstanceStart"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());

        let seen = server.await.unwrap();
        assert!(seen.starts_with("PUT /actions HTTP/1.1"));
        assert!(seen.contains("InstanceStart"));
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = UnixApiTransport::connect(&dir.path().join("absent.sock"), Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), flintvm_shared::ErrorKind::TransportError);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mut transport = UnixApiTransport::connect(&path, Duration::from_millis(100))
            .await
            .unwrap();
        let err = transport.send(ApiRequest::get("/")).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(ApiMethod::Get.as_str(), "GET");
    }
}
