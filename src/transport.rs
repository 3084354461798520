//! Outbound transport
//!
//! Serializes outbound messages, posts them to the workout endpoint with the
//! message's label as the `state` query parameter, and reports the outcome.
//! Only the most recently issued request is tracked, so `cancel_last` can
//! abandon a stale update before the session's end event goes out.

use crate::config::RelayConfig;
use crate::error::WorkoutError;
use crate::types::OutboundMessage;
use crate::{PRODUCER_NAME, RELAY_VERSION};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tracing::debug;

/// Sends messages to the workout server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message and wait for the outcome.
    ///
    /// Returns the 2xx status on success. Non-2xx responses come back as
    /// [`WorkoutError::Server`]; connection failures as [`WorkoutError::Transport`].
    async fn send_now(&self, message: &OutboundMessage) -> Result<u16, WorkoutError>;

    /// Cancel the most recently issued request. No-op when nothing is outstanding.
    fn cancel_last(&self);
}

/// Aborts a request task when the caller stops waiting on it
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// HTTP transport backed by `reqwest`
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    last_request: Mutex<Option<AbortHandle>>,
}

impl HttpTransport {
    pub fn new(config: &RelayConfig) -> Result<Self, WorkoutError> {
        let endpoint = config.endpoint()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("{PRODUCER_NAME}/{RELAY_VERSION}"))
            .build()
            .map_err(|e| WorkoutError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            last_request: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn last_request(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_now(&self, message: &OutboundMessage) -> Result<u16, WorkoutError> {
        let body = message.to_json_bytes()?;
        let label = message.label();

        debug!(label = %label, endpoint = %self.endpoint, "Sending workout message");

        let request = self
            .client
            .post(self.endpoint.clone())
            .query(&[("state", label.as_str())])
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let task = tokio::spawn(async move { request.send().await });
        // Replaces bookkeeping for any previous request without cancelling it.
        *self.last_request() = Some(task.abort_handle());
        let _guard = AbortOnDrop(task.abort_handle());

        let response = match task.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(WorkoutError::Transport(e.to_string())),
            Err(e) if e.is_cancelled() => {
                return Err(WorkoutError::Transport("request cancelled".to_string()))
            }
            Err(e) => return Err(WorkoutError::Transport(e.to_string())),
        };

        let status = response.status();
        debug!(label = %label, status = status.as_u16(), "Workout message answered");

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(WorkoutError::Server {
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("Unknown Status")
                    .to_string(),
            })
        }
    }

    fn cancel_last(&self) {
        if let Some(handle) = self.last_request().take() {
            debug!("Cancelling last outstanding request");
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NO_STATUS;
    use crate::types::{ReadingUpdate, SessionEvent, SessionState};
    use chrono::Utc;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Accept one connection, answer with `status_line`, and hand back the raw request
    async fn serve_once(status_line: &'static str) -> (SocketAddr, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            request
        });
        (addr, handle)
    }

    /// Accept one connection, signal once the request is read, then never answer
    async fn serve_silently() -> (SocketAddr, oneshot::Receiver<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            let _ = tx.send(());
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });
        (addr, rx)
    }

    fn transport_for(addr: SocketAddr) -> HttpTransport {
        HttpTransport::new(&RelayConfig::with_base_url(format!("http://{addr}"))).unwrap()
    }

    fn start_event() -> OutboundMessage {
        let now = Utc::now();
        OutboundMessage::from(SessionEvent {
            start_date: now,
            end_date: now,
            state: SessionState::Running,
        })
    }

    #[tokio::test]
    async fn test_success_returns_status() {
        let (addr, server) = serve_once("200 OK").await;
        let transport = transport_for(addr);

        let status = transport
            .send_now(&OutboundMessage::from(ReadingUpdate { heart_rate: 72 }))
            .await
            .unwrap();
        assert_eq!(status, 200);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/v1/workout?state=update HTTP/1.1"));
        assert!(request
            .to_lowercase()
            .contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"heartRate":72}"#));
    }

    #[tokio::test]
    async fn test_session_event_uses_start_label() {
        let (addr, server) = serve_once("204 No Content").await;
        let transport = transport_for(addr);

        assert_eq!(transport.send_now(&start_event()).await.unwrap(), 204);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/v1/workout?state=start "));
        assert!(request.contains(r#""state":"running""#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_server_error() {
        let (addr, _server) = serve_once("503 Service Unavailable").await;
        let transport = transport_for(addr);

        let err = transport.send_now(&start_event()).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        match err {
            WorkoutError::Server { status, reason } => {
                assert_eq!(status, 503);
                assert_eq!(reason, "Service Unavailable");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_failure_reports_no_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = transport_for(addr);
        let err = transport.send_now(&start_event()).await.unwrap_err();
        assert!(matches!(err, WorkoutError::Transport(_)));
        assert_eq!(err.status_code(), NO_STATUS);
    }

    #[tokio::test]
    async fn test_cancel_last_abandons_outstanding_request() {
        let (addr, accepted) = serve_silently().await;
        let transport = Arc::new(transport_for(addr));

        let sender = Arc::clone(&transport);
        let pending = tokio::spawn(async move {
            sender
                .send_now(&OutboundMessage::from(ReadingUpdate { heart_rate: 80 }))
                .await
        });

        accepted.await.unwrap();
        transport.cancel_last();

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Transport failure: request cancelled");
        assert_eq!(err.status_code(), NO_STATUS);
    }

    #[tokio::test]
    async fn test_dropping_send_aborts_request() {
        let (addr, accepted) = serve_silently().await;
        let transport = Arc::new(transport_for(addr));

        let sender = Arc::clone(&transport);
        let pending = tokio::spawn(async move {
            sender
                .send_now(&OutboundMessage::from(ReadingUpdate { heart_rate: 80 }))
                .await
        });

        accepted.await.unwrap();
        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());

        let request = transport.last_request().clone().unwrap();
        for _ in 0..100 {
            if request.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(request.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_last_without_request_is_noop() {
        let transport = HttpTransport::new(&RelayConfig::default()).unwrap();
        transport.cancel_last();
        transport.cancel_last();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (addr, _accepted) = serve_silently().await;
        let config = RelayConfig {
            base_url: format!("http://{addr}"),
            request_timeout_ms: 200,
            ..RelayConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();

        let err = transport.send_now(&start_event()).await.unwrap_err();
        assert!(matches!(err, WorkoutError::Transport(_)));
    }
}
