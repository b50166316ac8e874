use crate::util::is_local_endpoint_url;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Url;
use std::pin::Pin;

const LAST_EVENT_ID: &str = "Last-Event-ID";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("cannot reach event stream '{url}': {reason}")]
    Unreachable { url: String, reason: String },
    #[error("event stream '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("event stream '{url}' timed out: {reason}")]
    Timeout { url: String, reason: String },
    #[error("event stream '{url}' closed: {reason}")]
    Closed { url: String, reason: String },
    /// A hiccup that did not end the stream. [`HttpTransport`] never yields
    /// this: a reqwest body error ends the response, so every HTTP failure is
    /// terminal. Transports that can recover mid-stream (and the mock) use it.
    #[error("transient stream error: {0}")]
    Transient(String),
}

impl TransportError {
    /// Terminal errors end the current connection and go through reconnection.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportError::Transient(_))
    }
}

/// Opens the one-way event stream for a workflow.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// `last_event_id` is the id of the last message seen on a previous
    /// connection, when the caller wants the server to resume after it.
    async fn open(&self, url: &Url, last_event_id: Option<&str>)
        -> Result<ByteStream, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open(
        &self,
        url: &Url,
        last_event_id: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        let request_url = url.to_string();
        tracing::debug!(url = %request_url, last_event_id, "opening event stream");

        let mut request = self
            .http
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID, id);
        }
        let response = request
            .send()
            .await
            .map_err(|error| map_transport_error(error, &request_url))?
            .error_for_status()
            .map_err(|error| map_transport_error(error, &request_url))?;

        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| map_transport_error(error, &request_url))
        });
        Ok(Box::pin(stream))
    }
}

fn map_transport_error(error: reqwest::Error, request_url: &str) -> TransportError {
    let url = request_url.to_string();
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return TransportError::Unreachable {
            url,
            reason: format!(
                "{error}. Start the local agent server or update RUNWIRE_BASE_URL."
            ),
        };
    }
    if error.is_connect() {
        return TransportError::Unreachable {
            url,
            reason: error.to_string(),
        };
    }
    if error.is_timeout() {
        return TransportError::Timeout {
            url,
            reason: error.to_string(),
        };
    }
    if let Some(status) = error.status() {
        return TransportError::Status {
            url,
            status: status.as_u16(),
        };
    }
    TransportError::Closed {
        url,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_keep_the_stream() {
        assert!(!TransportError::Transient("bad chunk".into()).is_terminal());
        assert!(TransportError::Status {
            url: "http://localhost:8000/stream/workflow/wf".into(),
            status: 503,
        }
        .is_terminal());
        assert!(TransportError::Closed {
            url: "http://localhost:8000".into(),
            reason: "eof".into(),
        }
        .is_terminal());
    }

    #[tokio::test]
    async fn test_truncated_http_body_is_terminal() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n5\r\n: hi\n\r\n",
                )
                .await
                .expect("write");
            // Dropping the socket mid-body truncates the chunked response.
        });

        let url = Url::parse(&format!("http://{address}/stream/workflow/wf")).expect("url");
        let mut stream = HttpTransport::new().open(&url, None).await.expect("open");
        let mut errors = Vec::new();
        while let Some(item) = stream.next().await {
            if let Err(error) = item {
                errors.push(error);
            }
        }
        server.await.expect("server task");

        assert!(!errors.is_empty(), "a truncated body must surface an error");
        assert!(errors.iter().all(TransportError::is_terminal));
    }

    #[tokio::test]
    async fn test_open_sends_last_event_id_when_resuming() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = vec![0u8; 4096];
            let read = socket.read(&mut request).await.expect("read");
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .expect("write");
            String::from_utf8_lossy(&request[..read]).to_ascii_lowercase()
        });

        let url = Url::parse(&format!("http://{address}/stream/workflow/wf")).expect("url");
        let mut stream = HttpTransport::new()
            .open(&url, Some("evt-41"))
            .await
            .expect("open");
        while stream.next().await.is_some() {}
        let request = server.await.expect("server task");

        assert!(request.contains("last-event-id: evt-41"));
        assert!(request.contains("accept: text/event-stream"));
    }

    #[tokio::test]
    async fn test_unreachable_local_endpoint_mentions_base_url_env() {
        // Port 9 (discard) is closed on loopback in test environments.
        let url = Url::parse("http://127.0.0.1:9/stream/workflow/wf").expect("url");
        let error = match HttpTransport::new().open(&url, None).await {
            Ok(_) => panic!("nothing listens on the discard port"),
            Err(error) => error,
        };

        assert!(error.is_terminal());
        if let TransportError::Unreachable { reason, .. } = &error {
            assert!(reason.contains("RUNWIRE_BASE_URL"));
        }
    }
}
