//! HTTP(S) repositories.

use std::time::Duration;

use artifacts::{Repository, RepositoryKind, RepositoryTransport, TransportError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};

/// Largest artifact accepted by default (256 MiB).
pub const DEFAULT_MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// Client settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// Time allowed for a whole request, body included.
    pub request_timeout: Duration,
    /// Responses larger than this are abandoned.
    pub max_body_bytes: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: concat!("hoist/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// The HTTP client could not be constructed.
#[derive(Debug, Error)]
#[error("failed to build HTTP client: {0}")]
pub struct TransportSetupError(#[from] reqwest::Error);

/// Fetches repository files with HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    max_body_bytes: u64,
}

impl HttpTransport {
    /// Builds a transport with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`TransportSetupError`] if the TLS backend cannot be
    /// initialised.
    pub fn new(config: &HttpConfig) -> Result<Self, TransportSetupError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }

    async fn read_body(&self, mut response: Response, url: &str) -> Result<Vec<u8>, TransportError> {
        if let Some(declared) = response.content_length() {
            if declared > self.max_body_bytes {
                return Err(too_large(url, self.max_body_bytes));
            }
        }
        let capacity = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        while let Some(chunk) = response.chunk().await.map_err(|e| connection(&e))? {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(too_large(url, self.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl RepositoryTransport for HttpTransport {
    #[instrument(skip(self, repository), fields(repository = %repository.id()))]
    async fn get(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, TransportError> {
        if repository.kind() != RepositoryKind::RemoteHttp {
            return Err(TransportError::Unsupported {
                location: repository.base().to_string(),
            });
        }
        let url = repository.location_of(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| connection(&e))?;

        let status = response.status();
        debug!(%url, status = status.as_u16(), "Repository response");
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(TransportError::NotFound);
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                code: status.as_u16(),
                retry_after: retry_after(&response),
            });
        }
        self.read_body(response, &url).await
    }
}

/// `Retry-After` in its delay-seconds form. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn connection(error: &reqwest::Error) -> TransportError {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connect failed"
    } else if error.is_body() || error.is_decode() {
        "body read failed"
    } else {
        "request failed"
    };
    TransportError::Connection {
        message: format!("{kind}: {error}"),
    }
}

fn too_large(url: &str, limit: u64) -> TransportError {
    TransportError::Connection {
        message: format!("{url} exceeds the {limit} byte response limit"),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Serves one canned response per accepted connection and reports the
    /// request lines it saw.
    async fn serve(responses: Vec<String>) -> (Repository, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let text = String::from_utf8_lossy(&request);
                seen.push(text.lines().next().unwrap_or_default().to_string());
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });
        let repository =
            Repository::new("local", &format!("http://{address}/maven2"), 0).unwrap();
        (repository, server)
    }

    fn response(status: &str, headers: &[&str], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {status}\r\nconnection: close\r\n");
        for header in headers {
            out.push_str(header);
            out.push_str("\r\n");
        }
        out.push_str(&format!("content-length: {}\r\n\r\n{body}", body.len()));
        out
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(&HttpConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn returns_the_body_of_a_successful_response() {
        let (repository, server) = serve(vec![response("200 OK", &[], "jar-bytes")]).await;

        let body = transport()
            .get(&repository, "com/acme/widget/1.0/widget-1.0.jar")
            .await
            .unwrap();

        assert_eq!(body, b"jar-bytes");
        assert_eq!(
            server.await.unwrap(),
            vec!["GET /maven2/com/acme/widget/1.0/widget-1.0.jar HTTP/1.1".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (repository, _server) = serve(vec![response("404 Not Found", &[], "")]).await;

        let err = transport().get(&repository, "a.pom").await.unwrap_err();

        assert_eq!(err, TransportError::NotFound);
    }

    #[tokio::test]
    async fn throttling_carries_retry_after() {
        let (repository, _server) = serve(vec![response(
            "429 Too Many Requests",
            &["retry-after: 7"],
            "slow down",
        )])
        .await;

        let err = transport().get(&repository, "a.jar").await.unwrap_err();

        assert_eq!(
            err,
            TransportError::Status {
                code: 429,
                retry_after: Some(Duration::from_secs(7)),
            }
        );
    }

    #[tokio::test]
    async fn server_error_without_retry_after() {
        let (repository, _server) = serve(vec![response("503 Service Unavailable", &[], "")]).await;

        let err = transport().get(&repository, "a.jar").await.unwrap_err();

        assert_eq!(
            err,
            TransportError::Status {
                code: 503,
                retry_after: None,
            }
        );
    }

    #[tokio::test]
    async fn oversized_body_is_abandoned() {
        let (repository, _server) = serve(vec![response("200 OK", &[], "0123456789")]).await;
        let transport = HttpTransport::new(&HttpConfig {
            max_body_bytes: 4,
            ..HttpConfig::default()
        })
        .unwrap();

        let err = transport.get(&repository, "a.jar").await.unwrap_err();

        assert!(matches!(err, TransportError::Connection { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let repository = Repository::new("gone", &format!("http://{address}/"), 0).unwrap();

        let err = transport().get(&repository, "a.jar").await.unwrap_err();

        assert!(matches!(err, TransportError::Connection { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn filesystem_repositories_are_unsupported() {
        let repository = Repository::new("m2", "/tmp/m2", 0).unwrap();

        let err = transport().get(&repository, "a.jar").await.unwrap_err();

        assert!(matches!(err, TransportError::Unsupported { .. }));
    }
}
