//! HTTP webhook implementation of [`GenerationClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::debug;

use super::{AcceptancePolicy, GenerationAck, GenerationClient, GenerationError, GenerationRequest};
use crate::config::GenerationConfig;
use crate::metrics;

/// Posts generation requests as JSON to a configured webhook.
pub struct WebhookClient {
    client: Client,
    endpoint: String,
    acceptance: AcceptancePolicy,
    auth_token: Option<String>,
}

impl WebhookClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| GenerationError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            acceptance: config.acceptance,
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl GenerationClient for WebhookClient {
    async fn invoke(&self, request: &GenerationRequest) -> Result<GenerationAck, GenerationError> {
        debug!(
            artifact_key = %request.artifact_key,
            correlation_token = %request.correlation_token,
            "Posting generation request"
        );

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(ref token) = self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let timer = metrics::GENERATION_CALL_DURATION.start_timer();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Connection(e.to_string())
            }
        });
        timer.observe_duration();
        let response = response?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GenerationError::RateLimited {
                retry_after: parse_retry_after(response.headers()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::Connection(e.to_string())
            }
        })?;

        self.acceptance.evaluate(status.as_u16(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response, handing back the raw request.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= split + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{}/webhook", addr), handle)
    }

    fn config(endpoint: String, acceptance: AcceptancePolicy) -> GenerationConfig {
        GenerationConfig {
            endpoint,
            timeout_secs: 5,
            acceptance,
            auth_token: Some("tok".to_string()),
        }
    }

    #[tokio::test]
    async fn test_invoke_posts_payload_and_accepts_success_flag() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 16\r\nConnection: close\r\n\r\n{\"success\":true}",
        )
        .await;
        let client = WebhookClient::new(&config(url, AcceptancePolicy::SuccessFlag)).unwrap();

        let request = GenerationRequest::new("http://img/a.png", "A1-1", "studio light");
        let ack = client.invoke(&request).await.unwrap();
        assert_eq!(ack.status, 200);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /webhook"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer tok"));
        assert!(raw.contains("\"artifactKey\":\"A1-1\""));
        assert!(raw.contains("\"asset\":\"http://img/a.png\""));
        assert!(raw.contains(&request.correlation_token));
    }

    #[tokio::test]
    async fn test_invoke_rejects_missing_flag() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 17\r\nConnection: close\r\n\r\n{\"success\":false}",
        )
        .await;
        let client = WebhookClient::new(&config(url, AcceptancePolicy::SuccessFlag)).unwrap();

        let err = client
            .invoke(&GenerationRequest::new("a", "A1-1", "d"))
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::NotAccepted);
    }

    #[tokio::test]
    async fn test_invoke_maps_rate_limit() {
        let (url, _server) = serve_once(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 30\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let client = WebhookClient::new(&config(url, AcceptancePolicy::Status)).unwrap();

        let err = client
            .invoke(&GenerationRequest::new("a", "A1-1", "d"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_maps_server_error() {
        let (url, _server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        )
        .await;
        let client = WebhookClient::new(&config(url, AcceptancePolicy::Status)).unwrap();

        let err = client
            .invoke(&GenerationRequest::new("a", "A1-1", "d"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::Rejected {
                status: 503,
                body: "busy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = WebhookClient::new(&config(
            format!("http://{}/webhook", addr),
            AcceptancePolicy::Status,
        ))
        .unwrap();
        let err = client
            .invoke(&GenerationRequest::new("a", "A1-1", "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Connection(_)));
    }
}
