//! HTTP transport layer for delivering envelopes to the collector

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// A single outbound request built by the sink
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub body: String,
    pub headers: BTreeMap<String, String>,
}

/// Opaque success result. The sink never inspects it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug)]
pub enum TransportError {
    /// The request did not complete within the configured timeout
    Timeout(Duration),

    /// The collector answered with a non-2xx status
    Status { status: u16, message: String },

    /// The request could not be sent or the response could not be read
    Request(reqwest::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout(limit) => {
                write!(f, "Request timed out after {}ms", limit.as_millis())
            }
            TransportError::Status { message, .. } => write!(f, "{}", message),
            TransportError::Request(err) => write!(f, "HTTP error: {}", err),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(err)
    }
}

/// Delivery capability used by the sink
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        (**self).send(request).await
    }
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(http_timeout: Duration) -> std::result::Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("good_http_sink/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            timeout: http_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Request(err)
        }
    }

    /// Map the collector's answer to a result
    async fn handle_response(
        &self,
        response: Response,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(|e| self.classify(e))?;
            debug!("Collector accepted envelope with status {}", status);
            return Ok(TransportResponse {
                status: status.as_u16(),
                body,
            });
        }

        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = match status.as_u16() {
            400 => format!("Bad request: {}", error_body),
            401 => format!("Unauthorized: {}", error_body),
            403 => format!("Forbidden: {}", error_body),
            404 => format!("Collector endpoint not found: {}", error_body),
            413 => format!("Envelope too large: {}", error_body),
            429 => format!("Rate limited: {}", error_body),
            500..=599 => format!("Collector server error {}: {}", status, error_body),
            _ => format!("Unexpected response {}: {}", status, error_body),
        };

        Err(TransportError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .body(request.body);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        // The limit covers reading the body as well as the headers
        let exchange = async {
            let response = builder.send().await.map_err(|e| self.classify(e))?;
            self.handle_response(response).await
        };

        timeout(self.timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        let transport = HttpTransport::new(Duration::from_secs(10)).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_error_display() {
        let timeout = TransportError::Timeout(Duration::from_millis(1500));
        assert_eq!(timeout.to_string(), "Request timed out after 1500ms");

        let status = TransportError::Status {
            status: 503,
            message: "Collector server error 503 Service Unavailable: down".to_string(),
        };
        assert!(status.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_unreachable_collector() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let result = transport
            .send(TransportRequest {
                method: Method::POST,
                url: "http://127.0.0.1:9/ingest".to_string(),
                body: "{}".to_string(),
                headers: BTreeMap::new(),
            })
            .await;

        assert!(result.is_err());
    }
}
