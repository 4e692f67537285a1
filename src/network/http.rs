//! Conversion between hyper transport objects and serializable types

use bytes::{Buf, BufMut, BytesMut};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use tracing::warn;

use crate::config::{HeaderPropagation, LimitsConfig};
use crate::storage::{Headers, SerializableRequest, SerializableResponse};
use crate::{ReelError, Result};

/// Headers that describe one connection hop and are never replayed
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// HTTP conversions for the proxy surface
pub struct HttpHandler;

impl HttpHandler {
    /// Capture an inbound request, buffering its body once
    ///
    /// # Errors
    ///
    /// Returns error if the request exceeds the configured limits or the body
    /// cannot be read
    pub async fn capture_request<B>(
        request: Request<B>,
        limits: &LimitsConfig,
    ) -> Result<SerializableRequest>
    where
        B: hyper::body::Body,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        Self::validate_request(&request, limits)?;

        let (parts, body) = request.into_parts();

        let uri = parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), ToString::to_string);

        let headers: Headers = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = Self::read_body(body, limits.max_request_size).await?;

        Ok(SerializableRequest {
            method: parts.method.as_str().to_string(),
            uri,
            headers,
            body,
        })
    }

    /// Validate an incoming request against the limits
    ///
    /// # Errors
    ///
    /// Returns error if request is too large or has too many headers
    pub fn validate_request<B>(request: &Request<B>, limits: &LimitsConfig) -> Result<()> {
        if let Some(content_length) = request.headers().get(CONTENT_LENGTH) {
            if let Ok(length_str) = content_length.to_str() {
                if let Ok(length) = length_str.parse::<usize>() {
                    if length > limits.max_request_size {
                        return Err(ReelError::DataTooLarge {
                            size: length,
                            limit: limits.max_request_size,
                        });
                    }
                }
            }
        }

        let header_count = request.headers().len();
        if header_count > limits.max_headers {
            return Err(ReelError::InvalidRequest(format!(
                "Too many headers: {header_count} > {}",
                limits.max_headers
            )));
        }

        Ok(())
    }

    /// Read request body with size limit
    ///
    /// Reading stops at the first frame that crosses the limit; the reported
    /// size is what had arrived by then.
    ///
    /// # Errors
    ///
    /// Returns error if body is too large or read fails
    pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
    where
        B: hyper::body::Body,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let mut body = std::pin::pin!(body);
        let mut buffer = BytesMut::new();

        while let Some(frame) = body.frame().await {
            let frame =
                frame.map_err(|e| ReelError::InvalidRequest(format!("Failed to read body: {e}")))?;
            let Ok(data) = frame.into_data() else {
                continue;
            };

            let received = buffer.len() + data.remaining();
            if received > max_size {
                return Err(ReelError::DataTooLarge {
                    size: received,
                    limit: max_size,
                });
            }
            buffer.put(data);
        }

        Ok(buffer.freeze())
    }

    /// Build the caller-facing response
    ///
    /// Status, `Content-Type` and body are always carried; other headers
    /// follow the propagation policy.
    #[must_use]
    pub fn build_response(
        response: &SerializableResponse,
        propagation: HeaderPropagation,
    ) -> Response<Full<Bytes>> {
        let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
            warn!("Recorded status {} is not valid HTTP", response.status);
            StatusCode::BAD_GATEWAY
        });

        let mut http_response = Response::new(Full::new(response.body.clone()));
        *http_response.status_mut() = status;
        let headers = http_response.headers_mut();

        for (name, values) in response.headers.iter() {
            let lower = name.to_ascii_lowercase();
            let wanted = match propagation {
                HeaderPropagation::Minimal => lower == CONTENT_TYPE.as_str(),
                HeaderPropagation::Full => !HOP_BY_HOP.contains(&lower.as_str()),
            };
            if !wanted {
                continue;
            }

            let Ok(header_name) = HeaderName::from_bytes(lower.as_bytes()) else {
                warn!("Dropping invalid header name '{name}'");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(header_name.clone(), value);
                    }
                    Err(_) => warn!("Dropping invalid value for header '{name}'"),
                }
            }
        }

        http_response
    }

    /// Create a plain-text response
    #[must_use]
    pub fn create_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Status used to report an error to the caller
    #[must_use]
    pub fn error_status(error: &ReelError) -> StatusCode {
        match error {
            ReelError::NoMatch { .. } | ReelError::Exhausted { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ReelError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ReelError::RecorderClosed => StatusCode::SERVICE_UNAVAILABLE,
            ReelError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ReelError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ReelError::FileNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Create an error response with a descriptive body
    #[must_use]
    pub fn error_response(error: &ReelError) -> Response<Full<Bytes>> {
        Self::create_response(Self::error_status(error), &format!("Error: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn recorded() -> SerializableResponse {
        let mut response = SerializableResponse::new(201, &b"{\"ok\":true}"[..]);
        response.headers.append("Content-Type", "application/json");
        response.headers.append("X-Request-Id", "req_123");
        response.headers.append("Transfer-Encoding", "chunked");
        response.headers.append("Connection", "keep-alive");
        response
    }

    #[tokio::test]
    async fn test_capture_request() {
        let request = Request::builder()
            .method("POST")
            .uri("http://localhost:8080/v1/charges?expand=customer")
            .header("Authorization", "Bearer sk_test")
            .header("Accept", "application/json")
            .body(Full::new(Bytes::from_static(b"amount=100")))
            .unwrap();

        let captured = HttpHandler::capture_request(request, &LimitsConfig::default())
            .await
            .unwrap();

        assert_eq!(captured.method, "POST");
        assert_eq!(captured.uri, "/v1/charges?expand=customer");
        assert_eq!(captured.headers.first("authorization"), Some("Bearer sk_test"));
        assert_eq!(captured.body.as_ref(), b"amount=100");
    }

    #[tokio::test]
    async fn test_validate_request_too_large() {
        let request = Request::builder()
            .method("POST")
            .uri("/test")
            .header(CONTENT_LENGTH, "10000")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let limits = LimitsConfig {
            max_request_size: 1024,
            ..Default::default()
        };
        assert!(matches!(
            HttpHandler::validate_request(&request, &limits),
            Err(ReelError::DataTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_too_many_headers() {
        let request = Request::builder()
            .uri("/test")
            .header("a", "1")
            .header("b", "2")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let limits = LimitsConfig {
            max_headers: 1,
            ..Default::default()
        };
        assert!(matches!(
            HttpHandler::validate_request(&request, &limits),
            Err(ReelError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_read_body() {
        let data = Bytes::from("test data");
        let result = HttpHandler::read_body(Full::new(data.clone()), 1024).await;
        assert_eq!(result.unwrap(), data);
    }

    #[tokio::test]
    async fn test_read_body_too_large() {
        let body = Full::new(Bytes::from("test data that is too long"));
        let result = HttpHandler::read_body(body, 5).await;
        assert!(matches!(
            result,
            Err(ReelError::DataTooLarge { size: 26, limit: 5 })
        ));
    }

    #[tokio::test]
    async fn test_minimal_propagation() {
        let response = HttpHandler::build_response(&recorded(), HeaderPropagation::Minimal);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(body_text(response).await, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_full_propagation_skips_hop_by_hop() {
        let response = HttpHandler::build_response(&recorded(), HeaderPropagation::Full);

        assert_eq!(response.headers()["x-request-id"], "req_123");
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert!(response.headers().get("transfer-encoding").is_none());
        assert!(response.headers().get("connection").is_none());
    }

    #[tokio::test]
    async fn test_no_recorded_match_response() {
        let response = HttpHandler::error_response(&ReelError::Exhausted { consumed: 1 });

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(body.contains("Cassette exhausted"), "body was {body}");
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            HttpHandler::error_status(&ReelError::UpstreamUnavailable("refused".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            HttpHandler::error_status(&ReelError::RecorderClosed),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            HttpHandler::error_status(&ReelError::FileNotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
    }
}
