//! Axum event receiver
//!
//! `POST /` takes an `authenticate` CloudEvent and answers with an
//! `authenticate-response` event, or publishes it to the response sink when
//! one is configured.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prost::Message as _;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::dto::{ErrorResponse, HealthResponse, Message};
use super::proto::{AuthenticateRequest, AuthenticateResponse};
use crate::error::AuthError;
use crate::service::{AuthRequest, Authenticator, Decision};
use crate::transport::{Event, EventTransport};

/// Event type of the reply
pub const RESPONSE_EVENT_TYPE: &str = "authenticate-response";

/// Application state shared across handlers
pub struct AppState<T> {
    pub authenticator: Authenticator<T>,
    pub transport: Arc<T>,
    /// Publish responses here instead of replying inline.
    pub sink: Option<String>,
    pub source: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn reject(err: AuthError) -> ApiError {
    let status = err.status_code();
    if status.is_server_error() {
        error!("Authentication failed: {}", err);
    } else {
        warn!("Authentication rejected: {}", err);
    }
    (status, Json(ErrorResponse::new(&err.to_string(), err.code())))
}

/// Create the HTTP router
pub fn create_router<T: EventTransport>(state: Arc<AppState<T>>, body_limit: usize) -> Router {
    Router::new()
        .route("/", post(receive_handler::<T>))
        .route("/health", get(health_handler::<T>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn decode_request(event: &Event) -> Result<AuthRequest, AuthError> {
    let message: Message = event
        .data_as()
        .map_err(|e| AuthError::Decode(format!("failed to convert data: {}", e)))?;
    let request = AuthenticateRequest::decode(message.payload.as_slice())
        .map_err(|e| AuthError::Decode(format!("failed to deserialize protobuf: {}", e)))?;
    AuthRequest::try_from(request)
}

fn response_event(source: &str, decision: &Decision) -> Result<Event, AuthError> {
    let payload = AuthenticateResponse::from(decision).encode_to_vec();
    Event::new(RESPONSE_EVENT_TYPE, source)
        .with_data(&Message { payload })
        .map_err(|e| AuthError::Serialization(e.to_string()))
}

/// Authenticate handler
async fn receive_handler<T: EventTransport>(
    State(state): State<Arc<AppState<T>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let event = Event::from_http(&headers, &body)
        .map_err(|e| reject(AuthError::Decode(e.to_string())))?;
    info!("Received {} event {} from {}", event.event_type, event.id, event.source);

    let request = decode_request(&event).map_err(reject)?;
    let decision = state
        .authenticator
        .authenticate(request)
        .await
        .map_err(reject)?;
    let reply = response_event(&state.source, &decision).map_err(reject)?;

    if let Some(sink) = &state.sink {
        state
            .transport
            .send(sink, reply)
            .await
            .map_err(|e| reject(AuthError::Publish(e)))?;
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    let (reply_headers, reply_body) = reply
        .to_http()
        .map_err(|e| reject(AuthError::Serialization(e.to_string())))?;
    Ok((StatusCode::OK, reply_headers, reply_body).into_response())
}

/// Health check
async fn health_handler<T: EventTransport>(
    State(state): State<Arc<AppState<T>>>,
) -> Json<HealthResponse> {
    let pool = state.authenticator.pool();
    Json(HealthResponse {
        healthy: pool.is_running(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers: pool.size(),
        idle_workers: pool.available(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use prost::Message as _;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::api::proto::{FaceCoordinates, FaceRequest, Point};
    use crate::service::{AuthSettings, ReferenceFetcher};
    use crate::test_support::{start_pool, tiny_png, Behaviour, FakeTransport, Probe, Reply};
    use crate::transport::event::STRUCTURED;
    use crate::utils::DistanceMetric;

    fn app(reply: Reply, sink: Option<&str>) -> (Router, Arc<FakeTransport>, Probe) {
        let probe = Probe::default();
        let pool = Arc::new(start_pool(2, &probe, vec![0.1, 0.2], Duration::ZERO, Behaviour::Embed));
        let transport = Arc::new(FakeTransport::new(reply));
        let fetcher = ReferenceFetcher::new(
            transport.clone(),
            Some("http://store.local".to_string()),
            "authenticator",
        );
        let settings = AuthSettings {
            threshold: 0.25,
            metric: DistanceMetric::Euclidean,
            deadline: Duration::from_secs(5),
        };
        let state = Arc::new(AppState {
            authenticator: Authenticator::new(pool, fetcher, settings),
            transport: transport.clone(),
            sink: sink.map(str::to_string),
            source: "authenticator".to_string(),
        });
        (create_router(state, 1024 * 1024), transport, probe)
    }

    fn payload() -> Vec<u8> {
        AuthenticateRequest {
            face_request: Some(FaceRequest {
                id: "alice".to_string(),
                face: tiny_png(32, 32),
                face_coordinates: Some(FaceCoordinates {
                    top_left: Some(Point { x: 4, y: 4 }),
                    bottom_right: Some(Point { x: 28, y: 28 }),
                }),
            }),
        }
        .encode_to_vec()
    }

    fn binary_event(data: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("ce-specversion", "1.0")
            .header("ce-id", "req-1")
            .header("ce-type", "authenticate")
            .header("ce-source", "tests")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&data).unwrap()))
            .unwrap()
    }

    async fn decode_reply(response: Response) -> (HeaderMap, AuthenticateResponse) {
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let message: Message = serde_json::from_slice(&body).unwrap();
        let decoded = AuthenticateResponse::decode(message.payload.as_slice()).unwrap();
        (headers, decoded)
    }

    #[tokio::test]
    async fn test_authenticate_binary_event() {
        let (router, transport, probe) = app(Reply::Embedding(vec![0.1, 0.2]), None);
        let data = serde_json::to_value(Message { payload: payload() }).unwrap();

        let response = router.oneshot(binary_event(data)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (headers, reply) = decode_reply(response).await;
        assert_eq!(headers.get("ce-type").unwrap(), RESPONSE_EVENT_TYPE);
        assert_eq!(headers.get("ce-source").unwrap(), "authenticator");
        assert!(reply.decision);
        assert_eq!(reply.score, 0.0);
        assert_eq!(reply.message, "alice authenticated with success");
        assert_eq!(probe.detections(), 0);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_structured_event() {
        let (router, _, _) = app(Reply::Embedding(vec![0.9, 0.9]), None);
        let event = Event::new("authenticate", "tests")
            .with_data(&Message { payload: payload() })
            .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", STRUCTURED)
            .body(Body::from(serde_json::to_vec(&event).unwrap()))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let (_, reply) = decode_reply(response).await;
        assert!(!reply.decision);
        assert_eq!(reply.message, "alice did not match the reference");
    }

    #[tokio::test]
    async fn test_bad_payloads_are_400() {
        let (router, transport, _) = app(Reply::Embedding(vec![0.1, 0.2]), None);

        let response = router
            .clone()
            .oneshot(binary_event(json!({ "payload": "not base64!" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // "AQID" is [1, 2, 3], which is not a valid AuthenticateRequest
        let response = router
            .oneshot(binary_event(json!({ "payload": "AQID" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "DECODE_ERROR");

        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_reference_is_error_response() {
        let (router, _, _) = app(Reply::Data(json!({ "id": "alice", "embeddings": "" })), None);
        let data = serde_json::to_value(Message { payload: payload() }).unwrap();

        let response = router.oneshot(binary_event(data)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "EMPTY_EMBEDDING");
        assert!(error.error.contains("empty embeddings"));
    }

    #[tokio::test]
    async fn test_response_published_to_sink() {
        let (router, transport, _) =
            app(Reply::Embedding(vec![0.1, 0.2]), Some("http://sink.local"));
        let data = serde_json::to_value(Message { payload: payload() }).unwrap();

        let response = router.oneshot(binary_event(data)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let published = transport.published();
        assert_eq!(published.len(), 1);
        let (target, event) = &published[0];
        assert_eq!(target, "http://sink.local");
        assert_eq!(event.event_type, RESPONSE_EVENT_TYPE);
        let message: Message = event.data_as().unwrap();
        assert!(AuthenticateResponse::decode(message.payload.as_slice()).unwrap().decision);
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _, _) = app(Reply::Nothing, None);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert!(health.healthy);
        assert_eq!(health.workers, 2);
        assert_eq!(health.idle_workers, 2);
    }
}
