//! Error types
//!
//! One enum per stage of an authentication request. `AuthError` is what the
//! receiver turns into a failed response.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Failures inside the embedding pipeline of a single job.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Image(String),

    /// Detection ran but found nothing.
    #[error("No face detected in the image")]
    NoFace,

    /// The face region does not fit the image.
    #[error("Invalid face region: {0}")]
    InvalidRegion(String),

    /// Model loading or inference failed.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The recognition engine panicked while processing the job.
    #[error("Embedding pipeline panicked: {0}")]
    Panicked(String),
}

/// Failures of the event transport itself.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The event never reached the target.
    #[error("Event undelivered: {0}")]
    Undelivered(String),

    /// The target answered with a non-success status.
    #[error("Event rejected with status {0}")]
    Rejected(u16),

    /// The target answered but the reply is not a valid event.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
}

/// Failures while fetching the reference embedding.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to request reference embeddings: {0}")]
    Transport(TransportError),

    #[error("Reference store sent no response")]
    NoResponse,

    #[error("Failed to decode reference response: {0}")]
    Decode(String),

    #[error("Got empty embeddings from database")]
    EmptyEmbedding,

    #[error("Embedding payload of {0} bytes is not a multiple of 4")]
    MalformedEmbedding(usize),
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::MalformedReply(msg) => FetchError::Decode(msg),
            other => FetchError::Transport(other),
        }
    }
}

/// Worker pool lifecycle errors.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool needs at least one worker")]
    Empty,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker {worker} failed to initialize: {source}")]
    Init {
        worker: usize,
        #[source]
        source: EmbeddingError,
    },

    #[error("Worker pool is shut down")]
    Closed,
}

/// Terminal failure of one authentication request.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to decode request: {0}")]
    Decode(String),

    #[error("Error while getting reference embeddings: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Embedding dimension mismatch: generated {generated}, reference {reference}")]
    DimensionMismatch { generated: usize, reference: usize },

    #[error("Authentication timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Worker dropped the job without answering")]
    WorkerLost,

    #[error("Failed to serialize response: {0}")]
    Serialization(String),

    #[error("Failed to publish response: {0}")]
    Publish(TransportError),
}

impl From<PoolError> for AuthError {
    fn from(_: PoolError) -> Self {
        AuthError::PoolClosed
    }
}

impl AuthError {
    /// HTTP status reported to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Decode(_) => StatusCode::BAD_REQUEST,
            AuthError::Fetch(FetchError::Transport(_) | FetchError::NoResponse)
            | AuthError::Publish(_) => StatusCode::BAD_GATEWAY,
            AuthError::Embedding(
                EmbeddingError::Image(_) | EmbeddingError::NoFace | EmbeddingError::InvalidRegion(_),
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AuthError::PoolClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Decode(_) => "DECODE_ERROR",
            AuthError::Fetch(FetchError::Transport(_)) => "TRANSPORT_ERROR",
            AuthError::Fetch(FetchError::NoResponse) => "NO_RESPONSE",
            AuthError::Fetch(FetchError::Decode(_)) => "REFERENCE_DECODE_ERROR",
            AuthError::Fetch(FetchError::EmptyEmbedding) => "EMPTY_EMBEDDING",
            AuthError::Fetch(FetchError::MalformedEmbedding(_)) => "MALFORMED_EMBEDDING",
            AuthError::Embedding(EmbeddingError::NoFace) => "NO_FACE",
            AuthError::Embedding(_) => "EMBEDDING_FAILED",
            AuthError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            AuthError::Timeout(_) => "TIMEOUT",
            AuthError::PoolClosed => "POOL_CLOSED",
            AuthError::WorkerLost => "WORKER_LOST",
            AuthError::Serialization(_) => "SERIALIZATION_ERROR",
            AuthError::Publish(_) => "PUBLISH_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reply_becomes_decode_error() {
        let err: FetchError = TransportError::MalformedReply("bad json".into()).into();
        assert!(matches!(err, FetchError::Decode(_)));

        let err: FetchError = TransportError::Rejected(404).into();
        assert!(matches!(err, FetchError::Transport(TransportError::Rejected(404))));
    }

    #[test]
    fn status_codes() {
        let cases = vec![
            (AuthError::Decode("x".into()), StatusCode::BAD_REQUEST),
            (
                AuthError::Fetch(FetchError::Transport(TransportError::Undelivered("down".into()))),
                StatusCode::BAD_GATEWAY,
            ),
            (AuthError::Fetch(FetchError::NoResponse), StatusCode::BAD_GATEWAY),
            (
                AuthError::Fetch(FetchError::EmptyEmbedding),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AuthError::Embedding(EmbeddingError::NoFace),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AuthError::Embedding(EmbeddingError::Panicked("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AuthError::Timeout(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (AuthError::PoolClosed, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[test]
    fn empty_embedding_message() {
        let err = AuthError::Fetch(FetchError::EmptyEmbedding);
        assert!(err.to_string().contains("empty embeddings"));
        assert_eq!(err.code(), "EMPTY_EMBEDDING");
    }
}
