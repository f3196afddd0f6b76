//! Reference Fetcher
//!
//! Asks the embedding store for the stored reference of one identity and
//! decodes the binary payload into a vector.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::EmbeddingVector;
use crate::error::{FetchError, TransportError};
use crate::transport::{Event, EventTransport};

/// Event type of the lookup request
pub const GET_EVENT_TYPE: &str = "get";

const FLOAT_WIDTH: usize = std::mem::size_of::<f32>();

#[derive(Debug, Serialize)]
struct GetRequest<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReferenceReply {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    embeddings: String,
}

pub struct ReferenceFetcher<T> {
    transport: Arc<T>,
    target: Option<String>,
    source: String,
}

impl<T: EventTransport> ReferenceFetcher<T> {
    pub fn new(transport: Arc<T>, target: Option<String>, source: impl Into<String>) -> Self {
        Self {
            transport,
            target,
            source: source.into(),
        }
    }

    /// Fetch the reference embedding for `identity`.
    pub async fn fetch(&self, identity: &str) -> Result<EmbeddingVector, FetchError> {
        let target = self.target.as_deref().ok_or_else(|| {
            TransportError::Undelivered("no reference target configured".to_string())
        })?;

        let request = Event::new(GET_EVENT_TYPE, self.source.clone())
            .with_data(&GetRequest { id: identity })
            .map_err(|e| TransportError::Undelivered(e.to_string()))?;

        debug!("Requesting reference embeddings for {} from {}", identity, target);
        let reply = self
            .transport
            .request(target, request)
            .await?
            .ok_or(FetchError::NoResponse)?;

        let reply: ReferenceReply = reply.data_as().map_err(|e| FetchError::Decode(e.to_string()))?;
        if !reply.id.is_empty() && reply.id != identity {
            return Err(FetchError::Decode(format!(
                "reply is for {}, expected {}",
                reply.id, identity
            )));
        }
        if let Some(message) = &reply.message {
            debug!("Reference store says: {}", message);
        }
        if reply.embeddings.is_empty() {
            warn!("No reference embeddings stored for {}", identity);
            return Err(FetchError::EmptyEmbedding);
        }

        let bytes = STANDARD
            .decode(&reply.embeddings)
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        decode_embedding(&bytes)
    }
}

/// Little-endian f32 sequence, four bytes per value.
pub fn decode_embedding(bytes: &[u8]) -> Result<EmbeddingVector, FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::EmptyEmbedding);
    }
    if bytes.len() % FLOAT_WIDTH != 0 {
        return Err(FetchError::MalformedEmbedding(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(FLOAT_WIDTH)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}
