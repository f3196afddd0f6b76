//! Request orchestration
//!
//! One authentication request fans out into a reference lookup and an
//! embedding job, waits for both under a single deadline, then compares the
//! two vectors.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::fetcher::ReferenceFetcher;
use crate::config::AuthenticationConfig;
use crate::engine::{BoundingBox, EmbeddingVector, Job, WorkerPool};
use crate::error::{AuthError, FetchError};
use crate::transport::EventTransport;
use crate::utils::DistanceMetric;

/// Decoded inbound request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub identity: String,
    pub image: Vec<u8>,
    pub bounding_box: Option<BoundingBox>,
}

/// Outcome of comparing a face with its reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Raw distance between generated and reference embeddings.
    pub score: f32,
    pub decision: bool,
    pub message: String,
}

impl Decision {
    pub fn new(identity: &str, score: f32, threshold: f32) -> Self {
        let decision = score < threshold;
        let message = if decision {
            format!("{} authenticated with success", identity)
        } else {
            format!("{} did not match the reference", identity)
        };
        Self {
            score,
            decision,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    pub threshold: f32,
    pub metric: DistanceMetric,
    pub deadline: Duration,
}

impl From<&AuthenticationConfig> for AuthSettings {
    fn from(config: &AuthenticationConfig) -> Self {
        Self {
            threshold: config.threshold,
            metric: config.metric,
            deadline: config.deadline(),
        }
    }
}

pub struct Authenticator<T> {
    pool: Arc<WorkerPool>,
    fetcher: ReferenceFetcher<T>,
    settings: AuthSettings,
}

impl<T: EventTransport> Authenticator<T> {
    pub fn new(pool: Arc<WorkerPool>, fetcher: ReferenceFetcher<T>, settings: AuthSettings) -> Self {
        Self {
            pool,
            fetcher,
            settings,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Authenticate one face against the stored reference for its identity.
    pub async fn authenticate(&self, request: AuthRequest) -> Result<Decision, AuthError> {
        let identity = request.identity.clone();
        let deadline = self.settings.deadline;

        let (reference, generated) = tokio::time::timeout(deadline, self.fetch_and_embed(request))
            .await
            .map_err(|_| {
                warn!("Authentication of {} timed out after {:?}", identity, deadline);
                AuthError::Timeout(deadline)
            })?;

        let reference = reference.map_err(|e| {
            error!("Error while getting reference embeddings for {}: {}", identity, e);
            AuthError::from(e)
        })?;
        let generated = generated.inspect_err(|e| {
            warn!("Embedding generation failed for {}: {}", identity, e);
        })?;

        let score = self
            .settings
            .metric
            .distance(&generated, &reference)
            .ok_or(AuthError::DimensionMismatch {
                generated: generated.len(),
                reference: reference.len(),
            })?;

        let decision = Decision::new(&identity, score, self.settings.threshold);
        info!(
            "Score for {}: {} ({} < {} = {})",
            identity,
            score,
            self.settings.metric.as_str(),
            self.settings.threshold,
            decision.decision
        );
        Ok(decision)
    }

    /// Run the lookup and the embedding job side by side; both always
    /// complete before this returns.
    async fn fetch_and_embed(
        &self,
        request: AuthRequest,
    ) -> (Result<EmbeddingVector, FetchError>, Result<EmbeddingVector, AuthError>) {
        let AuthRequest {
            identity,
            image,
            bounding_box,
        } = request;
        let job = Job {
            identity: identity.clone(),
            image,
            bounding_box,
        };

        tokio::join!(self.fetcher.fetch(&identity), self.embed(job))
    }

    async fn embed(&self, job: Job) -> Result<EmbeddingVector, AuthError> {
        let slot = self.pool.submit(job).await?;
        match slot.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AuthError::WorkerLost),
        }
    }
}
