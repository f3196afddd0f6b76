//! Embedding Worker
//!
//! Loop run by each pool thread: take a job, find the face, embed it, write
//! the result to the job's slot exactly once.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, info, warn};

use super::pool::{Dispatch, Job, JobQueue, JobResult};
use super::FaceRecognizer;
use crate::error::EmbeddingError;
use crate::utils::image::decode_image;

pub(crate) struct EmbeddingWorker<R> {
    id: usize,
    recognizer: R,
}

impl<R: FaceRecognizer> EmbeddingWorker<R> {
    pub(crate) fn new(id: usize, recognizer: R) -> Self {
        Self { id, recognizer }
    }

    /// Serve jobs until the queue closes.
    pub(crate) fn run(mut self, queue: JobQueue) {
        info!("Worker {}: Ready to authenticate", self.id);
        loop {
            let next = queue.lock().blocking_recv();
            let Some(dispatch) = next else {
                break;
            };
            self.handle(dispatch);
        }
        info!("Worker {}: Queue closed, stopping", self.id);
    }

    pub(crate) fn handle(&mut self, dispatch: Dispatch) {
        let Dispatch { job, slot, permit } = dispatch;

        // The requester gave up (deadline) before we got to it.
        if slot.is_closed() {
            debug!("Worker {}: Request for {} abandoned, skipping", self.id, job.identity);
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.generate(&job))).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!("Worker {}: Pipeline panicked for {}: {}", self.id, job.identity, message);
            Err(EmbeddingError::Panicked(message))
        });

        if let Err(e) = &result {
            warn!("Worker {}: No embeddings for {}: {}", self.id, job.identity, e);
        }
        if slot.send(result).is_err() {
            debug!("Worker {}: Requester for {} went away", self.id, job.identity);
        }
        drop(permit);
    }

    /// Run the pipeline for one job.
    pub(crate) fn generate(&mut self, job: &Job) -> JobResult {
        let image = decode_image(&job.image)?;

        let region = match job.bounding_box {
            Some(region) => region,
            None => {
                debug!("Worker {}: Searching for a face...", self.id);
                self.recognizer.detect_face(&image)?
            }
        };
        debug!(
            "Worker {}: Face in area top_left({}, {}), bottom_right({}, {})",
            self.id, region.top_left.x, region.top_left.y, region.bottom_right.x, region.bottom_right.y
        );

        let face = self.recognizer.extract_face(&image, &region)?;
        debug!("Worker {}: Generating embeddings", self.id);
        self.recognizer.generate_embedding(&face)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
