//! In-memory fakes shared by the unit tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::json;

use crate::engine::{BoundingBox, EmbeddingVector, FaceRecognizer, Point, WorkerPool};
use crate::error::{EmbeddingError, TransportError};
use crate::service::fetcher::encode_embedding;
use crate::transport::{Event, EventTransport};

/// A small valid PNG.
pub fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 150, 100]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Counters shared between a test and the recognizers it handed to a pool.
#[derive(Clone, Default)]
pub struct Probe {
    inits: Arc<AtomicUsize>,
    detections: Arc<AtomicUsize>,
    embeddings: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    last_face: Arc<Mutex<Option<(u32, u32)>>>,
}

impl Probe {
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn detections(&self) -> usize {
        self.detections.load(Ordering::SeqCst)
    }

    pub fn embeddings(&self) -> usize {
        self.embeddings.load(Ordering::SeqCst)
    }

    /// Highest number of embeddings ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn last_face_size(&self) -> Option<(u32, u32)> {
        *self.last_face.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Embed,
    NoFace,
    Panic,
}

pub struct FakeRecognizer {
    probe: Probe,
    vector: EmbeddingVector,
    delay: Duration,
    behaviour: Behaviour,
}

impl FakeRecognizer {
    pub fn new(probe: Probe, vector: EmbeddingVector) -> Self {
        Self {
            probe,
            vector,
            delay: Duration::ZERO,
            behaviour: Behaviour::Embed,
        }
    }

    pub fn with_behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl FaceRecognizer for FakeRecognizer {
    fn detect_face(&mut self, image: &DynamicImage) -> Result<BoundingBox, EmbeddingError> {
        self.probe.detections.fetch_add(1, Ordering::SeqCst);
        if self.behaviour == Behaviour::NoFace {
            return Err(EmbeddingError::NoFace);
        }
        let (w, h) = image.dimensions();
        Ok(BoundingBox::new(
            Point { x: 1, y: 1 },
            Point {
                x: w as i32 - 1,
                y: h as i32 - 1,
            },
        ))
    }

    fn generate_embedding(&mut self, face: &DynamicImage) -> Result<EmbeddingVector, EmbeddingError> {
        let running = self.probe.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(running, Ordering::SeqCst);
        *self.probe.last_face.lock() = Some(face.dimensions());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.probe.running.fetch_sub(1, Ordering::SeqCst);

        if self.behaviour == Behaviour::Panic {
            panic!("model crashed");
        }
        self.probe.embeddings.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

/// Pool of fake recognizers that all report into `probe`.
pub fn start_pool(
    size: usize,
    probe: &Probe,
    vector: EmbeddingVector,
    delay: Duration,
    behaviour: Behaviour,
) -> WorkerPool {
    let probe = probe.clone();
    WorkerPool::start(size, move |_| {
        probe.inits.fetch_add(1, Ordering::SeqCst);
        Ok(FakeRecognizer::new(probe.clone(), vector.clone())
            .with_delay(delay)
            .with_behaviour(behaviour))
    })
    .unwrap()
}

/// What `FakeTransport` answers to a request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A well-formed reply for the requested identity.
    Embedding(Vec<f32>),
    /// A reply event carrying this data.
    Data(serde_json::Value),
    /// No reply event at all.
    Nothing,
    Undelivered,
    Malformed,
    /// Never answers.
    Hang,
}

pub struct FakeTransport {
    reply: Reply,
    requests: Mutex<Vec<(String, Event)>>,
    published: Mutex<Vec<(String, Event)>>,
}

impl FakeTransport {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, Event)> {
        self.requests.lock().clone()
    }

    pub fn published(&self) -> Vec<(String, Event)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl EventTransport for FakeTransport {
    async fn request(&self, target: &str, event: Event) -> Result<Option<Event>, TransportError> {
        self.requests.lock().push((target.to_string(), event.clone()));

        let data = match &self.reply {
            Reply::Embedding(vector) => {
                let id = event.data.as_ref().map(|d| d["id"].clone()).unwrap_or_default();
                json!({ "id": id, "embeddings": STANDARD.encode(encode_embedding(vector)) })
            }
            Reply::Data(data) => data.clone(),
            Reply::Nothing => return Ok(None),
            Reply::Undelivered => {
                return Err(TransportError::Undelivered("connection refused".to_string()))
            }
            Reply::Malformed => return Err(TransportError::MalformedReply("expected value".to_string())),
            Reply::Hang => std::future::pending().await,
        };

        let reply = Event::new("get-response", "fake-store").with_data(&data).unwrap();
        Ok(Some(reply))
    }

    async fn send(&self, target: &str, event: Event) -> Result<(), TransportError> {
        self.published.lock().push((target.to_string(), event));
        Ok(())
    }
}
