//! Asynchronous decode pipeline
//!
//! Each request runs through
//!
//! ```text
//! Idle -> Decoding -> Delivering
//!                  \-> Failed
//! ```
//!
//! Decoding happens on a [`WorkerPool`] thread. The result, success or not,
//! is then posted to the [`DeliveryQueue`], whose thread builds the
//! [`StreamingBuffer`] and invokes the completion callback exactly once.
//! Requests are independent; nothing is retried and nothing can be cancelled.

pub mod executor;

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::codec::{CodecRegistry, DecodeError};
use crate::audio::pcm::{self, StreamDescriptor};
use crate::audio::StreamingBuffer;
use crate::settings::StreamSettings;

pub use executor::{delivery_queue, DeliveryPump, DeliveryQueue, Job, PoolHandle, WorkerPool};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Where a job's bytes come from
#[derive(Debug, Clone)]
pub enum JobSource {
    /// Read from disk on the worker thread
    Path(PathBuf),
    /// Already loaded; `name` is only used for format dispatch and logging
    Bytes { bytes: Vec<u8>, name: Option<String> },
}

/// One request to turn a source into a streaming buffer
#[derive(Debug, Clone)]
pub struct DecodeJob {
    pub source: JobSource,
    /// Explicit format (codec name or extension); overrides the file name
    pub hint: Option<String>,
}

impl DecodeJob {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: JobSource::Path(path.into()),
            hint: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>, name: Option<&str>) -> Self {
        Self {
            source: JobSource::Bytes {
                bytes,
                name: name.map(str::to_string),
            },
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    /// Human readable name for logs
    fn label(&self) -> String {
        match &self.source {
            JobSource::Path(path) => path.display().to_string(),
            JobSource::Bytes { name: Some(name), .. } => name.clone(),
            JobSource::Bytes { bytes, name: None } => format!("<{} bytes>", bytes.len()),
        }
    }
}

/// Lifecycle of a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Decoding,
    Delivering,
    Failed,
}

impl JobState {
    fn can_advance_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Idle, JobState::Decoding)
                | (JobState::Decoding, JobState::Delivering)
                | (JobState::Decoding, JobState::Failed)
        )
    }
}

/// Identifies a request in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-request bookkeeping that travels with the job across both hops
struct Tracker {
    id: RequestId,
    label: String,
    state: JobState,
    started: Instant,
    decoded_in: Duration,
}

impl Tracker {
    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("Request {} ({}): {:?} -> {:?}", self.id, self.label, self.state, next);
        self.state = next;
    }

    /// Log line for a failed request, including time since it was made
    fn failure_summary(&self, error: &DecodeError) -> String {
        format!(
            "Failed to create sound from {} (request {}) after {:?}: {}",
            self.label,
            self.id,
            self.started.elapsed(),
            error
        )
    }
}

/// Decoded payload, already in the output format
struct Decoded {
    descriptor: StreamDescriptor,
    pcm: Vec<u8>,
}

type Completion = Box<dyn FnOnce(Result<StreamingBuffer, DecodeError>) + Send>;

/// A request on its way through the worker pool
struct DecodeTask {
    job: DecodeJob,
    tracker: Tracker,
    codecs: Arc<CodecRegistry>,
    settings: StreamSettings,
    delivery: DeliveryQueue,
    callback: Completion,
}

impl DecodeTask {
    /// Worker side: decode, then hop to the delivery thread
    fn execute(self) {
        let DecodeTask {
            job,
            mut tracker,
            codecs,
            settings,
            delivery,
            callback,
        } = self;

        let result = decode_job(&codecs, job, &settings);
        tracker.decoded_in = tracker.started.elapsed();
        Self::hand_off(delivery, tracker, settings, result, callback);
    }

    /// Report a failure without decoding
    fn abort(self, error: DecodeError) {
        let DecodeTask {
            tracker,
            settings,
            delivery,
            callback,
            ..
        } = self;
        Self::hand_off(delivery, tracker, settings, Err(error), callback);
    }

    fn hand_off(
        delivery: DeliveryQueue,
        tracker: Tracker,
        settings: StreamSettings,
        result: Result<Decoded, DecodeError>,
        callback: Completion,
    ) {
        let id = tracker.id;
        let posted = delivery.post(move || deliver(tracker, settings, result, callback));
        if !posted {
            log::warn!("Delivery queue closed, discarding result of request {}", id);
        }
    }
}

impl Job for DecodeTask {
    fn run(self: Box<Self>) {
        (*self).execute()
    }
}

fn decode_job(
    codecs: &CodecRegistry,
    job: DecodeJob,
    settings: &StreamSettings,
) -> Result<Decoded, DecodeError> {
    let (bytes, name) = match job.source {
        JobSource::Path(path) => {
            let bytes = std::fs::read(&path).map_err(|source| DecodeError::FileUnreadable {
                path: path.clone(),
                source,
            })?;
            (bytes, Some(path.to_string_lossy().into_owned()))
        }
        JobSource::Bytes { bytes, name } => (bytes, name),
    };

    let target = settings.output_format;
    let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
        codecs.decode(&bytes, job.hint.as_deref(), name.as_deref(), target)
    }))
    .map_err(|payload| {
        DecodeError::DecodeEngineFailure(format!(
            "codec panicked: {}",
            executor::panic_message(payload.as_ref())
        ))
    })??;

    Ok(Decoded {
        descriptor: decoded.descriptor,
        pcm: pcm::convert(decoded.pcm, decoded.encoding, target),
    })
}

/// Delivery side: build the buffer and notify
fn deliver(
    mut tracker: Tracker,
    settings: StreamSettings,
    result: Result<Decoded, DecodeError>,
    callback: Completion,
) {
    match result {
        Ok(decoded) => {
            tracker.advance(JobState::Delivering);

            let mut buffer = StreamingBuffer::new(settings.output_format, &settings);
            if !decoded.pcm.is_empty() {
                buffer.append(&decoded.pcm);
            }
            buffer.set_descriptor(decoded.descriptor);
            buffer.finish();

            log::info!(
                "Request {} ({}): {:.3}s, {} Hz, {} ch ready (decode {:?}, total {:?})",
                tracker.id,
                tracker.label,
                decoded.descriptor.duration_secs(),
                decoded.descriptor.sample_rate,
                decoded.descriptor.channels,
                tracker.decoded_in,
                tracker.started.elapsed()
            );
            callback(Ok(buffer));
        }
        Err(e) => {
            tracker.advance(JobState::Failed);
            log::error!("{}", tracker.failure_summary(&e));
            callback(Err(e));
        }
    }
}

/// Schedules decode jobs and delivers the resulting buffers
pub struct DecodePipeline {
    workers: PoolHandle,
    delivery: DeliveryQueue,
    codecs: Arc<CodecRegistry>,
    settings: StreamSettings,
}

impl DecodePipeline {
    pub fn new(
        workers: &WorkerPool,
        delivery: DeliveryQueue,
        codecs: CodecRegistry,
        settings: StreamSettings,
    ) -> Self {
        Self {
            workers: workers.handle(),
            delivery,
            codecs: Arc::new(codecs),
            settings: settings.sanitized(),
        }
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Decode `job` in the background. `callback` runs once on the delivery
    /// thread with the ready buffer, or `None` if anything went wrong.
    pub fn request<F>(&self, job: DecodeJob, callback: F) -> RequestId
    where
        F: FnOnce(Option<StreamingBuffer>) + Send + 'static,
    {
        self.request_detailed(job, move |result| callback(result.ok()))
    }

    /// Like [`request`](Self::request) but reports why a request failed
    pub fn request_detailed<F>(&self, job: DecodeJob, callback: F) -> RequestId
    where
        F: FnOnce(Result<StreamingBuffer, DecodeError>) + Send + 'static,
    {
        let id = RequestId(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed));
        let mut tracker = Tracker {
            id,
            label: job.label(),
            state: JobState::Idle,
            started: Instant::now(),
            decoded_in: Duration::ZERO,
        };
        tracker.advance(JobState::Decoding);

        let task = DecodeTask {
            job,
            tracker,
            codecs: Arc::clone(&self.codecs),
            settings: self.settings.clone(),
            delivery: self.delivery.clone(),
            callback: Box::new(callback),
        };

        if let Err(task) = self.workers.spawn(task) {
            log::error!("Worker pool is shut down, rejecting request {}", id);
            task.abort(DecodeError::DecodeEngineFailure(
                "worker pool is shut down".to_string(),
            ));
        }

        id
    }
}
