//! Batch orchestration across all cameras of a shot.
//!
//! One scoped thread per camera. Every worker opens its own link, waits at the
//! shared [`StartGate`] and then runs its task independently. Results travel
//! back over a channel; a camera that fails, or whose thread panics, only
//! fills its own slot of the [`BatchResult`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::barrier::StartGate;
use crate::config::{CameraDescriptor, CaptureConfig, ConfigError};
use crate::decode::FrameDecoder;
use crate::registers::RegisterProgram;
use crate::traits::{CameraError, CameraId, LinkOpener};
use crate::worker::{run_worker, CameraOutcome, CaptureRequest, Mode, Task};

/// Configuration-level errors, raised before any thread is spawned.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The id is not in the camera map.
    #[error("camera {0} is not configured")]
    UnknownCamera(CameraId),
    /// No camera was selected.
    #[error("no cameras selected")]
    EmptyBatch,
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of the live-preview collaborator.
#[derive(Debug, Error)]
#[error("cannot disable live preview for camera {camera}: {reason}")]
pub struct LivePreviewError {
    /// Camera concerned.
    pub camera: CameraId,
    /// What went wrong.
    pub reason: String,
}

/// External switch for the background live preview.
///
/// Called once per camera before a batch; failures are logged, never fatal.
pub trait LivePreviewControl: Sync {
    /// Stop live preview for `camera` so its port is free.
    fn disable_live(&self, camera: CameraId) -> Result<(), LivePreviewError>;
}

/// Used when no live preview runs next to the capture process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLivePreview;

impl LivePreviewControl for NoLivePreview {
    fn disable_live(&self, _camera: CameraId) -> Result<(), LivePreviewError> {
        Ok(())
    }
}

/// Per-batch options.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Decode captures as single-channel luma.
    pub grayscale: bool,
    /// Frames are live single-shots.
    pub live: bool,
    /// Exposure scale patched into UPDATE batches.
    pub exposure_scale: Option<i32>,
    /// Log raw frames as hex.
    pub dump_hex: bool,
    /// Identifier stamped on captured frames.
    pub batch_id: Option<String>,
}

/// Short random batch identifier: 8 hex digits.
pub fn new_batch_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Aggregated per-camera outcomes of one batch.
#[derive(Debug)]
pub struct BatchResult {
    mode: Mode,
    batch_id: Option<String>,
    outcomes: BTreeMap<CameraId, CameraOutcome>,
    elapsed: Duration,
}

impl BatchResult {
    /// Mode the batch ran in.
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Batch identifier, if one was assigned.
    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    /// Wall time from first worker spawn to last join.
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Outcome for one camera.
    pub fn get(&self, camera: CameraId) -> Option<&CameraOutcome> {
        self.outcomes.get(&camera)
    }

    /// Outcomes ordered by camera id.
    pub fn iter(&self) -> impl Iterator<Item = (CameraId, &CameraOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    /// Number of cameras in the batch.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether the batch had no cameras.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of cameras that completed their task.
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| outcome.is_success())
            .count()
    }

    /// Cameras that failed and why.
    pub fn failures(&self) -> impl Iterator<Item = (CameraId, &CameraError)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.error().map(|err| (*id, err)))
    }

    /// Whether every camera succeeded.
    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.outcomes.len()
    }

    /// Take the outcomes.
    pub fn into_outcomes(self) -> BTreeMap<CameraId, CameraOutcome> {
        self.outcomes
    }
}

/// Both halves of a reset-then-capture shot.
#[derive(Debug)]
pub struct ShotReport {
    /// The preparatory reset.
    pub reset: BatchResult,
    /// The capture.
    pub capture: BatchResult,
}

/// Runs synchronized batches over the configured cameras.
pub struct BatchOrchestrator<O, P = NoLivePreview> {
    config: CaptureConfig,
    program: RegisterProgram,
    opener: O,
    live_preview: P,
    gate: StartGate,
    batch_lock: Mutex<()>,
}

impl<O: LinkOpener> BatchOrchestrator<O> {
    /// Orchestrator over a validated configuration.
    pub fn new(config: CaptureConfig, opener: O) -> Result<Self, BatchError> {
        config.validate()?;
        Ok(Self {
            config,
            program: RegisterProgram::default(),
            opener,
            live_preview: NoLivePreview,
            gate: StartGate::new(),
            batch_lock: Mutex::new(()),
        })
    }
}

impl<O: LinkOpener, P: LivePreviewControl> BatchOrchestrator<O, P> {
    /// Replace the live-preview collaborator.
    pub fn with_live_preview<Q: LivePreviewControl>(
        self,
        live_preview: Q,
    ) -> BatchOrchestrator<O, Q> {
        BatchOrchestrator {
            config: self.config,
            program: self.program,
            opener: self.opener,
            live_preview,
            gate: self.gate,
            batch_lock: self.batch_lock,
        }
    }

    /// Replace the register program used by UPDATE batches.
    #[must_use]
    pub fn with_program(mut self, program: RegisterProgram) -> Self {
        self.program = program;
        self
    }

    /// Active configuration.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// The link opener.
    pub const fn opener(&self) -> &O {
        &self.opener
    }

    /// Resolve ids to descriptors, rejecting unknown ids.
    pub fn select(
        &self,
        targets: &BTreeSet<CameraId>,
    ) -> Result<Vec<CameraDescriptor>, BatchError> {
        if targets.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        targets
            .iter()
            .map(|&id| {
                self.config
                    .camera(id)
                    .cloned()
                    .ok_or(BatchError::UnknownCamera(id))
            })
            .collect()
    }

    fn build_task(&self, mode: Mode, options: &BatchOptions) -> Task {
        match mode {
            Mode::Update => Task::Update(self.program.working_copy(options.exposure_scale)),
            Mode::Reset => Task::Reset,
            Mode::Capture => {
                let mut decoder = FrameDecoder::new(self.config.format);
                if options.grayscale {
                    decoder = decoder.grayscale(self.config.luma_order);
                }
                Task::Capture(CaptureRequest {
                    decoder,
                    timeout: self.config.read_timeout(),
                    batch_id: options.batch_id.clone(),
                    live: options.live,
                    dump_hex: options.dump_hex,
                })
            }
        }
    }

    /// Run one synchronized batch.
    ///
    /// Only configuration errors are returned as `Err`; camera failures land
    /// in their slot of the result.
    pub fn run_batch(
        &self,
        targets: &BTreeSet<CameraId>,
        mode: Mode,
        options: &BatchOptions,
    ) -> Result<BatchResult, BatchError> {
        let cameras = self.select(targets)?;
        let _in_flight = self
            .batch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        info!(%mode, live = options.live, cameras = cameras.len(), "preparing batch");
        for camera in &cameras {
            if let Err(err) = self.live_preview.disable_live(camera.id) {
                warn!("{err}");
            }
        }
        thread::sleep(self.config.timing.live_disable_pause());

        let task = self.build_task(mode, options);
        let started = Instant::now();
        let outcomes = self.dispatch(&cameras, &task);
        let result = BatchResult {
            mode,
            batch_id: options.batch_id.clone(),
            outcomes,
            elapsed: started.elapsed(),
        };

        info!(
            %mode,
            succeeded = result.succeeded(),
            failed = result.len() - result.succeeded(),
            elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            "batch complete"
        );
        Ok(result)
    }

    /// Reset every target, let the sensors settle, then capture.
    ///
    /// The capture batch gets `options.batch_id` or a fresh identifier.
    pub fn run_shot(
        &self,
        targets: &BTreeSet<CameraId>,
        options: &BatchOptions,
    ) -> Result<ShotReport, BatchError> {
        let reset = self.run_batch(targets, Mode::Reset, options)?;

        info!("waiting for sensor stabilization");
        thread::sleep(self.config.timing.shot_stabilize());

        let capture_options = BatchOptions {
            batch_id: Some(options.batch_id.clone().unwrap_or_else(new_batch_id)),
            ..options.clone()
        };
        info!(
            batch_id = capture_options.batch_id.as_deref(),
            "capturing shot"
        );
        let capture = self.run_batch(targets, Mode::Capture, &capture_options)?;

        Ok(ShotReport { reset, capture })
    }

    fn dispatch(
        &self,
        cameras: &[CameraDescriptor],
        task: &Task,
    ) -> BTreeMap<CameraId, CameraOutcome> {
        let timing = self.config.timing;
        let (tx, rx) = crossbeam_channel::unbounded();
        self.gate.reset(cameras.len());

        let panicked: Vec<CameraId> = thread::scope(|scope| {
            let release = self.gate.open_on_drop();
            let mut handles = Vec::with_capacity(cameras.len());

            for camera in cameras {
                let ticket = self.gate.ticket();
                let task = task.clone();
                let worker_tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("cam-{}", camera.id))
                    .spawn_scoped(scope, move || {
                        let outcome = run_worker(&self.opener, camera, timing, ticket, &task);
                        let _ = worker_tx.send((camera.id, outcome));
                    });

                match spawned {
                    Ok(handle) => handles.push((camera.id, handle)),
                    Err(err) => {
                        error!(camera = camera.id, "cannot spawn worker: {err}");
                        let reason = CameraError::WorkerNotStarted(err.to_string());
                        let _ = tx.send((camera.id, CameraOutcome::Failed(reason)));
                    }
                }
            }

            info!(mode = %task.mode(), "triggering now");
            drop(release);

            handles
                .into_iter()
                .filter_map(|(id, handle)| handle.join().is_err().then_some(id))
                .collect()
        });
        drop(tx);

        let mut outcomes: BTreeMap<CameraId, CameraOutcome> = rx.try_iter().collect();
        for id in panicked {
            error!(camera = id, "worker thread panicked");
            outcomes
                .entry(id)
                .or_insert(CameraOutcome::Failed(CameraError::WorkerPanicked));
        }
        outcomes
    }
}
