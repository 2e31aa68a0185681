//! Continuous-stream detection.
//!
//! `StreamManager` owns at most one background worker. The worker pulls frames
//! from a source, classifies each one, runs the label through a
//! `StabilityDebouncer` and records one event per stable episode.
//!
//! # Lifecycle
//!
//! The session lives behind a mutex that is held for the whole of `start()` and
//! `stop()`, so concurrent starts cannot both spawn a worker. The worker never
//! takes that lock. It reports its exit on a channel from a drop guard that also
//! releases the frame source, so the device is freed on every exit path,
//! including a panic.
//!
//! Cancellation is cooperative: `stop()` raises a flag the worker checks once
//! per frame and waits up to the stop timeout. A source blocked inside `read()`
//! is not interrupted; such a worker is detached and releases its source when
//! the read eventually returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::classify::{predict, Prediction, SharedClassifier};
use crate::debounce::{EmitDecision, StabilityDebouncer, DEFAULT_STABILITY_WINDOW};
use crate::error::OperationError;
use crate::ingest::{FrameSource, FrameSourceProvider};
use crate::recorder::EventRecorder;
use crate::EventOrigin;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// A worker was signalled. `joined` is false when it missed the stop timeout
    /// and was detached.
    Stopped { joined: bool },
    WasIdle,
}

/// Why a worker ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    EndOfStream,
    SourceFailed(String),
    Panicked,
}

#[derive(Clone, Copy, Debug)]
pub struct StreamSettings {
    pub stability_window: Duration,
    pub stop_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stability_window: DEFAULT_STABILITY_WINDOW,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

struct WorkerHandle {
    source_name: String,
    cancel: Arc<AtomicBool>,
    done_rx: Receiver<WorkerExit>,
    join: JoinHandle<()>,
}

struct StreamSession {
    state: SessionState,
    worker: Option<WorkerHandle>,
    last_exit: Option<WorkerExit>,
}

pub struct StreamManager {
    session: Mutex<StreamSession>,
    provider: Arc<dyn FrameSourceProvider>,
    classifier: SharedClassifier,
    recorder: EventRecorder,
    settings: StreamSettings,
}

impl StreamManager {
    pub fn new(
        provider: Arc<dyn FrameSourceProvider>,
        classifier: SharedClassifier,
        recorder: EventRecorder,
        settings: StreamSettings,
    ) -> Self {
        Self {
            session: Mutex::new(StreamSession {
                state: SessionState::Idle,
                worker: None,
                last_exit: None,
            }),
            provider,
            classifier,
            recorder,
            settings,
        }
    }

    pub fn settings(&self) -> StreamSettings {
        self.settings
    }

    /// Start the worker unless one is already live.
    pub fn start(&self) -> Result<StartOutcome, OperationError> {
        let mut session = self.lock_session()?;
        reap_exited(&mut session);
        if session.worker.is_some() {
            log::debug!("stream start requested while running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        session.state = SessionState::Starting;
        match self.spawn_worker() {
            Ok(worker) => {
                log::info!("stream started on {}", worker.source_name);
                session.worker = Some(worker);
                session.last_exit = None;
                session.state = SessionState::Running;
                Ok(StartOutcome::Started)
            }
            Err(err) => {
                session.state = SessionState::Idle;
                log::warn!("stream start failed: {}", err);
                Err(err)
            }
        }
    }

    /// Signal the worker, wait up to the stop timeout, and return to `Idle`.
    pub fn stop(&self) -> Result<StopOutcome, OperationError> {
        let mut session = self.lock_session()?;
        reap_exited(&mut session);
        let Some(worker) = session.worker.take() else {
            session.state = SessionState::Idle;
            return Ok(StopOutcome::WasIdle);
        };

        session.state = SessionState::Stopping;
        let joined = shutdown_worker(worker, self.settings.stop_timeout, &mut session.last_exit);
        session.state = SessionState::Idle;
        Ok(StopOutcome::Stopped { joined })
    }

    /// Current state. A worker that ended on its own is reaped and reads `Idle`.
    pub fn state(&self) -> Result<SessionState, OperationError> {
        let mut session = self.lock_session()?;
        reap_exited(&mut session);
        Ok(session.state)
    }

    /// Exit reason of the most recently finished worker.
    pub fn last_exit(&self) -> Result<Option<WorkerExit>, OperationError> {
        let mut session = self.lock_session()?;
        reap_exited(&mut session);
        Ok(session.last_exit.clone())
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, StreamSession>, OperationError> {
        self.session
            .lock()
            .map_err(|_| OperationError::Internal("stream session lock poisoned".to_string()))
    }

    fn spawn_worker(&self) -> Result<WorkerHandle, OperationError> {
        let mut source = self
            .provider
            .provide()
            .map_err(|err| OperationError::CameraUnavailable(format!("{:#}", err)))?;
        let source_name = source.name();
        if let Err(err) = source.open() {
            source.release();
            return Err(OperationError::CameraUnavailable(format!("{:#}", err)));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        let guard = SourceGuard {
            source,
            done_tx,
            exit: None,
        };
        let worker = Worker {
            classifier: self.classifier.clone(),
            recorder: self.recorder.clone(),
            debouncer: StabilityDebouncer::new(self.settings.stability_window),
            cancel: cancel.clone(),
            stats: WorkerStats::default(),
        };

        let join = thread::Builder::new()
            .name("sentinel-stream".to_string())
            .spawn(move || worker.run(guard))
            .map_err(|err| OperationError::Internal(format!("spawn stream worker: {}", err)))?;

        Ok(WorkerHandle {
            source_name,
            cancel,
            done_rx,
            join,
        })
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        let Ok(session) = self.session.get_mut() else {
            return;
        };
        if let Some(worker) = session.worker.take() {
            shutdown_worker(worker, self.settings.stop_timeout, &mut session.last_exit);
        }
    }
}

/// Collect a worker that has already reported its exit.
fn reap_exited(session: &mut StreamSession) {
    let Some(worker) = session.worker.as_ref() else {
        return;
    };
    let exit = match worker.done_rx.try_recv() {
        Ok(exit) => exit,
        Err(TryRecvError::Disconnected) => WorkerExit::Panicked,
        Err(TryRecvError::Empty) => return,
    };
    if let Some(worker) = session.worker.take() {
        log::info!("stream worker on {} ended: {:?}", worker.source_name, exit);
        join_worker(worker.join);
    }
    session.last_exit = Some(exit);
    session.state = SessionState::Idle;
}

fn shutdown_worker(
    worker: WorkerHandle,
    timeout: Duration,
    last_exit: &mut Option<WorkerExit>,
) -> bool {
    worker.cancel.store(true, Ordering::SeqCst);
    match worker.done_rx.recv_timeout(timeout) {
        Ok(exit) => {
            log::info!("stream worker on {} stopped: {:?}", worker.source_name, exit);
            join_worker(worker.join);
            *last_exit = Some(exit);
            true
        }
        Err(RecvTimeoutError::Disconnected) => {
            join_worker(worker.join);
            *last_exit = Some(WorkerExit::Panicked);
            true
        }
        Err(RecvTimeoutError::Timeout) => {
            log::warn!(
                "stream worker on {} did not stop within {:?}; detaching",
                worker.source_name,
                timeout
            );
            *last_exit = Some(WorkerExit::Cancelled);
            false
        }
    }
}

fn join_worker(join: JoinHandle<()>) {
    if join.join().is_err() {
        log::error!("stream worker thread panicked");
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Owns the frame source for the worker's lifetime. Dropping it releases the
/// source and reports the exit reason.
struct SourceGuard {
    source: Box<dyn FrameSource>,
    done_tx: Sender<WorkerExit>,
    exit: Option<WorkerExit>,
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.source.release();
        let exit = self.exit.take().unwrap_or(WorkerExit::Panicked);
        // The manager may already have detached this worker.
        let _ = self.done_tx.send(exit);
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    frames: u64,
    unlabeled: u64,
    classify_failures: u64,
    events: u64,
    append_failures: u64,
}

struct Worker {
    classifier: SharedClassifier,
    recorder: EventRecorder,
    debouncer: StabilityDebouncer,
    cancel: Arc<AtomicBool>,
    stats: WorkerStats,
}

impl Worker {
    fn run(mut self, mut guard: SourceGuard) {
        let started = Instant::now();
        let exit = self.pump(&mut guard.source);
        log::info!(
            "stream worker exiting after {:?}: frames={} unlabeled={} classify_failures={} events={} append_failures={}",
            started.elapsed(),
            self.stats.frames,
            self.stats.unlabeled,
            self.stats.classify_failures,
            self.stats.events,
            self.stats.append_failures
        );
        guard.exit = Some(exit);
    }

    fn pump(&mut self, source: &mut Box<dyn FrameSource>) -> WorkerExit {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return WorkerExit::Cancelled;
            }

            let frame = match source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => return WorkerExit::EndOfStream,
                Err(err) => {
                    log::warn!("frame source {} failed: {:#}", source.name(), err);
                    return WorkerExit::SourceFailed(format!("{:#}", err));
                }
            };
            self.stats.frames += 1;

            let prediction = match predict(&self.classifier, &frame) {
                Ok(prediction) => prediction,
                Err(err) => {
                    self.stats.classify_failures += 1;
                    log::debug!("classification failed on frame {}: {:#}", self.stats.frames, err);
                    Prediction::default()
                }
            };
            if prediction.label.is_none() {
                self.stats.unlabeled += 1;
            }

            let now = Instant::now();
            let EmitDecision::Emit(label) = self.debouncer.observe(prediction.label.as_deref(), now)
            else {
                continue;
            };

            log::debug!(
                "stable label {} after {:?}",
                label,
                self.debouncer.episode_elapsed(now)
            );
            let preview = self.recorder.snapshot(&frame);
            match self
                .recorder
                .record(&label, prediction.confidence, EventOrigin::Stream, preview)
            {
                Ok(_) => self.stats.events += 1,
                Err(err) => {
                    self.stats.append_failures += 1;
                    log::error!("failed to record stream event {}: {:#}", label, err);
                }
            }
        }
    }
}
