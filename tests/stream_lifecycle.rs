use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use issue_sentinel::{
    shared, Classifier, ClassifierOutput, DisabledLocationResolver, EventRecorder, EventStore,
    Frame, FrameSource, FrameSourceProvider, InMemoryEventLog, SessionState, StartOutcome,
    Status, StopOutcome, StreamManager, StreamSettings, WorkerExit,
};

/// What the scripted source does on each read.
#[derive(Clone)]
enum Step {
    Frame(u8),
    Fail,
    Block(Duration),
}

struct ScriptedSource {
    steps: VecDeque<Step>,
    interval: Duration,
    released: Arc<AtomicBool>,
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        thread::sleep(self.interval);
        match self.steps.pop_front() {
            Some(Step::Frame(level)) => Frame::from_rgb(vec![level; 4 * 4 * 3], 4, 4).map(Some),
            Some(Step::Fail) => Err(anyhow!("usb cable pulled")),
            Some(Step::Block(duration)) => {
                thread::sleep(duration);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct ScriptedProvider {
    steps: Vec<Step>,
    interval: Duration,
    released: Arc<AtomicBool>,
    unavailable: bool,
}

impl ScriptedProvider {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            interval: Duration::from_millis(5),
            released: Arc::new(AtomicBool::new(false)),
            unavailable: false,
        }
    }
}

impl FrameSourceProvider for ScriptedProvider {
    fn provide(&self) -> Result<Box<dyn FrameSource>> {
        if self.unavailable {
            return Err(anyhow!("no such camera"));
        }
        Ok(Box::new(ScriptedSource {
            steps: self.steps.iter().cloned().collect(),
            interval: self.interval,
            released: self.released.clone(),
        }))
    }
}

/// Labels by level: 0 fails, 1 yields no label, anything else is `L<level>`.
struct LevelClassifier {
    calls: Arc<AtomicUsize>,
}

impl Classifier for LevelClassifier {
    fn name(&self) -> &'static str {
        "level"
    }

    fn infer(&mut self, frame: &Frame) -> Result<ClassifierOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match frame.pixels()[0] {
            0 => Err(anyhow!("model crashed")),
            1 => Ok(ClassifierOutput::default()),
            level => Ok(ClassifierOutput {
                top_label: Some(format!("L{}", level)),
                confidence: Some(0.5),
                ..ClassifierOutput::default()
            }),
        }
    }
}

fn manager(provider: ScriptedProvider, store: Arc<InMemoryEventLog>, window: Duration) -> StreamManager {
    let recorder = EventRecorder::new(store, Arc::new(DisabledLocationResolver), None);
    StreamManager::new(
        Arc::new(provider),
        shared(LevelClassifier {
            calls: Arc::new(AtomicUsize::new(0)),
        }),
        recorder,
        StreamSettings {
            stability_window: window,
            stop_timeout: Duration::from_millis(300),
        },
    )
}

fn wait_for_idle(manager: &StreamManager) -> SessionState {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let state = manager.state().expect("state");
        if state == SessionState::Idle || Instant::now() >= deadline {
            return state;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn repeat(step: Step, count: usize) -> Vec<Step> {
    std::iter::repeat(step).take(count).collect()
}

#[test]
fn one_event_per_stable_episode() {
    // 5 ms per frame: 20 frames of each label is ~100 ms, window is 40 ms.
    let mut steps = repeat(Step::Frame(10), 20);
    steps.extend(repeat(Step::Frame(20), 20));
    steps.extend(repeat(Step::Frame(10), 20));
    let store = Arc::new(InMemoryEventLog::new());
    let manager = manager(ScriptedProvider::new(steps), store.clone(), Duration::from_millis(40));

    assert_eq!(manager.start().expect("start"), StartOutcome::Started);
    assert_eq!(wait_for_idle(&manager), SessionState::Idle);
    assert_eq!(manager.last_exit().expect("exit"), Some(WorkerExit::EndOfStream));

    let labels: Vec<String> = store.events().expect("events").into_iter().map(|e| e.label).collect();
    assert_eq!(labels, vec!["L10", "L20", "L10"]);
}

#[test]
fn flicker_and_failures_record_nothing() {
    let steps: Vec<Step> = (0..60)
        .map(|i| match i % 4 {
            0 => Step::Frame(10),
            1 => Step::Frame(0),
            2 => Step::Frame(10),
            _ => Step::Frame(1),
        })
        .collect();
    let store = Arc::new(InMemoryEventLog::new());
    let manager = manager(ScriptedProvider::new(steps), store.clone(), Duration::from_millis(40));

    manager.start().expect("start");
    assert_eq!(wait_for_idle(&manager), SessionState::Idle);
    assert!(store.is_empty());
}

#[test]
fn mid_stream_failure_releases_source_and_allows_restart() {
    let mut steps = repeat(Step::Frame(10), 5);
    steps.push(Step::Fail);
    let provider = ScriptedProvider::new(steps);
    let released = provider.released.clone();
    let manager = manager(provider, Arc::new(InMemoryEventLog::new()), Duration::from_secs(3));

    manager.start().expect("start");
    assert_eq!(wait_for_idle(&manager), SessionState::Idle);
    assert!(released.load(Ordering::SeqCst));
    match manager.last_exit().expect("exit") {
        Some(WorkerExit::SourceFailed(reason)) => assert!(reason.contains("usb cable pulled")),
        other => panic!("unexpected exit {:?}", other),
    }

    assert_eq!(manager.start().expect("restart"), StartOutcome::Started);
    manager.stop().expect("stop");
}

#[test]
fn unavailable_camera_leaves_session_idle() {
    let mut provider = ScriptedProvider::new(Vec::new());
    provider.unavailable = true;
    let manager = manager(provider, Arc::new(InMemoryEventLog::new()), Duration::from_secs(3));

    let err = manager.start().expect_err("camera missing");
    assert_eq!(err.status(), Status::CameraUnavailable);
    assert_eq!(manager.state().expect("state"), SessionState::Idle);
    assert_eq!(manager.stop().expect("stop"), StopOutcome::WasIdle);
}

#[test]
fn blocked_read_is_detached_after_stop_timeout() {
    let provider = ScriptedProvider::new(vec![Step::Block(Duration::from_secs(2))]);
    let released = provider.released.clone();
    let manager = manager(provider, Arc::new(InMemoryEventLog::new()), Duration::from_secs(3));

    manager.start().expect("start");
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    assert_eq!(
        manager.stop().expect("stop"),
        StopOutcome::Stopped { joined: false }
    );
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(manager.state().expect("state"), SessionState::Idle);

    // The detached worker still releases its source once the read returns.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !released.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn concurrent_start_and_stop_keep_single_worker() {
    let steps = repeat(Step::Frame(10), 10_000);
    let manager = Arc::new(manager(
        ScriptedProvider::new(steps),
        Arc::new(InMemoryEventLog::new()),
        Duration::from_secs(3),
    ));
    let started = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let manager = manager.clone();
            let started = started.clone();
            thread::spawn(move || {
                if manager.start().expect("start") == StartOutcome::Started {
                    *started.lock().unwrap() += 1;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("start thread");
    }
    assert_eq!(*started.lock().unwrap(), 1);
    assert_eq!(manager.state().expect("state"), SessionState::Running);

    assert_eq!(
        manager.stop().expect("stop"),
        StopOutcome::Stopped { joined: true }
    );
    assert_eq!(manager.stop().expect("stop"), StopOutcome::WasIdle);
    assert_eq!(manager.last_exit().expect("exit"), Some(WorkerExit::Cancelled));
}
