use super::*;
use crate::monitor::TerminalState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const UNIT: Duration = Duration::from_millis(20);
const LONG: Duration = Duration::from_secs(600);

struct RecordingNotifier {
    tx: Sender<(Notification, Instant)>,
    fail: bool,
    calls: AtomicUsize,
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: Notification) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send((notification, Instant::now()));
        if self.fail {
            Err(DeliveryError::Status(500))
        } else {
            Ok(())
        }
    }
}

fn recorder(fail: bool) -> (Arc<RecordingNotifier>, Receiver<(Notification, Instant)>) {
    let (tx, rx) = unbounded();
    (
        Arc::new(RecordingNotifier {
            tx,
            fail,
            calls: AtomicUsize::new(0),
        }),
        rx,
    )
}

fn units(n: u32) -> Duration {
    UNIT * n
}

fn sample(title: &str) -> Notification {
    Notification {
        title: title.to_string(),
        message: "body".to_string(),
        timestamp: SystemTime::now(),
        category: "test".to_string(),
    }
}

#[test]
fn deadline_fires_once_per_idle_window() {
    let (sink, rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    assert!(engine.snapshot().armed);

    assert!(engine.fire_now());
    assert!(!engine.fire_now());

    let (notification, _) = rx.try_recv().unwrap();
    assert_eq!(notification.title, "Gemini needs attention");
    assert_eq!(notification.message, "No activity detected");
    assert_eq!(notification.category, BACKSTOP_CATEGORY);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

    let snapshot = engine.snapshot();
    assert!(snapshot.sent);
    assert!(snapshot.notified_since_interaction);
    assert!(!snapshot.armed);
}

#[test]
fn activity_after_fire_rearms_without_second_notification() {
    let (sink, _rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    assert!(engine.fire_now());

    for _ in 0..5 {
        engine.mark_activity();
        let snapshot = engine.snapshot();
        assert!(snapshot.armed);
        assert!(!snapshot.sent);
        assert!(snapshot.notified_since_interaction);
        assert!(!engine.fire_now());
    }
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn user_interaction_disables_until_output_resumes() {
    let (sink, _rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    assert!(engine.fire_now());

    engine.user_interaction();
    let snapshot = engine.snapshot();
    assert!(snapshot.disabled);
    assert!(!snapshot.notified_since_interaction);
    assert!(!snapshot.armed);
    assert!(!engine.fire_now());

    engine.mark_activity();
    assert!(!engine.snapshot().disabled);
    assert!(engine.fire_now());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn bell_suppresses_without_delivery() {
    let (sink, _rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    engine.suppress_until_interaction(true);
    let snapshot = engine.snapshot();
    assert!(snapshot.sent);
    assert!(!snapshot.armed);
    assert!(!engine.fire_now());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

    engine.suppress_until_interaction(false);
    assert!(!engine.snapshot().sent);
}

#[test]
fn session_reset_clears_every_suppression() {
    let (sink, _rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    assert!(engine.fire_now());
    engine.mark_activity();
    engine.suppress_until_interaction(true);

    let before = engine.last_activity();
    engine.reset_session();
    let snapshot = engine.snapshot();
    assert!(!snapshot.sent);
    assert!(!snapshot.disabled);
    assert!(!snapshot.notified_since_interaction);
    assert!(snapshot.armed);
    assert!(engine.last_activity() >= before);

    assert!(engine.fire_now());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn delivery_failure_is_swallowed() {
    let (sink, _rx) = recorder(true);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    assert!(engine.fire_now());
    assert!(engine.snapshot().sent);
    assert!(!engine.fire_now());
}

#[test]
fn closed_engine_ignores_signals() {
    let (sink, _rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    engine.close();
    engine.close();
    engine.mark_activity();
    engine.reset_session();
    let snapshot = engine.snapshot();
    assert!(snapshot.closed);
    assert!(!snapshot.armed);
    assert!(!engine.fire_now());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_timeout_never_arms() {
    let (sink, rx) = recorder(false);
    let engine = BackstopEngine::new(sink, Duration::ZERO);
    assert!(!engine.snapshot().armed);
    engine.mark_activity();
    engine.reset_session();
    assert!(!engine.snapshot().armed);
    assert!(rx.recv_timeout(units(3)).is_err());
}

#[test]
fn sending_through_engine_counts_as_activity() {
    let (sink, rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), LONG);
    engine.user_interaction();
    assert!(engine.snapshot().disabled);

    engine.send(sample("manual")).unwrap();
    let (forwarded, _) = rx.try_recv().unwrap();
    assert_eq!(forwarded.title, "manual");
    let snapshot = engine.snapshot();
    assert!(!snapshot.disabled);
    assert!(snapshot.armed);
}

#[test]
fn idle_start_fires_once_after_timeout() {
    let (sink, rx) = recorder(false);
    let start = Instant::now();
    let engine = BackstopEngine::new(sink.clone(), units(30));
    thread::sleep(units(35));
    let (_, at) = rx.recv_timeout(units(50)).unwrap();
    assert!(at.duration_since(start) >= units(30));
    assert!(rx.recv_timeout(units(10)).is_err());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    drop(engine);
}

#[test]
fn output_pushes_deadline_back() {
    let (sink, rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), units(30));
    thread::sleep(units(10));
    let activity_at = Instant::now();
    engine.mark_activity();
    thread::sleep(units(35));
    let (_, at) = rx.recv_timeout(units(50)).unwrap();
    assert!(at.duration_since(activity_at) >= units(30));
    assert!(rx.recv_timeout(units(10)).is_err());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn keypress_before_deadline_prevents_notification() {
    let (sink, rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), units(30));
    thread::sleep(units(10));
    engine.user_interaction();
    thread::sleep(units(35));
    assert!(rx.try_recv().is_err());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    drop(engine);
}

#[test]
fn screen_clear_allows_second_notification() {
    let (sink, rx) = recorder(false);
    let engine = BackstopEngine::new(sink.clone(), units(30));
    thread::sleep(units(35));
    rx.recv_timeout(units(50)).unwrap();
    engine.reset_session();
    thread::sleep(units(35));
    rx.recv_timeout(units(50)).unwrap();
    assert!(rx.recv_timeout(units(10)).is_err());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_signals_never_double_fire() {
    let (sink, _rx) = recorder(false);
    let engine = Arc::new(BackstopEngine::new(sink.clone(), Duration::from_millis(1)));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..200 {
                    engine.mark_activity();
                    let _ = engine.fire_now();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    thread::sleep(units(5));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn pipeline_applies_context_before_sink() {
    let (sink, rx) = recorder(false);
    let terminal = Arc::new(TerminalState::new());
    terminal.set_title("✨ Test Coverage");
    let pipeline = Pipeline::new(sink).with_stage(
        ContextEnricher::new("Gemini CLI", "gemini")
            .with_cwd_basename("repo")
            .with_terminal(Arc::clone(&terminal)),
    );
    assert_eq!(pipeline.stage_count(), 1);

    pipeline.send(sample("original")).unwrap();
    let (notification, _) = rx.try_recv().unwrap();
    assert_eq!(notification.title, "Gemini CLI: repo - Test Coverage");
    assert_eq!(notification.message, "body");

    terminal.set_title("gemini");
    pipeline.send(sample("original")).unwrap();
    assert_eq!(rx.try_recv().unwrap().0.title, "Gemini CLI: repo");
}

#[test]
fn context_without_cwd_or_title_keeps_original() {
    let (sink, rx) = recorder(false);
    let pipeline = Pipeline::new(sink)
        .with_stage(ContextEnricher::new("Gemini CLI", "gemini").with_cwd_basename(""));
    pipeline.send(sample("original")).unwrap();
    assert_eq!(rx.try_recv().unwrap().0.title, "original");

    let (sink, rx) = recorder(false);
    let terminal = Arc::new(TerminalState::new());
    terminal.set_title("build");
    let pipeline = Pipeline::new(sink).with_stage(
        ContextEnricher::new("Gemini CLI", "gemini")
            .with_cwd_basename("")
            .with_terminal(terminal),
    );
    pipeline.send(sample("original")).unwrap();
    assert_eq!(rx.try_recv().unwrap().0.title, "Gemini CLI: build");
}

#[test]
fn engine_over_pipeline_enriches_backstop() {
    let (sink, rx) = recorder(false);
    let pipeline: Arc<dyn Notifier> = Arc::new(
        Pipeline::new(sink).with_stage(
            ContextEnricher::new("Gemini CLI", "gemini").with_cwd_basename("repo"),
        ),
    );
    let engine = BackstopEngine::new(pipeline, LONG);
    assert!(engine.fire_now());
    let (notification, _) = rx.try_recv().unwrap();
    assert_eq!(notification.title, "Gemini CLI: repo");
    assert_eq!(notification.category, "backstop");
}
