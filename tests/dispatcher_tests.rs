// Integration tests for the dispatcher loop

mod common;

use bar_feed_engine::{
    BarFeedGenerator, DispatcherState, Dispatcher, EngineError, EngineResult, FeedGenerator,
    Frequency, GenericDataFeed, Subject,
};
use chrono::{DateTime, Utc};
use common::{minute_bar, minute_feed_config, single_bars, ts};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Subject driven by a fixed plan of per-tick outcomes.
#[derive(Default)]
struct PlannedSubject {
    plan: Vec<EngineResult<bool>>,
    dispatch_calls: usize,
}

impl PlannedSubject {
    fn new(plan: Vec<EngineResult<bool>>) -> Self {
        Self {
            plan: plan.into_iter().rev().collect(),
            dispatch_calls: 0,
        }
    }
}

impl Subject for PlannedSubject {
    fn name(&self) -> &str {
        "planned"
    }

    fn start(&mut self) -> EngineResult<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn join(&mut self) {}

    fn eof(&mut self) -> bool {
        self.plan.is_empty()
    }

    fn dispatch(&mut self) -> EngineResult<bool> {
        self.dispatch_calls += 1;
        self.plan.pop().unwrap_or(Ok(false))
    }

    fn peek_date_time(&mut self) -> Option<DateTime<Utc>> {
        None
    }
}

fn count_idle(dispatcher: &mut Dispatcher) -> Arc<AtomicUsize> {
    let idle = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&idle);
    dispatcher.idle_event().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    idle
}

#[test]
fn test_zero_subjects_terminates_immediately() {
    let mut dispatcher = Dispatcher::new();
    let idle = count_idle(&mut dispatcher);
    let started = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&started);
    dispatcher.start_event().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    dispatcher.run().expect("run should succeed");

    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(dispatcher.iterations(), 1);
    assert_eq!(idle.load(Ordering::SeqCst), 0);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[test]
fn test_all_eof_subjects_never_dispatched() {
    let a = Arc::new(Mutex::new(PlannedSubject::new(Vec::new())));
    let b = Arc::new(Mutex::new(PlannedSubject::new(Vec::new())));
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_subject(a.clone());
    dispatcher.add_subject(b.clone());

    dispatcher.run().expect("run should succeed");

    assert_eq!(dispatcher.iterations(), 1);
    assert_eq!(a.lock().unwrap().dispatch_calls, 0);
    assert_eq!(b.lock().unwrap().dispatch_calls, 0);
}

#[test]
fn test_idle_only_when_nothing_dispatched() {
    let subject = Arc::new(Mutex::new(PlannedSubject::new(vec![
        Ok(true),
        Ok(false),
        Ok(true),
        Ok(false),
        Ok(false),
    ])));
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_subject(subject.clone());
    let idle = count_idle(&mut dispatcher);

    dispatcher.run().expect("run should succeed");

    assert_eq!(subject.lock().unwrap().dispatch_calls, 5);
    assert_eq!(idle.load(Ordering::SeqCst), 3);
}

#[test]
fn test_active_subject_suppresses_idle() {
    let busy = Arc::new(Mutex::new(PlannedSubject::new(vec![Ok(true), Ok(true)])));
    let quiet = Arc::new(Mutex::new(PlannedSubject::new(vec![Ok(false), Ok(false)])));
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_subject(busy);
    dispatcher.add_subject(quiet);
    let idle = count_idle(&mut dispatcher);

    dispatcher.run().expect("run should succeed");
    assert_eq!(idle.load(Ordering::SeqCst), 0);
}

#[test]
fn test_non_fatal_error_counts_as_no_event() {
    let subject = Arc::new(Mutex::new(PlannedSubject::new(vec![
        Err(EngineError::Internal("hiccup".into())),
        Ok(true),
    ])));
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_subject(subject.clone());
    let idle = count_idle(&mut dispatcher);

    dispatcher.run().expect("non-fatal errors must not stop the loop");
    assert_eq!(subject.lock().unwrap().dispatch_calls, 2);
    assert_eq!(idle.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fatal_error_ends_run() {
    let subject = Arc::new(Mutex::new(PlannedSubject::new(vec![
        Ok(true),
        Err(EngineError::SymbolMismatch {
            expected: "A".into(),
            found: "B".into(),
        }),
        Ok(true),
    ])));
    let mut dispatcher = Dispatcher::new();
    dispatcher.add_subject(subject.clone());

    let err = dispatcher.run().expect_err("fatal error should surface");
    assert!(err.is_fatal());
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert_eq!(subject.lock().unwrap().dispatch_calls, 2);
}

#[test]
fn test_stop_handle_from_idle_handler() {
    let generator = Arc::new(BarFeedGenerator::new(vec![Frequency::MINUTE], 8));
    let feed = GenericDataFeed::new(generator.clone(), &minute_feed_config()).unwrap();
    let feed = Arc::new(Mutex::new(feed));

    let mut dispatcher = Dispatcher::new();
    dispatcher.add_subject(feed.clone());
    let stop = dispatcher.stop_handle();
    dispatcher.idle_event().subscribe(move |_| stop.stop());

    generator
        .append_new_value_to_buffer(ts(0), single_bars("A", minute_bar(0, 10.0)), Frequency::MINUTE)
        .unwrap();

    // The generator never finishes, so only the stop request ends the run.
    dispatcher.run().expect("run should succeed");
    assert_eq!(dispatcher.current_date_time(), None);
    assert_eq!(feed.lock().unwrap().dispatched_count(), 1);
    assert!(generator.is_complete());
}
