//! Dispatcher: the simulation clock driving every subject once per iteration
//!
//! The loop is cooperative and single-threaded. Each iteration checks the
//! stop flag, asks every subject for EOF, records the earliest pending event
//! time and dispatches all subjects. An iteration in which nobody produced a
//! value fires the idle event instead.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::core::Event;
use crate::error::{EngineError, EngineResult};

/// Anything the dispatcher drives once per iteration.
pub trait Subject: Send {
    fn name(&self) -> &str {
        "subject"
    }

    fn start(&mut self) -> EngineResult<()>;

    fn stop(&mut self);

    fn join(&mut self);

    fn eof(&mut self) -> bool;

    /// Returns whether a value was produced. Must not block.
    fn dispatch(&mut self) -> EngineResult<bool>;

    /// Time of the next pending event, if one is known.
    fn peek_date_time(&mut self) -> Option<DateTime<Utc>>;
}

pub type SharedSubject = Arc<Mutex<dyn Subject>>;

fn lock(subject: &SharedSubject) -> MutexGuard<'_, dyn Subject + 'static> {
    subject.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    NotStarted,
    Running,
    Stopped,
}

/// Requests termination from any thread; honored at the next loop check.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Dispatcher {
    subjects: Vec<SharedSubject>,
    state: DispatcherState,
    stop: StopHandle,
    start_event: Event<()>,
    idle_event: Event<()>,
    current_date_time: Option<DateTime<Utc>>,
    idle_backoff: Option<Duration>,
    iterations: u64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            subjects: Vec::new(),
            state: DispatcherState::NotStarted,
            stop: StopHandle::default(),
            start_event: Event::new(),
            idle_event: Event::new(),
            current_date_time: None,
            idle_backoff: None,
            iterations: 0,
        }
    }

    pub fn with_config(config: &DispatcherConfig) -> Self {
        Self {
            idle_backoff: config.idle_backoff(),
            ..Self::new()
        }
    }

    pub fn add_subject<S: Subject + 'static>(&mut self, subject: Arc<Mutex<S>>) {
        self.subjects.push(subject);
    }

    pub fn add_shared_subject(&mut self, subject: SharedSubject) {
        self.subjects.push(subject);
    }

    pub fn subjects(&self) -> &[SharedSubject] {
        &self.subjects
    }

    pub fn start_event(&mut self) -> &mut Event<()> {
        &mut self.start_event
    }

    pub fn idle_event(&mut self) -> &mut Event<()> {
        &mut self.idle_event
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Earliest pending event time seen in the latest iteration.
    pub fn current_date_time(&self) -> Option<DateTime<Utc>> {
        self.current_date_time
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    fn shutdown(&mut self, count: usize) {
        for subject in self.subjects.iter().take(count) {
            let mut subject = lock(subject);
            subject.stop();
            subject.join();
        }
        self.state = DispatcherState::Stopped;
    }

    fn start_subjects(&mut self) -> EngineResult<()> {
        let failure = self.subjects.iter().enumerate().find_map(|(index, subject)| {
            let mut guard = lock(subject);
            match guard.start() {
                Ok(()) => None,
                Err(e) => Some((index, format!("{}: {}", guard.name(), e))),
            }
        });

        match failure {
            Some((index, reason)) => {
                error!("❌ Failed to start subject {}", reason);
                self.shutdown(index);
                Err(EngineError::SubjectStart(reason))
            }
            None => Ok(()),
        }
    }

    /// One pass over all subjects: `(eof, dispatched)`.
    fn dispatch_once(&mut self) -> EngineResult<(bool, bool)> {
        let mut eof = true;
        let mut smallest: Option<DateTime<Utc>> = None;
        for subject in &self.subjects {
            let mut subject = lock(subject);
            if !subject.eof() {
                eof = false;
                if let Some(t) = subject.peek_date_time() {
                    smallest = Some(smallest.map_or(t, |s| s.min(t)));
                }
            }
        }
        if eof {
            return Ok((true, false));
        }
        self.current_date_time = smallest;

        let mut dispatched = false;
        for subject in &self.subjects {
            let mut subject = lock(subject);
            match subject.dispatch() {
                Ok(produced) => dispatched |= produced,
                Err(e) if e.is_fatal() => {
                    error!("❌ Fatal {} error from {}: {}", e.category(), subject.name(), e);
                    return Err(e);
                }
                Err(e) => warn!("⚠️  {} error from {}: {}", e.category(), subject.name(), e),
            }
        }
        Ok((false, dispatched))
    }

    /// Run until every subject reports EOF, stop is requested, or a subject
    /// fails fatally.
    pub fn run(&mut self) -> EngineResult<()> {
        if self.state != DispatcherState::NotStarted {
            return Err(EngineError::Internal("dispatcher can only run once".to_string()));
        }
        self.state = DispatcherState::Running;

        self.start_subjects()?;
        info!("🚀 Dispatcher started with {} subject(s)", self.subjects.len());
        self.start_event.emit(&());

        let result = loop {
            if self.stop.is_stopped() {
                info!("🛑 Dispatcher stop requested");
                break Ok(());
            }
            self.iterations += 1;
            match self.dispatch_once() {
                Ok((true, _)) => {
                    debug!("All subjects at EOF after {} iterations", self.iterations);
                    break Ok(());
                }
                Ok((false, true)) => {}
                Ok((false, false)) => {
                    self.idle_event.emit(&());
                    if let Some(backoff) = self.idle_backoff {
                        std::thread::sleep(backoff);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let count = self.subjects.len();
        self.shutdown(count);
        info!("✅ Dispatcher finished after {} iterations", self.iterations);
        result
    }
}
