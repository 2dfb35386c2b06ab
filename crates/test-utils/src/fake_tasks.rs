use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use seqdag::exec::CompletionSignal;
use seqdag::services::{Mailer, Message, ServiceFuture};
use seqdag::task::{Task, TaskContext, TaskFuture, TaskLog, TaskOutcome, TaskSpec};

/// Shared record of `(work_dir_name, task)` executions, in call order.
pub type CallLog = Arc<Mutex<Vec<(String, String)>>>;

/// Tracks how many scripted tasks run at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A task whose outcomes are scripted up front.
///
/// Each execution pops the next outcome; once the script runs out every
/// further execution succeeds.
#[derive(Debug)]
pub struct ScriptedTask {
    spec: TaskSpec,
    script: Mutex<VecDeque<TaskOutcome>>,
    calls: CallLog,
    delay: Option<Duration>,
    gauge: Option<Arc<ConcurrencyGauge>>,
    signal: Option<CountingSignal>,
}

impl ScriptedTask {
    pub fn new(name: &str, order: i32, dependencies: &[&str]) -> Self {
        Self {
            spec: TaskSpec::new(name, order, dependencies),
            script: Mutex::new(VecDeque::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            gauge: None,
            signal: None,
        }
    }

    pub fn outcomes(self, outcomes: impl IntoIterator<Item = TaskOutcome>) -> Self {
        *self.script.lock() = outcomes.into_iter().collect();
        self
    }

    pub fn calls_into(mut self, calls: CallLog) -> Self {
        self.calls = calls;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn gauge(mut self, gauge: Arc<ConcurrencyGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Make this a gated task waiting on `signal`.
    pub fn gated(mut self, signal: CountingSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub fn arc(self) -> Arc<dyn Task> {
        Arc::new(self)
    }
}

impl Task for ScriptedTask {
    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn completion_signal(&self, _ctx: &TaskContext) -> Option<Box<dyn CompletionSignal>> {
        self.signal
            .clone()
            .map(|s| Box::new(s) as Box<dyn CompletionSignal>)
    }

    fn execute<'a>(&'a self, ctx: &'a TaskContext, log: &'a TaskLog) -> TaskFuture<'a> {
        Box::pin(async move {
            self.calls
                .lock()
                .push((ctx.work_dir_name.clone(), self.spec.name.clone()));
            if let Some(gauge) = &self.gauge {
                gauge.enter();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gauge) = &self.gauge {
                gauge.leave();
            }
            log.line(&format!("scripted task {} ran", self.spec.name));
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(TaskOutcome::success)
        })
    }
}

/// Completion signal that counts polls and opens after a set number of them.
#[derive(Debug, Clone)]
pub struct CountingSignal {
    polls: Arc<AtomicU32>,
    open_after: Option<u32>,
}

impl CountingSignal {
    /// Never observed.
    pub fn never() -> Self {
        Self {
            polls: Arc::new(AtomicU32::new(0)),
            open_after: None,
        }
    }

    /// Observed on the `n`th poll.
    pub fn after(n: u32) -> Self {
        Self {
            polls: Arc::new(AtomicU32::new(0)),
            open_after: Some(n),
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl CompletionSignal for CountingSignal {
    fn poll(&self) -> bool {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.open_after.is_some_and(|open| n >= open)
    }

    fn describe(&self) -> String {
        "counting signal".to_string()
    }
}

/// Mailer that keeps every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Message>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

impl Mailer for RecordingMailer {
    fn send<'a>(&'a self, message: &'a Message) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            self.sent.lock().push(message.clone());
            Ok(())
        })
    }

    fn sender(&self) -> Option<&str> {
        Some("seqdag@example.org")
    }
}
