//! Phase checklist
//!
//! Records the pipeline's phases in a fixed, declared order together with
//! sub-validations, and renders the whole checklist exactly once: either
//! explicitly, from a [`FinalizeGuard`] on drop, or from the chained panic
//! hook installed by [`install_exit_hook`].

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod phases {
    use super::PhaseSpec;

    pub const INTENT: &str = "intent";
    pub const NETWORK: &str = "network";
    pub const DERIVE: &str = "derive";
    pub const TOKEN_ACCOUNTS: &str = "token_accounts";
    pub const BUILD: &str = "build";
    pub const SIMULATE: &str = "simulate";
    pub const SUBMIT: &str = "submit";
    pub const CONFIRM: &str = "confirm";

    /// Sub-validations hosted by `simulate`
    pub const ACCOUNT_ORDERING: &str = "account_ordering";
    pub const SEEDS: &str = "seeds";
    /// Sub-validation hosted by `submit`
    pub const ACKNOWLEDGED: &str = "acknowledged";

    pub const PIPELINE: [PhaseSpec; 8] = [
        PhaseSpec::new(INTENT, "Validate order intent"),
        PhaseSpec::new(NETWORK, "Endpoint connectivity"),
        PhaseSpec::new(DERIVE, "Derive program addresses"),
        PhaseSpec::new(TOKEN_ACCOUNTS, "Token accounts and token program"),
        PhaseSpec::new(BUILD, "Assemble accounts and instructions"),
        PhaseSpec::new(SIMULATE, "Program preflight"),
        PhaseSpec::new(SUBMIT, "Send transaction"),
        PhaseSpec::new(CONFIRM, "Await confirmation"),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpec {
    pub key: &'static str,
    pub title: &'static str,
}

impl PhaseSpec {
    pub const fn new(key: &'static str, title: &'static str) -> Self {
        Self { key, title }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Ok,
    Fail,
}

impl StepStatus {
    fn label(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Ok => "ok",
            StepStatus::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubValidation {
    pub name: String,
    pub status: StepStatus,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub key: &'static str,
    pub title: &'static str,
    pub status: StepStatus,
    pub note: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub subs: Vec<SubValidation>,
}

impl StepRecord {
    fn pending(spec: &PhaseSpec) -> Self {
        Self {
            key: spec.key,
            title: spec.title,
            status: StepStatus::Pending,
            note: None,
            started_at: None,
            finished_at: None,
            subs: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Turns records into text
pub trait ChecklistRenderer: Send + Sync {
    fn render(&self, records: &[StepRecord]) -> String;
}

/// Receives the rendered checklist
pub trait ChecklistSink: Send + Sync {
    fn emit(&self, rendered: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRenderer;

impl ChecklistRenderer for PlainTextRenderer {
    fn render(&self, records: &[StepRecord]) -> String {
        let mut out = String::from("Checklist:\n");
        for (i, record) in records.iter().enumerate() {
            let _ = write!(
                out,
                "  {:>2}. [{:<7}] {}: {}",
                i + 1,
                record.status.label(),
                record.key,
                record.title
            );
            if let Some(ms) = record.elapsed_ms() {
                let _ = write!(out, " ({} ms)", ms);
            }
            if let Some(note) = &record.note {
                let _ = write!(out, " | {}", note);
            }
            out.push('\n');
            for sub in &record.subs {
                let _ = write!(out, "        [{:<7}] {}", sub.status.label(), sub.name);
                if let Some(note) = &sub.note {
                    let _ = write!(out, " | {}", note);
                }
                out.push('\n');
            }
        }
        out
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl ChecklistSink for StderrSink {
    fn emit(&self, rendered: &str) {
        eprint!("{}", rendered);
    }
}

/// Keeps every emitted render in memory
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    buffer: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<String> {
        self.buffer.lock().clone()
    }
}

impl ChecklistSink for BufferSink {
    fn emit(&self, rendered: &str) {
        self.buffer.lock().push(rendered.to_string());
    }
}

pub struct StepTracker {
    records: Mutex<Vec<StepRecord>>,
    renderer: Box<dyn ChecklistRenderer>,
    sink: Box<dyn ChecklistSink>,
    flushed: AtomicBool,
    hook_installed: AtomicBool,
}

impl std::fmt::Debug for StepTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTracker")
            .field("records", &*self.records.lock())
            .field("flushed", &self.flushed.load(Ordering::SeqCst))
            .finish()
    }
}

impl StepTracker {
    /// Plain text to stderr
    pub fn new(phases: &[PhaseSpec]) -> Self {
        Self::with_output(phases, Box::new(PlainTextRenderer), Box::new(StderrSink))
    }

    pub fn pipeline() -> Self {
        Self::new(&phases::PIPELINE)
    }

    pub fn with_output(
        phases: &[PhaseSpec],
        renderer: Box<dyn ChecklistRenderer>,
        sink: Box<dyn ChecklistSink>,
    ) -> Self {
        Self {
            records: Mutex::new(phases.iter().map(StepRecord::pending).collect()),
            renderer,
            sink,
            flushed: AtomicBool::new(false),
            hook_installed: AtomicBool::new(false),
        }
    }

    fn with_record<F>(&self, key: &str, f: F)
    where
        F: FnOnce(&mut StepRecord),
    {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.key == key) {
            Some(record) => f(record),
            None => warn!(phase = key, "Ignoring update for undeclared phase"),
        }
    }

    pub fn start(&self, key: &str) {
        self.with_record(key, |r| {
            r.status = StepStatus::Running;
            r.started_at = Some(Utc::now());
            r.finished_at = None;
        });
    }

    pub fn ok(&self, key: &str, note: impl Into<String>) {
        self.finish(key, StepStatus::Ok, note.into());
    }

    pub fn fail(&self, key: &str, note: impl Into<String>) {
        self.finish(key, StepStatus::Fail, note.into());
    }

    fn finish(&self, key: &str, status: StepStatus, note: String) {
        debug!(phase = key, status = status.label(), note = %note, "Phase finished");
        self.with_record(key, |r| {
            let now = Utc::now();
            r.started_at.get_or_insert(now);
            r.finished_at = Some(now);
            r.status = status;
            r.note = (!note.is_empty()).then_some(note);
        });
    }

    pub fn sub_ok(&self, key: &str, name: &str, note: impl Into<String>) {
        self.sub(key, name, StepStatus::Ok, note.into());
    }

    pub fn sub_fail(&self, key: &str, name: &str, note: impl Into<String>) {
        self.sub(key, name, StepStatus::Fail, note.into());
    }

    /// Sub-validations are append-only; re-recording a name adds an entry
    fn sub(&self, key: &str, name: &str, status: StepStatus, note: String) {
        self.with_record(key, |r| {
            r.subs.push(SubValidation {
                name: name.to_string(),
                status,
                note: (!note.is_empty()).then_some(note),
                at: Utc::now(),
            })
        });
    }

    /// Most recent entry recorded for sub-validation `name` under `key`
    pub fn latest_sub(&self, key: &str, name: &str) -> Option<SubValidation> {
        self.records
            .lock()
            .iter()
            .find(|r| r.key == key)
            .and_then(|r| r.subs.iter().rev().find(|s| s.name == name).cloned())
    }

    pub fn status(&self, key: &str) -> Option<StepStatus> {
        self.records
            .lock()
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.status)
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.records.lock().clone()
    }

    pub fn render(&self) -> String {
        let records = self.records.lock();
        self.renderer.render(&records)
    }

    /// Emit the checklist; only the first call renders
    pub fn flush(&self) -> bool {
        if self.flushed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let rendered = self.render();
        self.sink.emit(&rendered);
        true
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

/// Flushes its tracker when dropped, on success, error or unwind alike
#[must_use = "the checklist is flushed when the guard is dropped"]
pub struct FinalizeGuard {
    tracker: Arc<StepTracker>,
}

impl FinalizeGuard {
    pub fn tracker(&self) -> &Arc<StepTracker> {
        &self.tracker
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        self.tracker.flush();
    }
}

pub fn finalize_guard(tracker: Arc<StepTracker>) -> FinalizeGuard {
    FinalizeGuard { tracker }
}

static EXIT_HOOK: OnceCell<()> = OnceCell::new();

/// Chain a panic hook that flushes `tracker`. Registers at most once per
/// tracker and once per process; returns whether this call registered.
pub fn install_exit_hook(tracker: Arc<StepTracker>) -> bool {
    if tracker.hook_installed.swap(true, Ordering::SeqCst) {
        return false;
    }
    if EXIT_HOOK.set(()).is_err() {
        return false;
    }
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracker.flush();
        previous(info);
    }));
    true
}
