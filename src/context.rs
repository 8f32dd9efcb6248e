use std::{
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use miette::{Context, IntoDiagnostic, Result};

use crate::config::Settings;
use crate::ledger::Ledger;
use crate::types::{ItemMeta, Outcome};

/// All process-wide state of one invocation, in one place.
///
/// Constructed once, passed by reference into the scheduler and every
/// pipeline; dropping it is the teardown. Nothing here is reachable as a
/// global.
pub struct RunContext {
    pub settings: Settings,
    pub ledger: Ledger,

    cancelled: Arc<AtomicBool>,
    total: AtomicUsize,
    sequence: AtomicUsize,
    done: AtomicUsize,
    errors: AtomicUsize,

    json_log: Option<AppendLog>,
    unavailable_log: Option<AppendLog>,
}

/// Aggregate result of a run, input to the exit-status decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub errors: usize,
    pub interrupted: bool,
}

impl RunContext {
    pub fn new(settings: Settings) -> Result<Self> {
        let ledger = Ledger::init(settings.archive.as_deref())?;
        let json_log = settings.json.clone().map(AppendLog::new);
        let unavailable_log = settings.unavailable_list.clone().map(AppendLog::new);

        Ok(Self {
            settings,
            ledger,
            cancelled: Arc::new(AtomicBool::new(false)),
            total: AtomicUsize::new(0),
            sequence: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            json_log,
            unavailable_log,
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancelled
    }

    /// Owned handle to the cancellation flag, for the signal handler.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Fix the denominator of progress lines. Must happen before the first
    /// `record` call so the counter width never changes mid-run.
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Count one terminal outcome and claim its completion-order slot.
    pub fn record(&self, outcome: Outcome) -> usize {
        if outcome.is_done() {
            self.done.fetch_add(1, Ordering::Relaxed);
        } else if outcome.is_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Append the metadata record of a finished item to the JSON sidecar.
    pub fn log_meta(&self, meta: &ItemMeta) -> Result<()> {
        if let Some(log) = &self.json_log {
            let line = serde_json::to_string(meta)
                .into_diagnostic()
                .wrap_err("Could not serialize item metadata")?;
            log.append_line(&line)?;
        }
        Ok(())
    }

    /// Append the canonical link of an item the upstream declared missing.
    pub fn log_unavailable(&self, link: &str) -> Result<()> {
        if let Some(log) = &self.unavailable_log {
            log.append_line(link)?;
        }
        Ok(())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.total(),
            done: self.done.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            interrupted: self.is_cancelled(),
        }
    }
}

/// Append-only line sink, opened per call like the sidecar files always
/// were, with a lock so concurrent lines cannot interleave.
struct AppendLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AppendLog {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not open '{}'", self.path.display()))?;
        writeln!(file, "{line}")
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not append to '{}'", self.path.display()))
    }
}

/// Create the output directory and any missing parents of the configured
/// side files before anything runs.
pub fn prepare_directories(settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(&settings.output)
        .into_diagnostic()
        .wrap_err("Could not create output directory")?;

    for side_file in [&settings.archive, &settings.json, &settings.unavailable_list]
        .into_iter()
        .flatten()
    {
        if let Some(parent) = side_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not create parent of '{}'", side_file.display()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::types::UnavailableReason;

    fn context_in(dir: &Path) -> RunContext {
        let settings = Settings {
            output: dir.to_path_buf(),
            json: Some(dir.join("meta.json")),
            unavailable_list: Some(dir.join("unavailable.txt")),
            ..Default::default()
        };
        RunContext::new(settings).unwrap()
    }

    #[test]
    fn counters_follow_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());
        ctx.set_total(4);

        assert_eq!(ctx.record(Outcome::Finished), 1);
        assert_eq!(ctx.record(Outcome::Exists), 2);
        assert_eq!(ctx.record(Outcome::Unavailable(UnavailableReason::Gone)), 3);
        assert_eq!(ctx.record(Outcome::Corrupted), 4);

        let summary = ctx.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.done, 2);
        assert_eq!(summary.errors, 2);
        assert!(!summary.interrupted);
    }

    #[test]
    fn sidecars_accumulate_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        ctx.log_unavailable("https://coub.com/view/abc").unwrap();
        ctx.log_unavailable("https://coub.com/view/def").unwrap();

        let content = std::fs::read_to_string(dir.path().join("unavailable.txt")).unwrap();
        assert_eq!(content, "https://coub.com/view/abc\nhttps://coub.com/view/def\n");
    }

    #[test]
    fn json_sidecar_is_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());

        let meta = ItemMeta {
            id: "abc".to_string(),
            title: "t".to_string(),
            creation: "c".to_string(),
            channel: "ch".to_string(),
            community: "undefined".to_string(),
            tags: vec!["x".to_string()],
        };
        ctx.log_meta(&meta).unwrap();

        let content = std::fs::read_to_string(dir.path().join("meta.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["id"], "abc");
        assert_eq!(parsed["tags"][0], "x");
    }

    #[test]
    fn cancellation_is_sticky_and_visible() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path());
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.summary().interrupted);
    }
}
