use owo_colors::OwoColorize;

use crate::types::Outcome;

/// How a progress line should be classified by a front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorClass {
    Success,
    Warning,
    Error,
}

/// One terminal outcome, as handed to the reporting collaborator.
#[derive(Debug)]
pub struct ProgressEvent {
    /// Position of this outcome in completion order, starting at 1.
    pub sequence: usize,
    /// Fixed before the first event is emitted; sizes the counter column.
    pub total: usize,
    /// Canonical view link of the item.
    pub link: String,
    pub outcome: Outcome,
}

impl ProgressEvent {
    pub fn color_class(&self) -> ColorClass {
        match self.outcome {
            Outcome::Finished => ColorClass::Success,
            Outcome::Exists => ColorClass::Warning,
            _ => ColorClass::Error,
        }
    }
}

/// Consumer of per-item outcomes. The scheduler emits exactly one event per
/// admitted item that reaches a terminal state.
pub trait ProgressReporter: Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Prints one aligned line per item; skips and successes on stdout, error
/// outcomes on stderr so they survive redirection.
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, event: &ProgressEvent) {
        let width = event.total.to_string().len();
        let label = event.outcome.label();
        let line = format!(
            "  [{:>width$}/{}] {:<30} ... ",
            event.sequence, event.total, event.link
        );

        match event.color_class() {
            ColorClass::Success => {
                if !self.quiet {
                    println!("{line}{}", label.green());
                }
            }
            ColorClass::Warning => {
                if !self.quiet {
                    println!("{line}{}", label.yellow());
                }
            }
            ColorClass::Error => eprintln!("{line}{}", label.red()),
        }
    }
}
