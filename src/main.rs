mod cli;
mod client;
mod config;
mod context;
mod ledger;
mod logging;
mod naming;
mod outside;
mod pipeline;
mod report;
mod scheduler;
mod streams;
mod types;

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing::{error, info};

use crate::cli::Args;
use crate::client::HttpClient;
use crate::config::Settings;
use crate::context::{prepare_directories, RunContext, RunSummary};
use crate::outside::Ffmpeg;
use crate::report::ConsoleReporter;
use crate::scheduler::Scheduler;

/// Process exit statuses, one per failure family.
mod status {
    /// Missing required software (FFmpeg)
    pub const DEPENDENCY: u8 = 1;
    /// Invalid user-specified option
    pub const OPTIONS: u8 = 2;
    /// Misc. runtime error
    pub const RUNTIME: u8 = 3;
    /// Some input items failed to download
    pub const DOWNLOAD: u8 = 4;
    /// Early termination was requested by the user
    pub const INTERRUPT: u8 = 5;
    /// Connection couldn't be established or was lost
    pub const CONNECTION: u8 = 6;
    /// Not a single input item could be downloaded
    pub const NOTHING: u8 = 7;
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init_logging(args.log_level()) {
        eprintln!("{e:?}");
        return ExitCode::from(status::RUNTIME);
    }

    let settings = match Settings::load(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid options: {e:?}");
            return ExitCode::from(status::OPTIONS);
        }
    };

    let ids = match cli::collect_ids(&args) {
        Ok(ids) => ids,
        Err(e) => {
            error!("Invalid input: {e:?}");
            return ExitCode::from(status::OPTIONS);
        }
    };
    if ids.is_empty() {
        error!("No coub IDs or links given");
        return ExitCode::from(status::OPTIONS);
    }

    // Everything that can only fail due to the environment is checked
    // before the first item is scheduled
    let remuxer = match Ffmpeg::new() {
        Ok(remuxer) => remuxer,
        Err(_) => {
            error!("FFmpeg not found");
            return ExitCode::from(status::DEPENDENCY);
        }
    };

    let client = HttpClient::new();
    if let Err(e) = client.check_connection() {
        error!("{e:?}");
        return ExitCode::from(status::CONNECTION);
    }

    if let Err(e) = prepare_directories(&settings) {
        error!("{e:?}");
        return ExitCode::from(status::RUNTIME);
    }

    let ctx = match RunContext::new(settings) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("{e:?}");
            return ExitCode::from(status::RUNTIME);
        }
    };
    info!("{} items already in the archive", ctx.ledger.archive_len());

    // Ctrl-C only raises the shared flag; in-flight chunk loops and retry
    // loops observe it and unwind through their normal cleanup
    let cancel = ctx.cancel_handle();
    if let Err(e) = ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed)) {
        error!("Could not install the interrupt handler: {e}");
        return ExitCode::from(status::RUNTIME);
    }

    let reporter = ConsoleReporter::new(args.quiet);
    let summary = Scheduler::new(&ctx, &client, &remuxer, &reporter).run(ids);

    if summary.interrupted {
        eprintln!("{}", "User interrupt!".yellow());
    } else if !args.quiet {
        println!(
            "\nDone: {} of {} items ({} errors)",
            summary.done, summary.total, summary.errors
        );
    }

    ExitCode::from(exit_status(summary))
}

fn exit_status(summary: RunSummary) -> u8 {
    if summary.interrupted {
        status::INTERRUPT
    } else if summary.errors == 0 {
        0
    } else if summary.done == 0 {
        status::NOTHING
    } else {
        status::DOWNLOAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(done: usize, errors: usize, interrupted: bool) -> RunSummary {
        RunSummary {
            total: done + errors,
            done,
            errors,
            interrupted,
        }
    }

    #[test]
    fn exit_status_families() {
        assert_eq!(exit_status(summary(3, 0, false)), 0);
        assert_eq!(exit_status(summary(2, 1, false)), status::DOWNLOAD);
        assert_eq!(exit_status(summary(0, 3, false)), status::NOTHING);
        assert_eq!(exit_status(summary(1, 1, true)), status::INTERRUPT);
    }

    #[test]
    fn empty_run_is_a_success() {
        assert_eq!(exit_status(summary(0, 0, false)), 0);
    }
}
