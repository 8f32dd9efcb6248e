use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, info};

use crate::client::{view_link, CoubApi};
use crate::context::{RunContext, RunSummary};
use crate::outside::Remuxer;
use crate::pipeline::ItemPipeline;
use crate::report::{ProgressEvent, ProgressReporter};
use crate::types::Outcome;

/// Runs item pipelines over a bounded pool of worker threads.
///
/// The pool size is the single concurrency control point: one worker holds
/// at most one item, so at most `connections` items are in flight. Workers
/// share the transport, the ledger, and the counters through the context;
/// each item itself is owned by exactly one worker.
pub struct Scheduler<'a> {
    ctx: &'a RunContext,
    api: &'a dyn CoubApi,
    remuxer: &'a dyn Remuxer,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        ctx: &'a RunContext,
        api: &'a dyn CoubApi,
        remuxer: &'a dyn Remuxer,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            ctx,
            api,
            remuxer,
            reporter,
        }
    }

    /// Admit the identifier sequence through the ledger, run every admitted
    /// item to a terminal outcome, and aggregate the counts.
    pub fn run(&self, ids: impl IntoIterator<Item = String>) -> RunSummary {
        // Admission: the session set drops repeats within the sequence, the
        // archive drops items finished in earlier invocations. Both are
        // silent; a duplicate is not an error.
        let admitted: Vec<String> = ids
            .into_iter()
            .filter(|id| {
                if self.ctx.ledger.check_session(id) {
                    debug!("Dropping duplicate id {id}");
                    false
                } else if self.ctx.ledger.in_archive(id) {
                    debug!("Skipping archived id {id}");
                    false
                } else {
                    true
                }
            })
            .collect();

        // The denominator must be final before any worker can emit a
        // progress line, or the counter column would change width mid-run
        self.ctx.set_total(admitted.len());

        if admitted.is_empty() {
            info!("Nothing to download");
            return self.ctx.summary();
        }
        info!("{} items to download", admitted.len());

        let workers = self.ctx.settings.connections.min(admitted.len());

        std::thread::scope(|scope| {
            let (sender, receiver) = bounded::<String>(workers);

            for n in 0..workers {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("worker-{n}"))
                    .spawn_scoped(scope, move || self.work(receiver))
                    .expect("Could not spawn worker thread");
            }
            drop(receiver);

            for id in admitted {
                if self.ctx.is_cancelled() {
                    break;
                }
                if sender.send(id).is_err() {
                    break;
                }
            }

            // Closing the input channel is what lets the workers finish
            drop(sender);
        });

        self.ctx.summary()
    }

    fn work(&self, receiver: Receiver<String>) {
        let pipeline = ItemPipeline::new(self.ctx, self.api, self.remuxer);

        for id in receiver {
            // Drain without processing once the run is cancelled, so the
            // scope closes promptly
            if self.ctx.is_cancelled() {
                continue;
            }

            let outcome = pipeline.process(&id);
            if outcome == Outcome::Cancelled {
                continue;
            }

            let sequence = self.ctx.record(outcome);
            self.reporter.report(&ProgressEvent {
                sequence,
                total: self.ctx.total(),
                link: view_link(&id),
                outcome,
            });
        }

        debug!("No more items, stopping");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use indoc::indoc;
    use miette::miette;

    use super::*;
    use crate::client::FetchError;
    use crate::config::Settings;
    use crate::outside::StreamHealth;
    use crate::types::MetadataPayload;

    const VIDEO_ONLY_PAYLOAD: &str = indoc! {r#"
        {
            "title": "silent loop",
            "created_at": "2020-05-01T12:00:00Z",
            "channel": {"title": "someone"},
            "file_versions": {
                "html5": {
                    "video": {"med": {"url": "https://s.coub.example/v.mp4", "size": 100}},
                    "audio": {}
                }
            }
        }
    "#};

    const ERROR_PAYLOAD: &str = r#"{"error": "Coub not found"}"#;

    /// Serves a fixed payload per id and counts metadata fetches.
    struct MapApi {
        payloads: HashMap<String, String>,
        fetches: AtomicUsize,
    }

    impl MapApi {
        fn new(payloads: &[(&str, &str)]) -> Self {
            Self {
                payloads: payloads
                    .iter()
                    .map(|(id, p)| (id.to_string(), p.to_string()))
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn all(ids: &[&str]) -> Self {
            Self::new(
                &ids.iter()
                    .map(|&id| (id, VIDEO_ONLY_PAYLOAD))
                    .collect::<Vec<_>>(),
            )
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl CoubApi for MapApi {
        fn fetch_metadata(&self, id: &str) -> Result<MetadataPayload, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let payload = self
                .payloads
                .get(id)
                .ok_or_else(|| FetchError::Transient(format!("no payload for {id}")))?;
            serde_json::from_str(payload).map_err(|e| FetchError::Transient(e.to_string()))
        }

        fn save_stream(
            &self,
            url: &str,
            dest: &Path,
            cancel: &AtomicBool,
            _chunk_size: usize,
        ) -> Result<(), FetchError> {
            if cancel.load(Ordering::Relaxed) {
                return Err(FetchError::Cancelled);
            }
            std::fs::write(dest, url).map_err(FetchError::Io)
        }
    }

    #[derive(Debug)]
    struct SoundRemuxer;

    impl Remuxer for SoundRemuxer {
        fn probe(&self, _stream: &Path) -> miette::Result<StreamHealth> {
            Ok(StreamHealth::Sound)
        }

        fn merge(
            &self,
            _playlist: &Path,
            _audio: &Path,
            out: &Path,
            _duration: Option<&str>,
        ) -> miette::Result<()> {
            std::fs::write(out, b"merged").map_err(|e| miette!(e))
        }
    }

    #[derive(Default)]
    struct CollectingReporter {
        events: Mutex<Vec<(usize, usize, String, Outcome)>>,
    }

    impl ProgressReporter for CollectingReporter {
        fn report(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push((
                event.sequence,
                event.total,
                event.link.clone(),
                event.outcome,
            ));
        }
    }

    fn context(dir: &Path, settings: Settings) -> RunContext {
        let settings = Settings {
            output: dir.to_path_buf(),
            ..settings
        };
        RunContext::new(settings).unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicate_ids_run_exactly_one_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Settings::default());
        let api = MapApi::all(&["aaa", "bbb"]);
        let reporter = CollectingReporter::default();

        let summary = Scheduler::new(&ctx, &api, &SoundRemuxer, &reporter)
            .run(ids(&["aaa", "bbb", "aaa"]));

        assert_eq!(summary.total, 2);
        assert_eq!(summary.done, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(api.fetch_count(), 2);
        assert_eq!(reporter.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn archived_ids_are_never_fetched_again() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.txt");
        std::fs::write(&archive, "aaa\n").unwrap();

        let ctx = context(
            dir.path(),
            Settings {
                archive: Some(archive.clone()),
                ..Default::default()
            },
        );
        let api = MapApi::all(&["aaa"]);
        let reporter = CollectingReporter::default();

        let summary =
            Scheduler::new(&ctx, &api, &SoundRemuxer, &reporter).run(ids(&["aaa"]));

        assert_eq!(summary.total, 0);
        assert_eq!(summary.done, 0);
        assert_eq!(summary.errors, 0);
        assert_eq!(api.fetch_count(), 0);
        assert!(reporter.events.lock().unwrap().is_empty());
        // The archive itself is untouched
        assert_eq!(std::fs::read_to_string(archive).unwrap(), "aaa\n");
    }

    #[test]
    fn counters_aggregate_mixed_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Settings::default());
        let api = MapApi::new(&[
            ("good", VIDEO_ONLY_PAYLOAD),
            ("gone", ERROR_PAYLOAD),
        ]);
        let reporter = CollectingReporter::default();

        let summary =
            Scheduler::new(&ctx, &api, &SoundRemuxer, &reporter).run(ids(&["good", "gone"]));

        assert_eq!(summary.total, 2);
        assert_eq!(summary.done, 1);
        assert_eq!(summary.errors, 1);

        let events = reporter.events.lock().unwrap();
        let gone = events
            .iter()
            .find(|(_, _, link, _)| link.ends_with("/gone"))
            .unwrap();
        assert!(gone.3.is_error());
    }

    #[test]
    fn sequences_are_unique_and_total_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            dir.path(),
            Settings {
                connections: 4,
                ..Default::default()
            },
        );
        let all: Vec<String> = (0..8).map(|n| format!("id{n}")).collect();
        let api = MapApi::all(&all.iter().map(String::as_str).collect::<Vec<_>>());
        let reporter = CollectingReporter::default();

        let summary = Scheduler::new(&ctx, &api, &SoundRemuxer, &reporter).run(all);

        assert_eq!(summary.done, 8);

        let events = reporter.events.lock().unwrap();
        let mut sequences: Vec<usize> = events.iter().map(|e| e.0).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
        assert!(events.iter().all(|e| e.1 == 8));
    }

    #[test]
    fn cancelled_run_reports_interrupted_and_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Settings::default());
        ctx.cancel();
        let api = MapApi::all(&["aaa", "bbb"]);
        let reporter = CollectingReporter::default();

        let summary =
            Scheduler::new(&ctx, &api, &SoundRemuxer, &reporter).run(ids(&["aaa", "bbb"]));

        assert!(summary.interrupted);
        assert_eq!(api.fetch_count(), 0);
        assert!(reporter.events.lock().unwrap().is_empty());
    }

    #[test]
    fn successes_reach_the_archive_for_the_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive.txt");
        let settings = Settings {
            archive: Some(archive.clone()),
            ..Default::default()
        };

        let ctx = context(dir.path(), settings.clone());
        let api = MapApi::all(&["aaa"]);
        let reporter = CollectingReporter::default();
        let summary =
            Scheduler::new(&ctx, &api, &SoundRemuxer, &reporter).run(ids(&["aaa"]));
        assert_eq!(summary.done, 1);
        drop(ctx);

        // Second invocation with the same archive: the item is skipped
        // before any network traffic
        let ctx = context(dir.path(), settings);
        let api = MapApi::all(&["aaa"]);
        let summary = Scheduler::new(&ctx, &api, &SoundRemuxer, &CollectingReporter::default())
            .run(ids(&["aaa"]));
        assert_eq!(summary.total, 0);
        assert_eq!(api.fetch_count(), 0);
    }
}
