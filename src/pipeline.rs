use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::{debug, warn};

use crate::client::{view_link, CoubApi, FetchError};
use crate::context::RunContext;
use crate::naming::assemble_name;
use crate::outside::{Remuxer, StreamHealth};
use crate::streams::{select_streams, Selection};
use crate::types::{AacPreference, ItemMeta, MetadataPayload, Outcome, UnavailableReason};

/// Reserved suffix for in-flight stream files.
///
/// Downloads write to `<final name>.gyre` and are renamed only after the
/// transfer completes, so a partial file can never sit at a final name.
/// The suffix is deliberately not `.part`: other downloaders use that one,
/// and a cleanup pass here must never be able to touch their files.
pub const RESERVED_SUFFIX: &str = ".gyre";

/// One downloadable unit, exclusively owned by the task processing it.
#[derive(Debug)]
pub struct Item {
    pub id: String,
    pub link: String,
    pub meta: Option<ItemMeta>,
    video_url: Option<String>,
    audio_url: Option<String>,
    video_file: Option<PathBuf>,
    audio_file: Option<PathBuf>,
    merged_file: Option<PathBuf>,
}

impl Item {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            link: view_link(id),
            meta: None,
            video_url: None,
            audio_url: None,
            video_file: None,
            audio_file: None,
            merged_file: None,
        }
    }
}

/// The per-item state machine: fetch metadata, check existence, download,
/// verify, merge, log. Stages return outcomes instead of raising; whatever
/// happens, cleanup runs before the outcome is handed back.
pub struct ItemPipeline<'a> {
    ctx: &'a RunContext,
    api: &'a dyn CoubApi,
    remuxer: &'a dyn Remuxer,
}

enum DownloadFailure {
    Cancelled,
    Failed(String),
}

enum RetryError {
    Exhausted,
    Cancelled,
}

impl<'a> ItemPipeline<'a> {
    pub fn new(ctx: &'a RunContext, api: &'a dyn CoubApi, remuxer: &'a dyn Remuxer) -> Self {
        Self { ctx, api, remuxer }
    }

    /// Drive one item to its terminal outcome.
    pub fn process(&self, id: &str) -> Outcome {
        let mut item = Item::new(id);
        let outcome = self.run_stages(&mut item);
        self.clean_up(&item, outcome);
        debug!("Item {id} terminal: {outcome:?}");
        outcome
    }

    fn run_stages(&self, item: &mut Item) -> Outcome {
        let settings = &self.ctx.settings;

        // First existence check. With the default template the output name
        // is the id, so this settles the item without an API request. With
        // a custom template the real name is unknowable before the
        // metadata arrives and the check runs again below.
        if !settings.has_custom_template()
            && !settings.overwrite
            && self.existing_output(&item.id).is_some()
        {
            return Outcome::Exists;
        }

        let payload = match self.fetch_metadata(&item.id) {
            Ok(payload) => payload,
            Err(RetryError::Cancelled) => return Outcome::Cancelled,
            Err(RetryError::Exhausted) => {
                return Outcome::Unavailable(UnavailableReason::RetryExhausted)
            }
        };

        match select_streams(&payload, settings) {
            Selection::Streams { video, audio } => {
                item.video_url = video;
                item.audio_url = audio;
            }
            Selection::Unavailable(reason) => {
                // Only items the API itself could not serve belong on the
                // unavailable list; a retry exhaustion says nothing about
                // the item
                if let Err(e) = self.ctx.log_unavailable(&item.link) {
                    warn!("Could not record unavailable item: {e}");
                }
                return Outcome::Unavailable(reason);
            }
        }

        let meta = ItemMeta::from_payload(&item.id, &payload);
        let name = assemble_name(&meta, settings);
        item.meta = Some(meta);
        self.assign_paths(item, &name);

        // Second existence check, now under the real output name.
        if settings.has_custom_template()
            && !settings.overwrite
            && self.existing_output(&name).is_some()
        {
            return Outcome::Exists;
        }

        match self.download(item) {
            Ok(()) => {}
            Err(DownloadFailure::Cancelled) => return Outcome::Cancelled,
            Err(DownloadFailure::Failed(msg)) => {
                warn!("Download of {} failed: {msg}", item.link);
                return Outcome::Corrupted;
            }
        }

        if !self.verify(item) {
            return Outcome::Corrupted;
        }

        if item.video_file.is_some() && item.audio_file.is_some() && !settings.share {
            if let Err(msg) = self.merge(item) {
                warn!("Merge of {} failed: {msg}", item.link);
                return Outcome::Corrupted;
            }
        }

        // An item is a success from here on; losing a log line must not
        // take the item down with it
        if let Err(e) = self.ctx.ledger.append(&item.id) {
            warn!("Could not append {} to the archive: {e}", item.id);
        }
        if let Some(meta) = &item.meta {
            if let Err(e) = self.ctx.log_meta(meta) {
                warn!("Could not append {} to the JSON log: {e}", item.id);
            }
        }

        self.preview(item);

        Outcome::Finished
    }

    /// Metadata fetch behind the bounded retry policy: a negative budget
    /// retries forever, zero means a single attempt. Only transient
    /// failures are retried, and cancellation cuts the loop short.
    fn fetch_metadata(&self, id: &str) -> Result<MetadataPayload, RetryError> {
        let budget = self.ctx.settings.retries;
        let mut attempt = 0;

        loop {
            if self.ctx.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let error = match self.api.fetch_metadata(id) {
                Ok(payload) => return Ok(payload),
                Err(FetchError::Cancelled) => return Err(RetryError::Cancelled),
                Err(error) => error,
            };

            attempt += 1;
            if 0 <= budget && budget < attempt {
                warn!("Out of metadata retries for {id}: {error}");
                return Err(RetryError::Exhausted);
            }
            debug!("Retrying metadata fetch for {id} (attempt {attempt}): {error}");
        }
    }

    /// The output file the current options would produce for `name`, when
    /// it is already on disk.
    fn existing_output(&self, name: &str) -> Option<PathBuf> {
        let settings = &self.ctx.settings;

        let mut candidates = Vec::new();
        if settings.video_only() || settings.share {
            candidates.push(format!("{name}.mp4"));
        } else if settings.audio_only() {
            // The audio extension depends on which encoding family wins,
            // which is unknowable before the API answers; check both the
            // policy allows
            if settings.aac > AacPreference::Mp3Only {
                candidates.push(format!("{name}.m4a"));
            }
            if settings.aac < AacPreference::AacOnly {
                candidates.push(format!("{name}.mp3"));
            }
        } else {
            candidates.push(format!("{name}.{}", settings.merge_ext));
        }

        candidates
            .into_iter()
            .map(|file| settings.output.join(file))
            .find(|path| path.exists())
    }

    fn assign_paths(&self, item: &mut Item, name: &str) {
        let settings = &self.ctx.settings;
        let dir = &settings.output;

        if item.video_url.is_some() {
            item.video_file = Some(dir.join(format!("{name}.mp4")));
        }
        if let Some(audio_url) = &item.audio_url {
            let ext = audio_extension(audio_url);
            item.audio_file = Some(dir.join(format!("{name}.{ext}")));
        }

        if settings.share {
            // The share stream is already combined; the video file is the
            // final output
            item.merged_file = item.video_file.clone();
        } else if item.video_file.is_some() && item.audio_file.is_some() {
            item.merged_file = Some(dir.join(format!("{name}.{}", settings.merge_ext)));
        }
    }

    /// Fetch the selected streams concurrently, each into its reserved
    /// `.gyre` name, and move them into place only once every transfer has
    /// completed.
    fn download(&self, item: &Item) -> Result<(), DownloadFailure> {
        let settings = &self.ctx.settings;
        let cancel = self.ctx.cancel_flag();

        let jobs: Vec<(&String, &PathBuf)> = [
            (&item.video_url, &item.video_file),
            (&item.audio_url, &item.audio_file),
        ]
        .into_iter()
        .filter_map(|(url, file)| Some((url.as_ref()?, file.as_ref()?)))
        .collect();

        let results: Vec<Result<(), FetchError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|&(url, file)| {
                    let tmp = reserved_path(file);
                    scope.spawn(move || {
                        self.api
                            .save_stream(url, &tmp, cancel, settings.chunk_size)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().expect("Stream thread panicked"))
                .collect()
        });

        for result in results {
            match result {
                Ok(()) => {}
                Err(FetchError::Cancelled) => return Err(DownloadFailure::Cancelled),
                Err(error) => return Err(DownloadFailure::Failed(error.to_string())),
            }
        }

        // Move into place; from here the files survive the run. Renaming
        // any earlier would hand FFmpeg a name whose extension lies about
        // the (partial) content.
        for file in [&item.video_file, &item.audio_file].into_iter().flatten() {
            std::fs::rename(reserved_path(file), file)
                .map_err(|e| DownloadFailure::Failed(e.to_string()))?;
        }

        Ok(())
    }

    /// Structural verification of everything downloaded. Returns false on
    /// unfixable corruption.
    fn verify(&self, item: &Item) -> bool {
        if let Some(video) = &item.video_file {
            match self.probe(video) {
                StreamHealth::Sound => {}
                StreamHealth::LegacyHeader => {
                    // Old storage layout; the platform zeroed the first two
                    // bytes back then. Patch and give it one more chance.
                    debug!("Patching legacy storage header of {}", video.display());
                    if patch_legacy_header(video).is_err()
                        || self.probe(video) != StreamHealth::Sound
                    {
                        return false;
                    }
                }
                StreamHealth::Corrupted => return false,
            }
        }

        if let Some(audio) = &item.audio_file {
            // No second chance for audio; the header patch is a video-only
            // phenomenon
            if self.probe(audio) != StreamHealth::Sound {
                return false;
            }
        }

        true
    }

    fn probe(&self, stream: &Path) -> StreamHealth {
        match self.remuxer.probe(stream) {
            Ok(health) => health,
            Err(e) => {
                warn!("Could not probe {}: {e}", stream.display());
                StreamHealth::Corrupted
            }
        }
    }

    /// Loop the video `repeat` times against the audio track, writing to a
    /// `temp_`-prefixed sibling first and renaming over the final merged
    /// name. The rename is what makes a mid-merge failure invisible at the
    /// final path, and it is mandatory anyway whenever the merged name
    /// equals the video name (FFmpeg cannot overwrite its own input).
    fn merge(&self, item: &Item) -> Result<(), String> {
        let settings = &self.ctx.settings;
        let (Some(video), Some(audio), Some(merged)) =
            (&item.video_file, &item.audio_file, &item.merged_file)
        else {
            return Ok(());
        };

        let playlist = Playlist::write(merged.with_extension("txt"), video, settings.repeat)
            .map_err(|e| e.to_string())?;

        let tmp = temp_merge_path(merged);
        self.remuxer
            .merge(&playlist.path, audio, &tmp, settings.duration.as_deref())
            .map_err(|e| e.to_string())?;

        std::fs::rename(&tmp, merged).map_err(|e| e.to_string())
    }

    /// Play back the finished file through the user's preview command.
    fn preview(&self, item: &Item) {
        let Some(command) = &self.ctx.settings.preview else {
            return;
        };
        let Some(play) = item
            .merged_file
            .as_ref()
            .or(item.video_file.as_ref())
            .or(item.audio_file.as_ref())
        else {
            return;
        };

        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else { return };

        let status = Command::new(program)
            .args(parts)
            .arg(play)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => {}
            _ => warn!("Preview command failed"),
        }
    }

    /// Terminal cleanup. In-flight partials and half-written merge output
    /// never survive; finished intermediates follow the keep policy; error
    /// outcomes take their stream files with them.
    fn clean_up(&self, item: &Item, outcome: Outcome) {
        for stream in [&item.video_file, &item.audio_file].into_iter().flatten() {
            remove_if_present(&reserved_path(stream));
        }
        if let Some(merged) = &item.merged_file {
            remove_if_present(&temp_merge_path(merged));
        }

        match outcome {
            Outcome::Finished => {
                if self.ctx.settings.keep {
                    return;
                }
                // Separate streams are intermediates once a merged file
                // exists under its own name
                if let Some(merged) = &item.merged_file {
                    if let Some(video) = &item.video_file {
                        if video != merged {
                            remove_if_present(video);
                        }
                    }
                    if let Some(audio) = &item.audio_file {
                        if audio != merged {
                            remove_if_present(audio);
                        }
                    }
                }
            }
            Outcome::Corrupted | Outcome::Cancelled => {
                for stream in [&item.video_file, &item.audio_file].into_iter().flatten() {
                    remove_if_present(stream);
                }
            }
            Outcome::Exists | Outcome::Unavailable(_) => {}
        }
    }
}

/// `<final name>.gyre`, the only name a partial download may live under.
fn reserved_path(path: &Path) -> PathBuf {
    let mut reserved = path.as_os_str().to_os_string();
    reserved.push(RESERVED_SUFFIX);
    PathBuf::from(reserved)
}

fn temp_merge_path(merged: &Path) -> PathBuf {
    let name = merged
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    merged.with_file_name(format!("temp_{name}"))
}

fn audio_extension(url: &str) -> &str {
    url.rsplit('.')
        .next()
        .filter(|ext| ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mp3")
}

/// Zero the first two bytes of the file, the fix for the legacy storage
/// layout.
fn patch_legacy_header(path: &Path) -> std::io::Result<()> {
    let mut data = std::fs::read(path)?;
    if data.len() >= 2 {
        data[0] = 0;
        data[1] = 0;
        std::fs::write(path, data)?;
    }
    Ok(())
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove '{}': {e}", path.display());
        }
    }
}

/// Concat playlist for the merge step: the video path repeated once per
/// loop. Removed on drop, success or not.
struct Playlist {
    path: PathBuf,
}

impl Playlist {
    fn write(path: PathBuf, video: &Path, repeat: u32) -> std::io::Result<Self> {
        use std::io::Write;

        let mut file = std::fs::File::create(&path)?;
        for _ in 0..repeat {
            writeln!(file, "file '{}'", video.display())?;
        }

        Ok(Self { path })
    }
}

impl Drop for Playlist {
    fn drop(&mut self) {
        remove_if_present(&self.path);
    }
}
