use std::path::PathBuf;

use clap::Parser;
use miette::{miette, Context, IntoDiagnostic, Result};

use crate::types::{AacPreference, Extension, QualityPick, Tier};

macro_rules! arg_env {
    ($v:literal) => {
        concat!("COUBGRAB_", $v)
    };
}

/// Bulk downloader for coub.com.
/// Fetches the paired video/audio streams of every given coub, verifies
/// them, and remuxes them into a single looped container.
#[derive(Parser, Debug, Default)]
#[command(version)]
pub struct Args {
    /// Coub IDs or `https://coub.com/view/...` links to download
    pub input: Vec<String>,

    /// Read additional IDs or links from a file (whitespace separated)
    #[arg(long, env = arg_env!("LIST"))]
    pub list: Option<PathBuf>,

    /// Path to a TOML config file (default: ./coubgrab.toml if present)
    #[arg(long, env = arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// The path to the output directory
    #[arg(short, long, env = arg_env!("OUTPUT"))]
    pub output: Option<PathBuf>,

    /// Max. number of connections (and concurrent downloads)
    #[arg(long, env = arg_env!("CONNECTIONS"))]
    pub connections: Option<usize>,

    /// Retries for a failed metadata fetch; negative retries forever
    #[arg(long, allow_hyphen_values = true, env = arg_env!("RETRIES"))]
    pub retries: Option<i32>,

    /// Only download video streams
    #[arg(long, conflicts_with = "audio_only")]
    pub video_only: bool,

    /// Only download audio streams
    #[arg(long)]
    pub audio_only: bool,

    /// Download the special "share" version (combined video+audio)
    #[arg(long)]
    pub share: bool,

    /// Video stream quality to pick from the candidate list
    #[arg(long, value_enum, env = arg_env!("VIDEO_QUALITY"))]
    pub video_quality: Option<QualityPick>,

    /// Audio stream quality to pick from the candidate list
    #[arg(long, value_enum, env = arg_env!("AUDIO_QUALITY"))]
    pub audio_quality: Option<QualityPick>,

    /// Lowest video resolution tier to accept
    #[arg(long, value_enum, env = arg_env!("V_MIN"))]
    pub v_min: Option<Tier>,

    /// Highest video resolution tier to accept
    #[arg(long, value_enum, env = arg_env!("V_MAX"))]
    pub v_max: Option<Tier>,

    /// How to weigh AAC (mobile) against MP3 (html5) audio
    #[arg(long, value_enum, env = arg_env!("AAC"))]
    pub aac: Option<AacPreference>,

    /// How often to loop the video stream when merging
    #[arg(long, env = arg_env!("REPEAT"))]
    pub repeat: Option<u32>,

    /// Max. duration of the merged output (FFmpeg time syntax)
    #[arg(long, env = arg_env!("DURATION"))]
    pub duration: Option<String>,

    /// Overwrite existing output files instead of skipping the item
    #[arg(long)]
    pub overwrite: bool,

    /// Keep the separate video/audio streams after merging
    #[arg(long)]
    pub keep: bool,

    /// Output name template (%id%, %title%, %creation%, %channel%,
    /// %community%, %tags%)
    #[arg(long, env = arg_env!("NAME_TEMPLATE"))]
    pub name_template: Option<String>,

    /// Separator between tags in output names
    #[arg(long, env = arg_env!("TAG_SEP"))]
    pub tag_sep: Option<String>,

    /// Container extension for the merged output
    #[arg(long, value_enum, env = arg_env!("MERGE_EXT"))]
    pub merge_ext: Option<Extension>,

    /// Archive file to keep track of already downloaded coubs
    #[arg(long, env = arg_env!("ARCHIVE"))]
    pub archive: Option<PathBuf>,

    /// Append metadata of each finished coub to this JSON-lines file
    #[arg(long, env = arg_env!("JSON"))]
    pub json: Option<PathBuf>,

    /// Append the link of each unavailable coub to this file
    #[arg(long, env = arg_env!("UNAVAILABLE_LIST"))]
    pub unavailable_list: Option<PathBuf>,

    /// Stream download chunk size in bytes
    #[arg(long, env = arg_env!("CHUNK_SIZE"))]
    pub chunk_size: Option<usize>,

    /// Restrict output names to ASCII
    #[arg(long)]
    pub no_unicode: bool,

    /// Command to play back each finished file
    #[arg(long, env = arg_env!("PREVIEW"))]
    pub preview: Option<String>,

    /// Suppress per-item progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// More diagnostic output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Flatten the positional inputs and the optional list file into the item
/// identifier sequence, in the order given.
///
/// Source enumeration (channels, tags, searches) happens upstream of this
/// binary; only bare IDs and direct view links are accepted here.
pub fn collect_ids(args: &Args) -> Result<Vec<String>> {
    let mut entries: Vec<String> = args.input.clone();

    if let Some(list) = &args.list {
        let content = std::fs::read_to_string(list)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not read list file '{}'", list.display()))?;
        entries.extend(content.split_whitespace().map(String::from));
    }

    entries
        .iter()
        .map(|e| id_from_entry(e))
        .collect::<Result<Vec<_>>>()
}

fn id_from_entry(entry: &str) -> Result<String> {
    let entry = entry.trim().trim_end_matches('/');

    let id = match entry.find("coub.com/view/") {
        Some(pos) => &entry[pos + "coub.com/view/".len()..],
        None => entry,
    };

    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(miette!("'{entry}' is not a coub ID or view link"));
    }

    Ok(id.to_string())
}
