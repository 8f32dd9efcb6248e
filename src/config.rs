use std::path::PathBuf;

use config::{Config, File};
use miette::{bail, Context, IntoDiagnostic, Result};
use regex::Regex;
use serde::Deserialize;

use crate::cli::Args;
use crate::types::{AacPreference, Extension, QualityPick, Tier};

/// Default output name: the bare coub ID.
pub const DEFAULT_TEMPLATE: &str = "%id%";

const KNOWN_PLACEHOLDERS: [&str; 6] = [
    "%id%",
    "%title%",
    "%creation%",
    "%channel%",
    "%community%",
    "%tags%",
];

/// The full option set, immutable once validated.
///
/// Defaults are layered under an optional TOML config file, which is in turn
/// layered under the command line. Validation happens eagerly, before any
/// scheduling; per-item code can rely on every invariant here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub connections: usize,
    pub retries: i32,
    pub video: bool,
    pub audio: bool,
    pub v_quality: QualityPick,
    pub a_quality: QualityPick,
    pub v_min: Tier,
    pub v_max: Tier,
    pub share: bool,
    pub aac: AacPreference,
    pub repeat: u32,
    pub duration: Option<String>,
    pub overwrite: bool,
    pub keep: bool,
    pub name_template: String,
    pub tag_sep: String,
    pub merge_ext: Extension,
    pub archive: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub unavailable_list: Option<PathBuf>,
    pub chunk_size: usize,
    pub allow_unicode: bool,
    pub preview: Option<String>,
    pub output: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connections: 25,
            retries: 5,
            video: true,
            audio: true,
            v_quality: QualityPick::Best,
            a_quality: QualityPick::Best,
            v_min: Tier::Med,
            v_max: Tier::Higher,
            share: false,
            aac: AacPreference::NoBias,
            repeat: 1000,
            duration: None,
            overwrite: false,
            keep: false,
            name_template: DEFAULT_TEMPLATE.to_string(),
            tag_sep: "_".to_string(),
            merge_ext: Extension::Mkv,
            archive: None,
            json: None,
            unavailable_list: None,
            chunk_size: 1024,
            allow_unicode: true,
            preview: None,
            output: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Load settings: defaults, then the config file, then CLI overrides.
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = Config::builder();
        builder = match &args.config {
            Some(path) => builder.add_source(File::from(path.as_path())),
            None => builder.add_source(File::with_name("coubgrab").required(false)),
        };

        let file_config = builder
            .build()
            .into_diagnostic()
            .wrap_err("Could not read config file")?;

        let mut settings: Settings = file_config
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid config file")?;

        settings.apply_cli(args);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_cli(&mut self, args: &Args) {
        macro_rules! override_opt {
            ($($field:ident),+) => {
                $(if let Some(v) = &args.$field {
                    self.$field = v.clone();
                })+
            };
        }

        override_opt!(
            connections,
            retries,
            repeat,
            tag_sep,
            merge_ext,
            chunk_size,
            output
        );

        if let Some(v) = args.video_quality {
            self.v_quality = v;
        }
        if let Some(v) = args.audio_quality {
            self.a_quality = v;
        }
        if let Some(v) = args.v_min {
            self.v_min = v;
        }
        if let Some(v) = args.v_max {
            self.v_max = v;
        }
        if let Some(v) = args.aac {
            self.aac = v;
        }
        if let Some(v) = &args.name_template {
            self.name_template = v.clone();
        }
        if let Some(v) = &args.duration {
            self.duration = Some(v.clone());
        }
        if let Some(v) = &args.archive {
            self.archive = Some(v.clone());
        }
        if let Some(v) = &args.json {
            self.json = Some(v.clone());
        }
        if let Some(v) = &args.unavailable_list {
            self.unavailable_list = Some(v.clone());
        }
        if let Some(v) = &args.preview {
            self.preview = Some(v.clone());
        }

        if args.video_only {
            self.audio = false;
        }
        if args.audio_only {
            self.video = false;
        }
        if args.share {
            self.share = true;
        }
        if args.overwrite {
            self.overwrite = true;
        }
        if args.keep {
            self.keep = true;
        }
        if args.no_unicode {
            self.allow_unicode = false;
        }
    }

    /// Check every cross-option invariant. Any failure here aborts the run
    /// before scheduling, with an options-error exit status.
    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            bail!("connections must be a positive number");
        }
        if self.repeat == 0 {
            bail!("repeat must be a positive number");
        }
        if self.chunk_size == 0 {
            bail!("chunk-size must be a positive number");
        }
        if !self.video && !self.audio {
            bail!("cannot disable both video and audio");
        }
        if self.share && (!self.video || !self.audio) {
            // The share version is a single pre-combined stream; restricting
            // it to one medium makes no sense and the historical behavior
            // was never consistent about it.
            bail!("--share cannot be combined with --video-only or --audio-only");
        }
        if self.v_min > self.v_max {
            bail!(
                "minimum video quality tier ({:?}) exceeds the maximum ({:?})",
                self.v_min,
                self.v_max
            );
        }
        if let Some(duration) = &self.duration {
            if !valid_duration(duration) {
                bail!("'{duration}' is not a valid FFmpeg time duration");
            }
        }
        self.validate_template()?;
        Ok(())
    }

    fn validate_template(&self) -> Result<()> {
        let placeholder = Regex::new(r"%[a-z]+%").unwrap();
        for hit in placeholder.find_iter(&self.name_template) {
            if !KNOWN_PLACEHOLDERS.contains(&hit.as_str()) {
                bail!(
                    "unknown placeholder {} in name template (expected one of: {})",
                    hit.as_str(),
                    KNOWN_PLACEHOLDERS.join(", ")
                );
            }
        }
        Ok(())
    }

    /// True when output names depend on fetched metadata, which forces a
    /// second existence check after the API request.
    pub fn has_custom_template(&self) -> bool {
        self.name_template != DEFAULT_TEMPLATE
    }

    pub fn video_only(&self) -> bool {
        !self.audio
    }

    pub fn audio_only(&self) -> bool {
        !self.video
    }
}

/// Accepts `[HH:]MM:SS[.m...]` and `S+[.m...][s|ms|us]`, the two forms of
/// the FFmpeg time-duration syntax. The value itself is passed to FFmpeg
/// verbatim at merge time.
fn valid_duration(value: &str) -> bool {
    let re = Regex::new(r"^(\d+:)?[0-5]?\d:[0-5]?\d(\.\d+)?$|^\d+(\.\d+)?(s|ms|us)?$").unwrap();
    re.is_match(value)
}
