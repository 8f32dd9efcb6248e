use std::{ffi::OsStr, fmt::Debug, path::Path};

use miette::{Context, Result};

use super::command::{assert_success_command, run_command, Capture, FFMPEG, FFMPEG_DEFAULT_ARGS};

/// Result of the structural probe over a downloaded stream file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Sound,
    /// The legacy storage layout: the platform used to store videos with a
    /// clobbered two-byte header and repaired them at playback time. Shows
    /// up as a missing moov atom and is fixable in place.
    LegacyHeader,
    /// Missing chunks, bad frames. Not recoverable.
    Corrupted,
}

/// Interface for the stream verification and remux steps.
pub trait Remuxer: Sync + Debug {
    /// Decode roughly the first second of the stream and classify what the
    /// decoder complains about.
    fn probe(&self, stream: &Path) -> Result<StreamHealth>;

    /// Combine the looped video playlist with the audio stream into `out`,
    /// copying codecs, optionally capped to `duration`.
    ///
    /// `out` must not be one of the inputs; the tool cannot overwrite a
    /// file it is reading.
    fn merge(
        &self,
        playlist: &Path,
        audio: &Path,
        out: &Path,
        duration: Option<&str>,
    ) -> Result<()>;
}

/// Interface for the [FFmpeg](https://ffmpeg.org) program
#[derive(Debug)]
pub struct Ffmpeg;

impl Ffmpeg {
    /// Verify that the `ffmpeg` binary is reachable
    pub fn new() -> Result<Self> {
        assert_success_command(FFMPEG, |cmd| cmd.arg("-version"))?;

        Ok(Self)
    }
}

/// Decoder messages that indicate real stream damage.
///
/// "Header missing" / "Failed to read frame size" show up for truncated
/// audio, "Invalid NAL" for broken video.
const CORRUPTION_SIGNATURES: [&str; 3] =
    ["Header missing", "Failed to read frame size", "Invalid NAL"];

impl Remuxer for Ffmpeg {
    fn probe(&self, stream: &Path) -> Result<StreamHealth> {
        let res = run_command(
            FFMPEG,
            |cmd| {
                cmd.args(FFMPEG_DEFAULT_ARGS)
                    .args([OsStr::new("-i"), stream.as_os_str()])
                    .args(["-t", "1"])
                    .args(["-f", "null", "-"])
            },
            Capture::STDERR,
        )
        .wrap_err("Could not probe stream file")?;

        let stderr = String::from_utf8_lossy(&res.stderr);

        if stderr.contains("moov atom not found") {
            return Ok(StreamHealth::LegacyHeader);
        }
        if CORRUPTION_SIGNATURES.iter().any(|sig| stderr.contains(sig)) {
            return Ok(StreamHealth::Corrupted);
        }

        Ok(StreamHealth::Sound)
    }

    fn merge(
        &self,
        playlist: &Path,
        audio: &Path,
        out: &Path,
        duration: Option<&str>,
    ) -> Result<()> {
        assert_success_command(FFMPEG, |cmd| {
            let mut cmd = cmd
                .args(FFMPEG_DEFAULT_ARGS)
                .arg("-y")
                .args(["-f", "concat", "-safe", "0"])
                .args([OsStr::new("-i"), playlist.as_os_str()])
                .args([OsStr::new("-i"), audio.as_os_str()]);

            if let Some(duration) = duration {
                cmd = cmd.args(["-t", duration]);
            }

            // -shortest: the concatenated video counts as one long stream,
            // so the output ends with the audio track
            cmd.args(["-c", "copy", "-shortest"]).arg(out)
        })
        .wrap_err("Could not merge video and audio streams")
    }
}
