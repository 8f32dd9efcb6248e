use clap::ValueEnum;
use serde::Deserialize;

/// Container format for the merged output file.
///
/// FFmpeg picks the muxer from the output extension, so the variants are
/// restricted to containers that accept an H.264/MP3 stream copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Mkv,
    Mp4,
    Asf,
    Avi,
    Flv,
    F4v,
    Mov,
}

impl Extension {
    pub fn as_str(self) -> &'static str {
        match self {
            Extension::Mkv => "mkv",
            Extension::Mp4 => "mp4",
            Extension::Asf => "asf",
            Extension::Avi => "avi",
            Extension::Flv => "flv",
            Extension::F4v => "f4v",
            Extension::Mov => "mov",
        }
    }
}

impl std::fmt::Display for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
