mod command;
mod ffmpeg;

pub use ffmpeg::{Ffmpeg, Remuxer, StreamHealth};
