//! FFmpeg-based processing backend.
//!
//! Maps each audio tool and its settings onto an ffmpeg invocation. Argument
//! assembly is pure and unit-tested in [`args`]; [`backend::FfmpegBackend`]
//! runs the commands and classifies failures for the worker's retry policy.

pub mod args;
pub mod backend;

pub use backend::FfmpegBackend;
