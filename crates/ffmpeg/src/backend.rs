//! Runs ffmpeg/ffprobe and classifies failures for the retry policy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

use resona_core::tool::ToolType;
use resona_core::{ProcessError, ProcessingBackend};

use crate::args::{build_args, needs_duration, output_extension};

/// How much stderr to keep in an error message.
const STDERR_TAIL_BYTES: usize = 512;

/// Processing backend that shells out to ffmpeg.
///
/// Failure classification: being unable to launch the binary is transient
/// (the host may be missing it only temporarily, e.g. mid-deploy); a
/// non-zero exit from ffmpeg itself is permanent, since re-running the same
/// command on the same input will fail the same way.
pub struct FfmpegBackend {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    output_dir: PathBuf,
}

impl FfmpegBackend {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
            output_dir: output_dir.into(),
        }
    }

    /// Probe the duration of an input file in seconds.
    async fn probe_duration(&self, input: &Path) -> Result<f64, ProcessError> {
        let output = tokio::process::Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(input)
            .output()
            .await
            .map_err(|e| ProcessError::Transient(format!("failed to launch ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(ProcessError::Permanent(format!(
                "ffprobe failed on {}: {}",
                input.display(),
                stderr_tail(&output.stderr)
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|_| {
                ProcessError::Permanent(format!("ffprobe reported no duration for {}", input.display()))
            })
    }
}

#[async_trait]
impl ProcessingBackend for FfmpegBackend {
    async fn process(
        &self,
        tool: ToolType,
        settings: &serde_json::Value,
        input_ref: &str,
    ) -> Result<String, ProcessError> {
        let input = Path::new(input_ref);

        let duration = if needs_duration(tool) {
            Some(self.probe_duration(input).await?)
        } else {
            None
        };

        let extension = output_extension(tool, settings)?;
        let output_name = match tool {
            // The segment muxer expands the index into the pattern itself.
            ToolType::Splitter => format!("{tool}_{}_%03d.{extension}", Uuid::new_v4()),
            _ => format!("{tool}_{}.{extension}", Uuid::new_v4()),
        };
        let output = self.output_dir.join(output_name);

        let args = build_args(tool, settings, input, &output, duration)?;
        tracing::debug!(%tool, input = %input.display(), "Running ffmpeg");

        let result = tokio::process::Command::new(&self.ffmpeg_bin)
            .args(&args)
            .output()
            .await
            .map_err(|e| ProcessError::Transient(format!("failed to launch ffmpeg: {e}")))?;

        if !result.status.success() {
            return Err(ProcessError::Permanent(format!(
                "ffmpeg exited with {:?}: {}",
                result.status.code(),
                stderr_tail(&result.stderr)
            )));
        }

        Ok(output.to_string_lossy().into_owned())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let start = trimmed.len() - STDERR_TAIL_BYTES;
    // Avoid slicing inside a UTF-8 sequence.
    let start = (start..trimmed.len())
        .find(|i| trimmed.is_char_boundary(*i))
        .unwrap_or(start);
    trimmed[start..].to_string()
}
