//! Per-tool ffmpeg argument assembly.
//!
//! Pure functions from (tool, settings, paths) to an argument vector.
//! Settings are deserialized from the job's opaque JSON; unknown or
//! out-of-range values are permanent failures (re-running will not fix
//! them).

use std::path::Path;

use serde::Deserialize;

use resona_core::tool::ToolType;
use resona_core::ProcessError;

/// Sample rate used when a filter needs an explicit rate anchor.
const BASE_SAMPLE_RATE: u32 = 44_100;

/// `atempo` accepts factors in `[0.5, 2.0]`; larger changes are chained.
const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

// ---------------------------------------------------------------------------
// Settings payloads
// ---------------------------------------------------------------------------

fn default_tempo() -> f64 {
    1.0
}

fn default_fade() -> f64 {
    2.0
}

fn default_target_level() -> f64 {
    -6.0
}

fn default_true() -> bool {
    true
}

fn default_noise_strength() -> f64 {
    0.8
}

fn default_segment_duration() -> f64 {
    30.0
}

fn default_format() -> String {
    "mp3".into()
}

#[derive(Debug, Deserialize)]
struct PitchTempoSettings {
    #[serde(default)]
    pitch_shift: f64,
    #[serde(default = "default_tempo")]
    tempo_change: f64,
}

#[derive(Debug, Deserialize)]
struct FadeSettings {
    #[serde(default = "default_fade")]
    fade_in_duration: f64,
    #[serde(default = "default_fade")]
    fade_out_duration: f64,
}

#[derive(Debug, Deserialize)]
struct VolumeSettings {
    #[serde(default = "default_target_level")]
    target_level: f64,
    #[serde(default = "default_true")]
    normalize: bool,
}

#[derive(Debug, Deserialize)]
struct EqualizerSettings {
    #[serde(default)]
    bass_gain: f64,
    #[serde(default)]
    mid_gain: f64,
    #[serde(default)]
    treble_gain: f64,
}

#[derive(Debug, Deserialize)]
struct NoiseReductionSettings {
    #[serde(default = "default_noise_strength")]
    strength: f64,
}

#[derive(Debug, Deserialize)]
struct ConverterSettings {
    #[serde(default = "default_format")]
    output_format: String,
    #[serde(default)]
    bitrate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CutSettings {
    #[serde(default)]
    start_time: f64,
    end_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SplitterSettings {
    #[serde(default = "default_segment_duration")]
    segment_duration: f64,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataSettings {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    genre: Option<String>,
    year: Option<String>,
}

fn parse<T: for<'de> Deserialize<'de>>(settings: &serde_json::Value) -> Result<T, ProcessError> {
    serde_json::from_value(settings.clone())
        .map_err(|e| ProcessError::Permanent(format!("invalid tool settings: {e}")))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// File extension the tool's output should carry.
pub fn output_extension(tool: ToolType, settings: &serde_json::Value) -> Result<String, ProcessError> {
    match tool {
        ToolType::Converter => {
            let settings: ConverterSettings = parse(settings)?;
            let format = settings.output_format.trim().to_ascii_lowercase();
            if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ProcessError::Permanent(format!(
                    "invalid output format \"{}\"",
                    settings.output_format
                )));
            }
            Ok(format)
        }
        _ => Ok("wav".into()),
    }
}

/// Whether [`build_args`] needs the input's duration (probed beforehand).
pub fn needs_duration(tool: ToolType) -> bool {
    matches!(tool, ToolType::FadeEffect)
}

/// Assemble the full ffmpeg argument vector for one input file.
pub fn build_args(
    tool: ToolType,
    settings: &serde_json::Value,
    input: &Path,
    output: &Path,
    input_duration_secs: Option<f64>,
) -> Result<Vec<String>, ProcessError> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
    ];

    match tool {
        ToolType::AudioReverse => {
            args.extend(filter("areverse"));
        }

        ToolType::VocalRemover | ToolType::Karaoke => {
            // Center-channel cancellation: subtract the opposite channel.
            args.extend(filter("pan=stereo|c0=c0-c1|c1=c1-c0"));
        }

        ToolType::PitchTempo => {
            let settings: PitchTempoSettings = parse(settings)?;
            let mut chain: Vec<String> = Vec::new();
            if settings.pitch_shift != 0.0 {
                let factor = 2f64.powf(settings.pitch_shift / 12.0);
                chain.push(format!(
                    "asetrate={}",
                    (BASE_SAMPLE_RATE as f64 * factor).round() as u32
                ));
                chain.push(format!("aresample={BASE_SAMPLE_RATE}"));
                // The rate trick also scales tempo; compensate.
                chain.extend(atempo_chain(1.0 / factor)?);
            }
            if settings.tempo_change != 1.0 {
                chain.extend(atempo_chain(settings.tempo_change)?);
            }
            if chain.is_empty() {
                chain.push("anull".into());
            }
            args.extend(filter(&chain.join(",")));
        }

        ToolType::FadeEffect => {
            let settings: FadeSettings = parse(settings)?;
            let duration = input_duration_secs.ok_or_else(|| {
                ProcessError::Permanent("fade effect requires the input duration".into())
            })?;
            let mut chain: Vec<String> = Vec::new();
            if settings.fade_in_duration > 0.0 {
                chain.push(format!("afade=t=in:st=0:d={}", settings.fade_in_duration));
            }
            if settings.fade_out_duration > 0.0 {
                let start = (duration - settings.fade_out_duration).max(0.0);
                chain.push(format!(
                    "afade=t=out:st={start}:d={}",
                    settings.fade_out_duration
                ));
            }
            if chain.is_empty() {
                chain.push("anull".into());
            }
            args.extend(filter(&chain.join(",")));
        }

        ToolType::VolumeNormalizer => {
            let settings: VolumeSettings = parse(settings)?;
            if settings.normalize {
                // EBU R128 two-in-one loudness normalization.
                args.extend(filter(&format!(
                    "loudnorm=I={}:TP=-1.5:LRA=11",
                    settings.target_level.clamp(-70.0, -5.0)
                )));
            } else {
                args.extend(filter(&format!("volume={}dB", settings.target_level)));
            }
        }

        ToolType::Equalizer => {
            let settings: EqualizerSettings = parse(settings)?;
            let chain = format!(
                "equalizer=f=100:t=q:w=1:g={},equalizer=f=1000:t=q:w=1:g={},equalizer=f=10000:t=q:w=1:g={}",
                settings.bass_gain, settings.mid_gain, settings.treble_gain
            );
            args.extend(filter(&chain));
        }

        ToolType::NoiseReduction => {
            let settings: NoiseReductionSettings = parse(settings)?;
            let strength = settings.strength.clamp(0.0, 1.0);
            // afftdn noise reduction is expressed in dB (0.01..97).
            args.extend(filter(&format!("afftdn=nr={:.1}", strength * 30.0)));
        }

        ToolType::Converter => {
            let settings: ConverterSettings = parse(settings)?;
            if let Some(bitrate) = &settings.bitrate {
                args.push("-b:a".into());
                args.push(bitrate.clone());
            }
        }

        ToolType::CutterJoiner => {
            let settings: CutSettings = parse(settings)?;
            if settings.start_time < 0.0 {
                return Err(ProcessError::Permanent("start_time must be >= 0".into()));
            }
            args.push("-ss".into());
            args.push(format!("{}", settings.start_time));
            if let Some(end) = settings.end_time {
                if end <= settings.start_time {
                    return Err(ProcessError::Permanent(
                        "end_time must be after start_time".into(),
                    ));
                }
                args.push("-to".into());
                args.push(format!("{end}"));
            }
        }

        ToolType::Splitter => {
            let settings: SplitterSettings = parse(settings)?;
            if settings.segment_duration <= 0.0 {
                return Err(ProcessError::Permanent(
                    "segment_duration must be positive".into(),
                ));
            }
            args.push("-f".into());
            args.push("segment".into());
            args.push("-segment_time".into());
            args.push(format!("{}", settings.segment_duration));
        }

        ToolType::MetadataEditor => {
            let settings: MetadataSettings = parse(settings)?;
            args.push("-codec".into());
            args.push("copy".into());
            for (key, value) in [
                ("title", settings.title),
                ("artist", settings.artist),
                ("album", settings.album),
                ("genre", settings.genre),
                ("date", settings.year),
            ] {
                if let Some(value) = value {
                    args.push("-metadata".into());
                    args.push(format!("{key}={value}"));
                }
            }
        }
    }

    args.push(output.to_string_lossy().into_owned());
    Ok(args)
}

fn filter(chain: &str) -> Vec<String> {
    vec!["-af".into(), chain.into()]
}

/// Split an arbitrary tempo factor into a chain of in-range `atempo` stages.
fn atempo_chain(factor: f64) -> Result<Vec<String>, ProcessError> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(ProcessError::Permanent(format!(
            "tempo factor {factor} out of range"
        )));
    }
    let mut stages = Vec::new();
    let mut remaining = factor;
    while remaining > ATEMPO_MAX {
        stages.push(format!("atempo={ATEMPO_MAX}"));
        remaining /= ATEMPO_MAX;
    }
    while remaining < ATEMPO_MIN {
        stages.push(format!("atempo={ATEMPO_MIN}"));
        remaining /= ATEMPO_MIN;
    }
    stages.push(format!("atempo={remaining}"));
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("in.wav"), PathBuf::from("out.wav"))
    }

    fn joined(args: &[String]) -> String {
        args.join(" ")
    }

    #[test]
    fn reverse_uses_areverse_filter() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::AudioReverse,
            &serde_json::json!({}),
            &input,
            &output,
            None,
        )
        .unwrap();
        assert!(joined(&args).contains("-af areverse"));
        assert_eq!(args.last().unwrap(), "out.wav");
    }

    #[test]
    fn vocal_remover_cancels_the_center_channel() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::VocalRemover,
            &serde_json::json!({}),
            &input,
            &output,
            None,
        )
        .unwrap();
        assert!(joined(&args).contains("pan=stereo|c0=c0-c1|c1=c1-c0"));
    }

    #[test]
    fn pitch_shift_compensates_tempo() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::PitchTempo,
            &serde_json::json!({"pitch_shift": 12.0}),
            &input,
            &output,
            None,
        )
        .unwrap();
        let rendered = joined(&args);
        // One octave up doubles the rate and halves the tempo back.
        assert!(rendered.contains("asetrate=88200"));
        assert!(rendered.contains("atempo=0.5"));
    }

    #[test]
    fn neutral_pitch_tempo_is_a_passthrough_filter() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::PitchTempo,
            &serde_json::json!({}),
            &input,
            &output,
            None,
        )
        .unwrap();
        assert!(joined(&args).contains("-af anull"));
    }

    #[test]
    fn atempo_chains_factors_beyond_range() {
        let stages = atempo_chain(5.0).unwrap();
        assert_eq!(stages[0], "atempo=2");
        assert_eq!(stages[1], "atempo=2");
        assert_eq!(stages[2], "atempo=1.25");

        let product: f64 = atempo_chain(0.2)
            .unwrap()
            .iter()
            .map(|s| s.trim_start_matches("atempo=").parse::<f64>().unwrap())
            .product();
        assert!((product - 0.2).abs() < 1e-9);
    }

    #[test]
    fn nonpositive_tempo_is_permanent() {
        let err = atempo_chain(0.0).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn fade_out_is_anchored_to_the_input_duration() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::FadeEffect,
            &serde_json::json!({"fade_in_duration": 1.0, "fade_out_duration": 3.0}),
            &input,
            &output,
            Some(10.0),
        )
        .unwrap();
        let rendered = joined(&args);
        assert!(rendered.contains("afade=t=in:st=0:d=1"));
        assert!(rendered.contains("afade=t=out:st=7:d=3"));
    }

    #[test]
    fn fade_without_duration_is_permanent() {
        let (input, output) = paths();
        let err = build_args(
            ToolType::FadeEffect,
            &serde_json::json!({}),
            &input,
            &output,
            None,
        )
        .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn normalizer_uses_loudnorm_by_default() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::VolumeNormalizer,
            &serde_json::json!({"target_level": -14.0}),
            &input,
            &output,
            None,
        )
        .unwrap();
        assert!(joined(&args).contains("loudnorm=I=-14"));
    }

    #[test]
    fn plain_boost_when_normalization_is_off() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::VolumeNormalizer,
            &serde_json::json!({"target_level": 3.0, "normalize": false}),
            &input,
            &output,
            None,
        )
        .unwrap();
        assert!(joined(&args).contains("volume=3dB"));
    }

    #[test]
    fn cut_range_is_validated() {
        let (input, output) = paths();
        let err = build_args(
            ToolType::CutterJoiner,
            &serde_json::json!({"start_time": 10.0, "end_time": 5.0}),
            &input,
            &output,
            None,
        )
        .unwrap_err();
        assert!(!err.is_transient());

        let args = build_args(
            ToolType::CutterJoiner,
            &serde_json::json!({"start_time": 5.0, "end_time": 10.0}),
            &input,
            &output,
            None,
        )
        .unwrap();
        let rendered = joined(&args);
        assert!(rendered.contains("-ss 5"));
        assert!(rendered.contains("-to 10"));
    }

    #[test]
    fn metadata_editor_copies_streams_and_sets_tags() {
        let (input, output) = paths();
        let args = build_args(
            ToolType::MetadataEditor,
            &serde_json::json!({"title": "Night Drive", "artist": "A. Writer"}),
            &input,
            &output,
            None,
        )
        .unwrap();
        let rendered = joined(&args);
        assert!(rendered.contains("-codec copy"));
        assert!(rendered.contains("-metadata title=Night Drive"));
        assert!(rendered.contains("-metadata artist=A. Writer"));
    }

    #[test]
    fn converter_extension_comes_from_settings() {
        assert_eq!(
            output_extension(ToolType::Converter, &serde_json::json!({"output_format": "FLAC"}))
                .unwrap(),
            "flac"
        );
        assert_eq!(
            output_extension(ToolType::AudioReverse, &serde_json::json!({})).unwrap(),
            "wav"
        );
        let err = output_extension(
            ToolType::Converter,
            &serde_json::json!({"output_format": "../etc"}),
        )
        .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn only_fade_needs_probed_duration() {
        assert!(needs_duration(ToolType::FadeEffect));
        assert!(!needs_duration(ToolType::AudioReverse));
        assert!(!needs_duration(ToolType::Converter));
    }
}
