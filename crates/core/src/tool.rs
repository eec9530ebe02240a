//! The enumerated kinds of audio work the service accepts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// An audio transformation tool.
///
/// The wire form is the lowercase snake_case name (e.g. `"vocal_remover"`),
/// which is also what job records persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    VocalRemover,
    PitchTempo,
    Converter,
    Splitter,
    Karaoke,
    NoiseReduction,
    VolumeNormalizer,
    Equalizer,
    CutterJoiner,
    MetadataEditor,
    AudioReverse,
    FadeEffect,
}

impl ToolType {
    pub const ALL: [ToolType; 12] = [
        ToolType::VocalRemover,
        ToolType::PitchTempo,
        ToolType::Converter,
        ToolType::Splitter,
        ToolType::Karaoke,
        ToolType::NoiseReduction,
        ToolType::VolumeNormalizer,
        ToolType::Equalizer,
        ToolType::CutterJoiner,
        ToolType::MetadataEditor,
        ToolType::AudioReverse,
        ToolType::FadeEffect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolType::VocalRemover => "vocal_remover",
            ToolType::PitchTempo => "pitch_tempo",
            ToolType::Converter => "converter",
            ToolType::Splitter => "splitter",
            ToolType::Karaoke => "karaoke",
            ToolType::NoiseReduction => "noise_reduction",
            ToolType::VolumeNormalizer => "volume_normalizer",
            ToolType::Equalizer => "equalizer",
            ToolType::CutterJoiner => "cutter_joiner",
            ToolType::MetadataEditor => "metadata_editor",
            ToolType::AudioReverse => "audio_reverse",
            ToolType::FadeEffect => "fade_effect",
        }
    }

    /// Whether a job of this kind must carry at least one input reference.
    ///
    /// Every current tool transforms uploaded files, so this is uniformly
    /// true; the hook exists so that generator-style tools (which would start
    /// from nothing) can be added without touching admission control.
    pub fn requires_input(self) -> bool {
        true
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown tool type: \"{s}\"")))
    }
}
