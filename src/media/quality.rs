//! The fixed quality ladder offered for transcoding.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A quality-ladder rung. Each maps to an explicit target resolution and
/// video bitrate.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quality {
    #[serde(rename = "1080p")]
    Q1080p,
    #[serde(rename = "720p")]
    Q720p,
    #[serde(rename = "480p")]
    Q480p,
    #[serde(rename = "360p")]
    Q360p,
}

impl Quality {
    /// Ladder rungs in descending order.
    pub const LADDER: [Quality; 4] = [Self::Q1080p, Self::Q720p, Self::Q480p, Self::Q360p];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Q1080p => "1080p",
            Self::Q720p => "720p",
            Self::Q480p => "480p",
            Self::Q360p => "360p",
        }
    }

    /// Target (width, height) for this rung.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Q1080p => (1920, 1080),
            Self::Q720p => (1280, 720),
            Self::Q480p => (854, 480),
            Self::Q360p => (640, 360),
        }
    }

    /// Target video bitrate, in ffmpeg `-b:v` notation.
    pub fn bitrate(&self) -> &'static str {
        match self {
            Self::Q1080p => "5000k",
            Self::Q720p => "2500k",
            Self::Q480p => "1000k",
            Self::Q360p => "500k",
        }
    }

    /// True when a source of the given dimensions is already at or below this
    /// rung in both dimensions. Converting such a source would upscale, so the
    /// transcoder copies the file instead.
    pub fn source_fits_within(&self, src_width: u32, src_height: u32) -> bool {
        let (w, h) = self.dimensions();
        src_width <= w && src_height <= h
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1080p" => Ok(Self::Q1080p),
            "720p" => Ok(Self::Q720p),
            "480p" => Ok(Self::Q480p),
            "360p" => Ok(Self::Q360p),
            other => Err(format!("unsupported quality `{}`", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_maps_to_expected_tuples() {
        assert_eq!(Quality::Q1080p.dimensions(), (1920, 1080));
        assert_eq!(Quality::Q720p.dimensions(), (1280, 720));
        assert_eq!(Quality::Q480p.dimensions(), (854, 480));
        assert_eq!(Quality::Q360p.dimensions(), (640, 360));
        assert_eq!(Quality::Q480p.bitrate(), "1000k");
    }

    #[test]
    fn small_source_fits_within_larger_rung() {
        // 480-height source requested at 1080p must be copied, not upscaled.
        assert!(Quality::Q1080p.source_fits_within(854, 480));
        assert!(!Quality::Q360p.source_fits_within(854, 480));
    }

    #[test]
    fn exact_match_counts_as_fitting() {
        assert!(Quality::Q720p.source_fits_within(1280, 720));
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("720p".parse::<Quality>().unwrap(), Quality::Q720p);
        assert_eq!("1080P".parse::<Quality>().unwrap(), Quality::Q1080p);
        assert!("4k".parse::<Quality>().is_err());
    }
}
