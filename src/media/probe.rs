//! ffprobe-based media analysis.
//!
//! ffprobe is asked for JSON (`-print_format json -show_format -show_streams`)
//! and the interesting fields are pulled out here. Fields ffprobe does not
//! report stay `None` — absence is explicit unknown, never a defaulted zero.

use super::{FfmpegTools, MediaError, MediaResult};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tokio::process::Command;

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

/// Media metadata extracted from a file on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    pub duration_seconds: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<u64>,
    pub file_size_bytes: u64,
}

impl MediaInfo {
    pub fn has_video_stream(&self) -> bool {
        self.video_codec.is_some() && self.width.is_some() && self.height.is_some()
    }
}

/// Analyse any media file. Fails with `ProbeFailed` when the tool errors or
/// its output cannot be parsed.
pub async fn probe(tools: &FfmpegTools, path: &Path) -> MediaResult<MediaInfo> {
    let output = Command::new(&tools.ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()
        .await
        .map_err(|err| MediaError::ProbeFailed {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(MediaError::ProbeFailed {
            path: path.display().to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let file_size_bytes = fs::metadata(path).await?.len();
    let json = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_json(&json, file_size_bytes).map_err(|reason| MediaError::ProbeFailed {
        path: path.display().to_string(),
        reason,
    })
}

/// Analyse a file that must contain a video stream with a known duration.
/// Used by the upload path, where a duration-less or video-less file is an
/// error rather than a degenerate record full of zeros.
pub async fn probe_video(tools: &FfmpegTools, path: &Path) -> MediaResult<MediaInfo> {
    let info = probe(tools, path).await?;
    if !info.has_video_stream() {
        return Err(MediaError::NoVideoStream(path.display().to_string()));
    }
    if info.duration_seconds.is_none() {
        return Err(MediaError::ProbeFailed {
            path: path.display().to_string(),
            reason: "no duration reported".into(),
        });
    }
    Ok(info)
}

fn parse_ffprobe_json(json: &str, file_size_bytes: u64) -> Result<MediaInfo, String> {
    let output: FfprobeOutput =
        serde_json::from_str(json).map_err(|err| format!("unparseable ffprobe JSON: {}", err))?;

    let format = output.format.as_ref();
    let duration_seconds = format
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok());
    let bit_rate = format
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|s| s.trim().parse::<u64>().ok());

    let streams = output.streams.unwrap_or_default();
    let video_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio_stream = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        duration_seconds,
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        frame_rate: video_stream
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate),
        bit_rate,
        file_size_bytes,
    })
}

/// ffprobe reports frame rates as rationals like `30000/1001`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 { None } else { Some(num / den) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_JSON: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920,
             "height": 1080, "r_frame_rate": "30000/1001"},
            {"codec_type": "audio", "codec_name": "aac"}
        ],
        "format": {"duration": "12.500000", "bit_rate": "4500000"}
    }"#;

    #[test]
    fn full_output_is_parsed() {
        let info = parse_ffprobe_json(FULL_JSON, 1024).unwrap();
        assert_eq!(info.duration_seconds, Some(12.5));
        assert_eq!(info.width, Some(1920));
        assert_eq!(info.height, Some(1080));
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!(info.bit_rate, Some(4_500_000));
        assert_eq!(info.file_size_bytes, 1024);
        let fps = info.frame_rate.unwrap();
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn audio_only_file_has_no_video_stream() {
        let json = r#"{
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}],
            "format": {"duration": "3.0"}
        }"#;
        let info = parse_ffprobe_json(json, 10).unwrap();
        assert!(!info.has_video_stream());
        assert_eq!(info.audio_codec.as_deref(), Some("mp3"));
    }

    #[test]
    fn missing_fields_stay_unknown() {
        let info = parse_ffprobe_json(r#"{"streams": [], "format": {}}"#, 0).unwrap();
        assert_eq!(info.duration_seconds, None);
        assert_eq!(info.width, None);
        assert_eq!(info.bit_rate, None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_ffprobe_json("not json", 0).is_err());
    }

    #[test]
    fn zero_denominator_frame_rate_is_unknown() {
        assert_eq!(parse_frame_rate("30/0"), None);
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
    }
}
