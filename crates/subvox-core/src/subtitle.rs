//! Subtitle assembly and export.

use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runtime::RecognizedSpan;

/// One subtitle cue.
///
/// Ids are sequence positions assigned at assembly time and stay stable for
/// the life of the task; dubbing re-attaches synthesized audio by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleSegment {
    pub id: usize,
    /// Seconds on the source timeline.
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
}

impl SubtitleSegment {
    /// Text preferred for dubbing: the translation when present.
    pub fn dubbing_text(&self) -> &str {
        self.translation.as_deref().unwrap_or(&self.text)
    }
}

/// Supported subtitle export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    Srt,
    Vtt,
    Txt,
}

impl SubtitleFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
            SubtitleFormat::Txt => "txt",
        }
    }
}

impl FromStr for SubtitleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" => Ok(SubtitleFormat::Vtt),
            "txt" => Ok(SubtitleFormat::Txt),
            other => Err(format!("unsupported subtitle format: {other}")),
        }
    }
}

/// Turns recognition output into the canonical cue sequence and renders it
/// to the supported formats.
pub struct SubtitleAssembler;

impl SubtitleAssembler {
    /// Build cues from recognition results: sequential ids, source order
    /// preserved, empty-text spans dropped.
    pub fn from_recognition(results: &[RecognizedSpan]) -> Vec<SubtitleSegment> {
        results
            .iter()
            .filter(|span| !span.text.trim().is_empty())
            .enumerate()
            .map(|(id, span)| SubtitleSegment {
                id,
                start_time: span.start,
                end_time: span.end,
                text: span.text.trim().to_owned(),
                translation: None,
            })
            .collect()
    }

    /// Render `segments` to `path` in the requested format.
    ///
    /// `include_timestamp` only affects the plain-text format, which has no
    /// inherent timing.
    pub fn export(
        segments: &[SubtitleSegment],
        path: &Path,
        format: SubtitleFormat,
        include_timestamp: bool,
    ) -> std::io::Result<()> {
        let body = match format {
            SubtitleFormat::Srt => render_srt(segments),
            SubtitleFormat::Vtt => render_vtt(segments),
            SubtitleFormat::Txt => render_txt(segments, include_timestamp),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, body)?;
        info!(path = %path.display(), format = format.extension(), cues = segments.len(), "subtitles exported");
        Ok(())
    }
}

fn render_srt(segments: &[SubtitleSegment]) -> String {
    let mut out = String::new();
    for (index, segment) in segments.iter().enumerate() {
        let _ = writeln!(out, "{}", index + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            timestamp(segment.start_time, ','),
            timestamp(segment.end_time, ',')
        );
        out.push_str(&segment.text);
        out.push_str("\n\n");
    }
    out
}

fn render_vtt(segments: &[SubtitleSegment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in segments {
        let _ = writeln!(
            out,
            "{} --> {}",
            timestamp(segment.start_time, '.'),
            timestamp(segment.end_time, '.')
        );
        out.push_str(&segment.text);
        out.push_str("\n\n");
    }
    out
}

fn render_txt(segments: &[SubtitleSegment], include_timestamp: bool) -> String {
    let mut out = String::new();
    for segment in segments {
        if include_timestamp {
            let _ = write!(
                out,
                "[{} --> {}] ",
                timestamp(segment.start_time, '.'),
                timestamp(segment.end_time, '.')
            );
        }
        out.push_str(&segment.text);
        out.push('\n');
    }
    out
}

/// `HH:MM:SS{sep}mmm`; SRT separates milliseconds with a comma, VTT with a dot.
fn timestamp(seconds: f64, sep: char) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let s = total_ms / 1000 % 60;
    let m = total_ms / 60_000 % 60;
    let h = total_ms / 3_600_000;
    format!("{h:02}:{m:02}:{s:02}{sep}{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cues() -> Vec<SubtitleSegment> {
        SubtitleAssembler::from_recognition(&[
            RecognizedSpan {
                start: 0.0,
                end: 2.5,
                text: "hello there".to_owned(),
            },
            RecognizedSpan {
                start: 2.5,
                end: 3.0,
                text: "   ".to_owned(),
            },
            RecognizedSpan {
                start: 3.0,
                end: 65.25,
                text: " general ".to_owned(),
            },
        ])
    }

    #[test]
    fn assembly_drops_blanks_and_renumbers() {
        let cues = cues();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].id, 0);
        assert_eq!(cues[1].id, 1);
        assert_eq!(cues[1].text, "general");
        assert!(cues[0].start_time <= cues[1].start_time);
    }

    #[test]
    fn srt_uses_one_based_indices_and_comma_millis() {
        let srt = render_srt(&cues());
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:02,500\nhello there\n\n"));
        assert!(srt.contains("2\n00:00:03,000 --> 00:01:05,250\ngeneral\n\n"));
    }

    #[test]
    fn vtt_has_header_and_dot_millis() {
        let vtt = render_vtt(&cues());
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:03.000 --> 00:01:05.250\ngeneral"));
    }

    #[test]
    fn txt_timestamp_is_opt_in() {
        let plain = render_txt(&cues(), false);
        assert_eq!(plain, "hello there\ngeneral\n");
        let stamped = render_txt(&cues(), true);
        assert!(stamped.starts_with("[00:00:00.000 --> 00:00:02.500] hello there\n"));
    }

    #[test]
    fn dubbing_text_prefers_translation() {
        let mut cue = cues().remove(0);
        assert_eq!(cue.dubbing_text(), "hello there");
        cue.translation = Some("bonjour".to_owned());
        assert_eq!(cue.dubbing_text(), "bonjour");
    }

    #[test]
    fn export_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.srt");
        SubtitleAssembler::export(&cues(), &path, SubtitleFormat::Srt, false).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("SRT".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Srt);
        assert!("ass".parse::<SubtitleFormat>().is_err());
    }
}
