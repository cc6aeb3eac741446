//! Video rendering: subtitle burn-in plus the dubbed audio timeline.
//!
//! One transcoder invocation does everything: the `subtitles` filter burns
//! the styled cues into the video, while each dubbed clip is delayed to its
//! cue start with `adelay` and mixed over the attenuated source audio with
//! `amix`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audio::{AudioEngine, ProgressFn};
use crate::config::{Config, SubtitleStyle};
use crate::runtime::collaborators::{DubbingOptions, VideoRenderer};
use crate::subtitle::{SubtitleAssembler, SubtitleFormat, SubtitleSegment};

pub struct FfmpegRenderer {
    audio: Arc<AudioEngine>,
    config: Arc<RwLock<Config>>,
}

impl FfmpegRenderer {
    pub fn new(audio: Arc<AudioEngine>, config: Arc<RwLock<Config>>) -> Self {
        Self { audio, config }
    }
}

#[async_trait]
impl VideoRenderer for FfmpegRenderer {
    async fn render(
        &self,
        source: &Path,
        output: &Path,
        subtitles: &[SubtitleSegment],
        clips: &HashMap<usize, PathBuf>,
        style: &SubtitleStyle,
        options: &DubbingOptions,
        on_progress: ProgressFn,
    ) -> anyhow::Result<PathBuf> {
        let cfg = self.config.read().await.clone();
        let ffmpeg = self.audio.transcoder()?.to_path_buf();
        let total = self.audio.duration(source).await.unwrap_or(0.0);

        // Burn track written to scratch; the burn shows the translation when
        // present (both lines in bilingual mode).
        let track = cfg.temp_dir.join(format!("burn_{}.srt", Uuid::new_v4()));
        SubtitleAssembler::export(
            &burn_segments(subtitles, options.bilingual),
            &track,
            SubtitleFormat::Srt,
            false,
        )?;

        // Clips in cue order, delayed to their cue start.
        let mut timeline: Vec<(u64, PathBuf)> = subtitles
            .iter()
            .filter_map(|s| {
                clips
                    .get(&s.id)
                    .map(|p| ((s.start_time * 1000.0).round() as u64, p.clone()))
            })
            .collect();
        timeline.sort_by_key(|(ms, _)| *ms);
        anyhow::ensure!(!timeline.is_empty(), "no dubbing clips to lay out");

        let filter = build_filter(
            &track,
            style,
            &timeline,
            options.original_audio_volume,
            options.dubbing_volume,
        );
        debug!(%filter, "render filter graph");

        let source = source.to_path_buf();
        let output = output.to_path_buf();
        let track_cleanup = track.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut command = FfmpegCommand::new_with_path(&ffmpeg);
            command.hide_banner().overwrite().input(source.to_string_lossy().as_ref());
            for (_, clip) in &timeline {
                command.input(clip.to_string_lossy().as_ref());
            }
            command
                .args(["-filter_complex", &filter])
                .args(["-map", "[vout]", "-map", "[aout]"])
                .args(["-c:v", "libx264", "-preset", "fast", "-c:a", "aac"])
                .output(output.to_string_lossy().as_ref());
            run_with_progress(command, total, &on_progress)?;
            Ok::<PathBuf, anyhow::Error>(output)
        })
        .await
        .context("render worker panicked")?;

        let _ = tokio::fs::remove_file(&track_cleanup).await;
        let output = result?;
        info!(output = %output.display(), "video rendered");
        Ok(output)
    }

    async fn preview(
        &self,
        source: &Path,
        output: &Path,
        sample_text: &str,
        style: &SubtitleStyle,
        timestamp: f64,
    ) -> anyhow::Result<PathBuf> {
        let cfg = self.config.read().await.clone();
        let ffmpeg = self.audio.transcoder()?.to_path_buf();

        // One cue long enough to cover any sane preview timestamp offset.
        let track = cfg.temp_dir.join(format!("burn_{}.srt", Uuid::new_v4()));
        let cue = vec![SubtitleSegment {
            id: 0,
            start_time: 0.0,
            end_time: timestamp + 5.0,
            text: sample_text.to_owned(),
            translation: None,
        }];
        SubtitleAssembler::export(&cue, &track, SubtitleFormat::Srt, false)?;

        let vf = format!(
            "subtitles='{}':force_style='{}'",
            escape_filter_path(&track),
            ass_style(style)
        );
        let source = source.to_path_buf();
        let output = output.to_path_buf();
        let ts = format!("{timestamp:.3}");
        let track_cleanup = track.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut command = FfmpegCommand::new_with_path(&ffmpeg);
            command
                .hide_banner()
                .overwrite()
                .args(["-ss", &ts])
                .input(source.to_string_lossy().as_ref())
                .args(["-vframes", "1", "-vf", &vf])
                .output(output.to_string_lossy().as_ref());
            let quiet: ProgressFn = Arc::new(|_| {});
            run_with_progress(command, 0.0, &quiet)?;
            Ok::<PathBuf, anyhow::Error>(output)
        })
        .await
        .context("preview worker panicked")?;

        let _ = tokio::fs::remove_file(&track_cleanup).await;
        result
    }
}

/// Segments as burned into the frame: translation replaces the original
/// text when present, or stacks above it in bilingual mode.
fn burn_segments(subtitles: &[SubtitleSegment], bilingual: bool) -> Vec<SubtitleSegment> {
    subtitles
        .iter()
        .map(|s| {
            let text = match (&s.translation, bilingual) {
                (Some(t), true) => format!("{t}\n{}", s.text),
                (Some(t), false) => t.clone(),
                (None, _) => s.text.clone(),
            };
            SubtitleSegment {
                text,
                translation: None,
                ..s.clone()
            }
        })
        .collect()
}

fn build_filter(
    track: &Path,
    style: &SubtitleStyle,
    timeline: &[(u64, PathBuf)],
    original_volume: f32,
    dubbing_volume: f32,
) -> String {
    let mut filter = format!(
        "[0:v]subtitles='{}':force_style='{}'[vout];[0:a]volume={original_volume}[a0];",
        escape_filter_path(track),
        ass_style(style)
    );
    let mut mix = String::from("[a0]");
    for (i, (delay_ms, _)) in timeline.iter().enumerate() {
        filter.push_str(&format!(
            "[{}:a]adelay={delay_ms}|{delay_ms},volume={dubbing_volume}[d{i}];",
            i + 1
        ));
        mix.push_str(&format!("[d{i}]"));
    }
    filter.push_str(&format!(
        "{mix}amix=inputs={}:duration=first:dropout_transition=0[aout]",
        timeline.len() + 1
    ));
    filter
}

/// ASS override string for the `subtitles` filter.
fn ass_style(style: &SubtitleStyle) -> String {
    format!(
        "FontName={},FontSize={},PrimaryColour={},OutlineColour={},Outline={},MarginV={},Bold={}",
        style.font_name,
        style.font_size,
        ass_color(&style.primary_color),
        ass_color(&style.outline_color),
        style.outline_width,
        style.margin_v,
        if style.bold { -1 } else { 0 }
    )
}

/// `#RRGGBB` to ASS `&HAABBGGRR` (opaque).
fn ass_color(hex: &str) -> String {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return "&H00FFFFFF".to_owned();
    }
    format!("&H00{}{}{}", &hex[4..6], &hex[2..4], &hex[0..2]).to_uppercase()
}

/// Paths inside a filter graph: forward slashes, escaped drive colons.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace(':', "\\:")
}

/// Drive one ffmpeg invocation, mapping transcode time onto a percentage of
/// `total_seconds` for the callback.
fn run_with_progress(
    mut command: FfmpegCommand,
    total_seconds: f64,
    on_progress: &ProgressFn,
) -> anyhow::Result<()> {
    let mut child = command.spawn().context("spawning transcoder")?;
    let mut errors: Vec<String> = Vec::new();
    for event in child.iter().context("reading transcoder events")? {
        match event {
            FfmpegEvent::Progress(progress) => {
                if total_seconds > 0.0 {
                    if let Some(t) = parse_ffmpeg_time(&progress.time) {
                        on_progress((t / total_seconds * 100.0).min(100.0) as f32);
                    }
                }
            }
            FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => errors.push(msg),
            FfmpegEvent::Error(e) => errors.push(e),
            _ => {}
        }
    }
    let status = child.wait().context("waiting for transcoder")?;
    anyhow::ensure!(status.success(), "transcoder failed: {}", errors.join("\n"));
    on_progress(100.0);
    Ok(())
}

/// `HH:MM:SS.cc` from ffmpeg progress lines.
fn parse_ffmpeg_time(raw: &str) -> Option<f64> {
    let mut parts = raw.trim().splitn(3, ':');
    let h: f64 = parts.next()?.parse().ok()?;
    let m: f64 = parts.next()?.parse().ok()?;
    let s: f64 = parts.next()?.parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ass_color_swaps_to_bgr() {
        assert_eq!(ass_color("#FFA500"), "&H0000A5FF");
        assert_eq!(ass_color("#000000"), "&H00000000");
        // Garbage falls back to opaque white.
        assert_eq!(ass_color("nope"), "&H00FFFFFF");
    }

    #[test]
    fn style_string_carries_every_override() {
        let style = SubtitleStyle::default();
        let s = ass_style(&style);
        assert!(s.contains("FontName=Arial"));
        assert!(s.contains("FontSize=70"));
        assert!(s.contains("PrimaryColour=&H0000A5FF"));
        assert!(s.contains("Bold=-1"));
    }

    #[test]
    fn filter_graph_delays_each_clip_to_its_cue() {
        let timeline = vec![
            (200u64, PathBuf::from("a.wav")),
            (1500u64, PathBuf::from("b.wav")),
        ];
        let filter = build_filter(
            Path::new("t.srt"),
            &SubtitleStyle::default(),
            &timeline,
            0.1,
            1.0,
        );
        assert!(filter.contains("[1:a]adelay=200|200"));
        assert!(filter.contains("[2:a]adelay=1500|1500"));
        assert!(filter.contains("amix=inputs=3"));
        assert!(filter.ends_with("[aout]"));
    }

    #[test]
    fn burn_prefers_translation_and_stacks_bilingual() {
        let segments = vec![SubtitleSegment {
            id: 0,
            start_time: 0.0,
            end_time: 1.0,
            text: "hola".to_owned(),
            translation: Some("hello".to_owned()),
        }];
        assert_eq!(burn_segments(&segments, false)[0].text, "hello");
        assert_eq!(burn_segments(&segments, true)[0].text, "hello\nhola");
    }

    #[test]
    fn ffmpeg_time_parses_fractions() {
        assert_eq!(parse_ffmpeg_time("00:01:05.50"), Some(65.5));
        assert_eq!(parse_ffmpeg_time("garbage"), None);
    }

    #[test]
    fn filter_paths_escape_windows_drives() {
        assert_eq!(
            escape_filter_path(Path::new("C:\\temp\\a.srt")),
            "C\\:/temp/a.srt"
        );
    }
}
