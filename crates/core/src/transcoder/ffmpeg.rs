//! FFmpeg-based transcoder implementation.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::TranscoderConfig;
use super::error::TranscoderError;
use super::progress::ProgressHolder;
use super::traits::Transcoder;
use super::types::{ClipRange, Composition, MediaInfo, TranscodeJob, TranscodeResult};

/// Maximum stderr kept for error reports.
const STDERR_LIMIT: usize = 8 * 1024;

/// FFmpeg-based transcoder implementation.
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    /// Creates a new FFmpeg transcoder with the given configuration.
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Creates a transcoder with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TranscoderConfig::default())
    }

    /// Builds ffmpeg arguments for a job.
    fn build_args(&self, job: &TranscodeJob) -> Vec<String> {
        let composition = &job.composition;
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];

        // Inputs, with input-side seeking for clipped items
        for item in &composition.sequence {
            if let Some(clip) = item.clip {
                args.extend(clip_args(&clip));
            }
            args.extend(["-i".to_string(), item.source.to_string_lossy().to_string()]);
        }

        if composition.is_sequence() {
            let keeps_audio = composition.keeps_audio();
            args.extend([
                "-filter_complex".to_string(),
                concat_filter(composition.sequence.len(), keeps_audio),
                "-map".to_string(),
                "[outv]".to_string(),
            ]);
            if keeps_audio {
                args.extend([
                    "-map".to_string(),
                    "[outa]".to_string(),
                    "-c:a".to_string(),
                    self.config.audio_codec.clone(),
                ]);
            } else {
                args.push("-an".to_string());
            }
        } else if let Some(item) = composition.sequence.first() {
            if let Some(filter) = item.rotation_degrees.and_then(rotation_filter) {
                args.extend(["-vf".to_string(), filter]);
            }
            if item.remove_audio {
                args.push("-an".to_string());
            } else {
                args.extend(["-c:a".to_string(), self.config.audio_codec.clone()]);
            }
        }

        // Video codec
        args.extend([
            "-c:v".to_string(),
            self.config.video_codec.clone(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);

        // Log level and progress
        args.extend([
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
            "-nostats".to_string(),
        ]);

        // Extra args
        args.extend(self.config.extra_args.iter().cloned());

        // Output
        args.push(job.output_path.to_string_lossy().to_string());

        args
    }

    /// Probes a media file to get its information.
    pub async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscoderError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TranscoderError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscoderError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    TranscoderError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(TranscoderError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, TranscoderError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            width: Option<u32>,
            height: Option<u32>,
        }

        let probe: ProbeOutput = serde_json::from_str(output).map_err(|e| {
            TranscoderError::probe_failed(format!("Failed to parse ffprobe output: {}", e))
        })?;

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");
        let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            duration_secs,
            format: format_name.to_string(),
            video_codec: video_stream.and_then(|s| s.codec_name.clone()),
            audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
            width: video_stream.and_then(|s| s.width),
            height: video_stream.and_then(|s| s.height),
        })
    }

    /// Output duration used to turn `out_time` into a percentage.
    ///
    /// Clipped items contribute their clip length; unclipped items are
    /// probed. Returns `None` if any probe fails.
    async fn expected_duration_ms(&self, composition: &Composition) -> Option<u64> {
        if let Some(known) = composition.known_duration_ms() {
            return Some(known);
        }
        let mut total = 0u64;
        for item in &composition.sequence {
            match item.clip {
                Some(clip) => total += clip.duration_ms(),
                None => match self.probe(&item.source).await {
                    Ok(info) => total += (info.duration_secs * 1000.0) as u64,
                    Err(e) => {
                        debug!(source = %item.source.display(), error = %e, "Probe failed, progress unavailable");
                        return None;
                    }
                },
            }
        }
        Some(total)
    }

    async fn run_job(
        &self,
        job: &TranscodeJob,
        progress: &ProgressHolder,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, TranscoderError> {
        let start = Instant::now();

        if job.composition.sequence.is_empty() {
            return Err(TranscoderError::invalid_composition("Composition is empty"));
        }
        for item in &job.composition.sequence {
            if !tokio::fs::try_exists(&item.source).await.unwrap_or(false) {
                return Err(TranscoderError::InputNotFound {
                    path: item.source.clone(),
                });
            }
        }

        let duration_ms = self.expected_duration_ms(&job.composition).await;
        if duration_ms.unwrap_or(0) == 0 {
            progress.set_unavailable();
        }

        let args = self.build_args(job);
        debug!(job_id = %job.job_id, args = ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TranscoderError::FfmpegNotFound {
                        path: self.config.ffmpeg_path.clone(),
                    }
                } else {
                    TranscoderError::Io(e)
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscoderError::failed("ffmpeg stderr was not captured"))?;
        let mut reader = BufReader::new(stderr).lines();

        let time_regex = Regex::new(r"out_time_(?:us|ms)=(\d+)").ok();
        let mut error_output = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(TranscoderError::Cancelled);
                }
                line = reader.next_line() => match line {
                    Ok(Some(line)) => {
                        if line == "progress=end" {
                            if duration_ms.unwrap_or(0) > 0 {
                                progress.set_percent(100.0);
                            }
                            continue;
                        }
                        if let (Some(re), Some(total_ms)) = (&time_regex, duration_ms) {
                            if let Some(out_us) = parse_out_time_us(re, &line) {
                                if total_ms > 0 {
                                    progress.set_percent(percent_of(out_us, total_ms));
                                }
                                continue;
                            }
                        }
                        if !is_progress_line(&line) && error_output.len() < STDERR_LIMIT {
                            error_output.push_str(&line);
                            error_output.push('\n');
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(TranscoderError::Io(e));
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(TranscoderError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            warn!(job_id = %job.job_id, code = ?status.code(), "ffmpeg failed");
            return Err(classify_failure(status.code(), error_output));
        }

        let output_meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| TranscoderError::encoding_failed("Output file not created", None))?;

        Ok(TranscodeResult {
            job_id: job.job_id.clone(),
            output_path: job.output_path.clone(),
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        job: TranscodeJob,
        progress: Arc<ProgressHolder>,
        cancel: CancellationToken,
    ) -> Result<TranscodeResult, TranscoderError> {
        self.run_job(&job, &progress, &cancel).await
    }

    async fn validate(&self) -> Result<(), TranscoderError> {
        // Check ffmpeg exists
        let ffmpeg_result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffmpeg_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(TranscoderError::FfmpegNotFound {
                    path: self.config.ffmpeg_path.clone(),
                });
            }
            return Err(TranscoderError::Io(e));
        }

        // Check ffprobe exists
        let ffprobe_result = Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await;

        if let Err(e) = ffprobe_result {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(TranscoderError::FfprobeNotFound {
                    path: self.config.ffprobe_path.clone(),
                });
            }
            return Err(TranscoderError::Io(e));
        }

        Ok(())
    }
}

fn clip_args(clip: &ClipRange) -> [String; 4] {
    [
        "-ss".to_string(),
        format_secs(clip.start_ms),
        "-to".to_string(),
        format_secs(clip.end_ms),
    ]
}

fn format_secs(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Video filter for a rotation, or `None` for a no-op.
///
/// Right angles use `transpose` so frames are not resampled.
fn rotation_filter(degrees: f32) -> Option<String> {
    let normalized = degrees.rem_euclid(360.0);
    let near = |target: f32| (normalized - target).abs() < 0.01;

    if near(0.0) || near(360.0) {
        None
    } else if near(90.0) {
        Some("transpose=1".to_string())
    } else if near(180.0) {
        Some("transpose=1,transpose=1".to_string())
    } else if near(270.0) {
        Some("transpose=2".to_string())
    } else {
        let radians = normalized.to_radians();
        Some(format!(
            "rotate={r:.6}:ow=rotw({r:.6}):oh=roth({r:.6})",
            r = radians
        ))
    }
}

fn concat_filter(inputs: usize, with_audio: bool) -> String {
    let mut filter = String::new();
    for i in 0..inputs {
        filter.push_str(&format!("[{}:v]", i));
        if with_audio {
            filter.push_str(&format!("[{}:a]", i));
        }
    }
    filter.push_str(&format!(
        "concat=n={}:v=1:a={}[outv]",
        inputs,
        u8::from(with_audio)
    ));
    if with_audio {
        filter.push_str("[outa]");
    }
    filter
}

fn parse_out_time_us(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}

/// Keys ffmpeg writes with `-progress`. Anything else on stderr is kept as
/// diagnostics, even when it contains `=`.
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

fn is_progress_line(line: &str) -> bool {
    let Some((key, _)) = line.split_once('=') else {
        return false;
    };
    PROGRESS_KEYS.contains(&key) || (key.starts_with("stream_") && key.ends_with("_q"))
}

fn percent_of(out_us: u64, total_ms: u64) -> f32 {
    ((out_us as f64 / 1000.0) / total_ms as f64 * 100.0).min(100.0) as f32
}

/// Maps a failed ffmpeg exit to an error using its stderr.
fn classify_failure(code: Option<i32>, stderr: String) -> TranscoderError {
    let lower = stderr.to_lowercase();
    let reason = format!("FFmpeg exited with code: {:?}", code);

    if lower.contains("no space left") {
        TranscoderError::InsufficientStorage { reason }
    } else if lower.contains("cannot allocate memory") || lower.contains("out of memory") {
        TranscoderError::InsufficientMemory { reason }
    } else if lower.contains("invalid data found") || lower.contains("error while decoding") {
        TranscoderError::DecodingFailed { reason }
    } else {
        TranscoderError::encoding_failed(reason, (!stderr.is_empty()).then_some(stderr))
    }
}
