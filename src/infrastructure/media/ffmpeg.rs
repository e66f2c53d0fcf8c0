use super::progress::{ProgressTracker, is_progress_key};
use crate::config::settings::MediaSettings;
use crate::modules::video::formats::EncodeProfile;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine exited with status {code:?}: {stderr_tail}")]
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("engine output not understood: {0}")]
    Malformed(String),

    #[error("engine run cancelled")]
    Cancelled,
}

/// Handle on the external ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct MediaEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl MediaEngine {
    pub fn new(settings: &MediaSettings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg_bin.clone(),
            ffprobe: settings.ffprobe_bin.clone(),
        }
    }

    pub fn encode_args(input: &Path, output: &Path, profile: &EncodeProfile) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-i"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(input.to_string_lossy().into_owned());
        args.extend(["-c:v", profile.video_codec, "-c:a", profile.audio_codec].map(String::from));
        args.extend(profile.extra_args.iter().map(|a| a.to_string()));
        args.extend(["-f", profile.muxer, "-progress", "pipe:2", "-nostats"].map(String::from));
        args.push(output.to_string_lossy().into_owned());
        args
    }

    fn spawn(&self, program: &Path, args: &[String]) -> Result<Child, EngineError> {
        debug!("Running {} {}", program.display(), args.join(" "));
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.display().to_string(),
                source,
            })
    }

    /// Encodes `input` into `output`, sending each progress step on `progress`.
    ///
    /// The child is killed as soon as `cancel` fires.
    pub async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: &EncodeProfile,
        cancel: &CancellationToken,
        progress: UnboundedSender<u8>,
    ) -> Result<(), EngineError> {
        let args = Self::encode_args(input, output, profile);
        let mut child = self.spawn(&self.ffmpeg, &args)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Malformed("stderr was not captured".to_string()))?;
        let mut reader = BufReader::new(stderr);
        let mut tracker = ProgressTracker::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut buf = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    info!("Engine cancelled, process killed");
                    return Err(EngineError::Cancelled);
                }
                read = reader.read_until(b'\n', &mut buf) => {
                    if read? == 0 {
                        break;
                    }
                    let text = String::from_utf8_lossy(&buf).into_owned();
                    buf.clear();
                    for line in text.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
                        if let Some(percent) = tracker.observe_line(line) {
                            let _ = progress.send(percent);
                        } else if !is_progress_key(line) {
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line.trim().to_string());
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(EngineError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            return Err(EngineError::Failed {
                code: status.code(),
                stderr_tail: tail.into_iter().collect::<Vec<_>>().join(" | "),
            });
        }

        if tracker.total_seconds().is_none() {
            warn!("Engine never reported a source duration; progress was not relayed");
        }

        let produced = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if produced == 0 {
            return Err(EngineError::Malformed(format!(
                "engine exited cleanly but {} is empty",
                output.display()
            )));
        }

        Ok(())
    }

    /// Reads the container duration with ffprobe. `Ok(None)` when the
    /// container does not declare one.
    pub async fn probe_duration(&self, path: &Path) -> Result<Option<f64>, EngineError> {
        let args: Vec<String> = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ]
        .into_iter()
        .map(String::from)
        .chain(std::iter::once(path.to_string_lossy().into_owned()))
        .collect();

        let output = Command::new(&self.ffprobe)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.ffprobe.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                code: output.status.code(),
                stderr_tail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Malformed(format!("ffprobe json: {}", e)))?;

        Ok(parsed
            .format
            .duration
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0))
    }

    /// Grabs a single scaled JPEG frame from near the start of the video.
    pub async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        duration: Option<f64>,
    ) -> Result<(), EngineError> {
        let at = duration.map(|d| (d / 2.0).min(1.0)).unwrap_or(0.0);
        let args: Vec<String> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", at),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-frames:v".into(),
            "1".into(),
            "-vf".into(),
            "scale=320:-2".into(),
            output.to_string_lossy().into_owned(),
        ];

        let child = self.spawn(&self.ffmpeg, &args)?;
        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(EngineError::Failed {
                code: result.status.code(),
                stderr_tail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let produced = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if produced == 0 {
            return Err(EngineError::Malformed("thumbnail frame is empty".to_string()));
        }
        Ok(())
    }
}
