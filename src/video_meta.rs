//! Video metadata extraction via an external probe process
//!
//! The probe dependency is wrapped behind the narrow [`VideoProbe`] trait so
//! tests can substitute a fake without spawning subprocesses. The real
//! implementation shells out to `ffprobe` for stream metadata and `ffmpeg`
//! for a single representative frame, both under a kill-on-timeout guard.

use log::debug;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::IndexError;
use crate::models::VideoMeta;
use crate::scanner::CancelToken;

/// Poll interval while waiting on a probe subprocess
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Narrow interface over the external probing tool
pub trait VideoProbe: Send + Sync {
    /// Return the structured stream metadata for a video file
    fn probe(&self, path: &Path) -> Result<Value, IndexError>;

    /// Return an encoded still of a representative frame
    fn grab_frame(&self, path: &Path) -> Result<Vec<u8>, IndexError>;
}

/// Probe implementation backed by the ffprobe/ffmpeg binaries on `$PATH`
pub struct FfprobeProbe {
    timeout: Duration,
    cancel: CancelToken,
}

impl FfprobeProbe {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self { timeout, cancel }
    }

    fn run(&self, mut cmd: Command, path: &Path) -> Result<Vec<u8>, IndexError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| IndexError::probe_error(path.into(), format!("cannot spawn probe: {e}")))?;

        // Drain pipes on their own threads so a chatty child cannot deadlock
        // against the wait loop.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_handle = std::thread::spawn(move || read_all(stdout));
        let err_handle = std::thread::spawn(move || read_all(stderr));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    return Err(IndexError::probe_error(path.into(), e.to_string()));
                }
            }
            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                let reason = if self.cancel.is_cancelled() {
                    "probe killed by cancellation"
                } else {
                    "probe timed out"
                };
                return Err(IndexError::probe_error(path.into(), reason));
            }
            std::thread::sleep(WAIT_POLL);
        };

        let stdout = out_handle.join().unwrap_or_default();
        let stderr = err_handle.join().unwrap_or_default();

        if !status.success() {
            let diag = String::from_utf8_lossy(&stderr);
            return Err(IndexError::probe_error(
                path.into(),
                format!("probe exited {}: {}", status, diag.trim()),
            ));
        }
        Ok(stdout)
    }
}

fn read_all(pipe: Option<impl Read>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

impl VideoProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<Value, IndexError> {
        let mut cmd = Command::new("ffprobe");
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);
        let stdout = self.run(cmd, path)?;
        serde_json::from_slice(&stdout)
            .map_err(|e| IndexError::probe_error(path.into(), format!("malformed probe output: {e}")))
    }

    fn grab_frame(&self, path: &Path) -> Result<Vec<u8>, IndexError> {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-i"])
            .arg(path)
            .args(["-frames:v", "1", "-f", "image2", "-c:v", "png", "pipe:1"]);
        let frame = self.run(cmd, path)?;
        if frame.is_empty() {
            return Err(IndexError::probe_error(path.into(), "no frame produced"));
        }
        Ok(frame)
    }
}

/// Extract video metadata through the given probe
pub fn extract(path: &Path, probe: &dyn VideoProbe) -> Result<VideoMeta, IndexError> {
    let value = probe.probe(path)?;
    let meta = parse_probe_json(path, &value)?;
    debug!(
        "probed {}: {:?}x{:?} {:?}s codec {:?}",
        path.display(),
        meta.width,
        meta.height,
        meta.duration,
        meta.video_codec
    );
    Ok(meta)
}

/// Map ffprobe's JSON document onto a `VideoMeta`.
///
/// A container with no video stream is a probe error; a missing audio
/// stream just leaves `audio_codec` empty.
pub fn parse_probe_json(path: &Path, value: &Value) -> Result<VideoMeta, IndexError> {
    let streams = value
        .get("streams")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::probe_error(path.into(), "probe output missing streams"))?;

    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("video"))
        .ok_or_else(|| IndexError::probe_error(path.into(), "no video stream"))?;
    let audio = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"));

    let format = value.get("format");

    let mut meta = VideoMeta {
        width: video.get("width").and_then(Value::as_u64).map(|w| w as u32),
        height: video.get("height").and_then(Value::as_u64).map(|h| h as u32),
        duration: format
            .and_then(|f| f.get("duration"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<f64>().ok()),
        bitrate: format
            .and_then(|f| f.get("bit_rate"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok()),
        fps: None,
        nb_frames: video
            .get("nb_frames")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok()),
        rotation: None,
        video_codec: video
            .get("codec_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        audio_codec: audio
            .and_then(|a| a.get("codec_name"))
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    meta.fps = frame_rate(video, "r_frame_rate").or_else(|| frame_rate(video, "avg_frame_rate"));
    meta.rotation = raw_rotation(video).map(normalize_rotation);

    Ok(meta)
}

/// Parse an ffprobe "num/den" frame-rate fraction
fn frame_rate(stream: &Value, key: &str) -> Option<f64> {
    let raw = stream.get(key).and_then(Value::as_str)?;
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 || num == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// Container-reported rotation: legacy `tags.rotate` or display-matrix side data
fn raw_rotation(stream: &Value) -> Option<f64> {
    if let Some(rot) = stream
        .get("tags")
        .and_then(|t| t.get("rotate"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
    {
        return Some(rot);
    }
    stream
        .get("side_data_list")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|sd| sd.get("rotation").and_then(Value::as_f64))
}

/// Fold an arbitrary rotation value into {0, 90, 180, 270}
pub fn normalize_rotation(raw: f64) -> u32 {
    let folded = (raw.round() as i64).rem_euclid(360);
    let snapped = ((folded + 45) / 90) % 4;
    (snapped * 90) as u32
}
