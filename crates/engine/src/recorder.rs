//! Screen recording via an external ffmpeg process.
//!
//! The recorder is best-effort: failures to start or to produce a usable
//! file never fail the run, they only cost the video artifact.

use crate::config::RecordingConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{info, warn};
use uiproof_common::{Error, Result};

/// Build the ffmpeg argument list for an X11 screen grab
fn capture_args(config: &RecordingConfig, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-video_size".to_string(),
        config.resolution.clone(),
        "-framerate".to_string(),
        config.framerate.to_string(),
        "-f".to_string(),
        "x11grab".to_string(),
        "-i".to_string(),
        config.display.clone(),
        "-codec:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "ultrafast".to_string(),
        output.display().to_string(),
    ]
}

/// Handle to a live recording process
pub struct RecorderHandle {
    child: Child,
    path: PathBuf,
}

impl RecorderHandle {
    /// Start capturing into `output`
    pub fn start(config: &RecordingConfig, output: PathBuf) -> Result<Self> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let child = Command::new(&config.ffmpeg_path)
            .args(capture_args(config, &output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Recorder(format!("failed to spawn ffmpeg: {e}")))?;

        info!("Recording screen to {:?}", output);
        Ok(Self { child, path: output })
    }

    /// Ask ffmpeg to finish the file, force-killing after a grace period.
    pub async fn stop(mut self) -> Result<PathBuf> {
        if let Some(mut stdin) = self.child.stdin.take() {
            // 'q' makes ffmpeg flush and close the container cleanly
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!("Recorder exited with {}", status),
            Ok(Err(e)) => warn!("Recorder wait failed: {}", e),
            Err(_) => {
                warn!("Recorder did not stop in time, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }

        Ok(self.path)
    }
}

/// True when the recording produced a usable, non-empty file
pub async fn has_usable_video(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_encode_capture_settings() {
        let config = RecordingConfig {
            enabled: true,
            ffmpeg_path: "ffmpeg".into(),
            display: ":10.0".into(),
            resolution: "1280x720".into(),
            framerate: 15,
        };
        let args = capture_args(&config, Path::new("/tmp/run.mp4"));
        assert!(args.windows(2).any(|w| w == ["-i", ":10.0"]));
        assert!(args.windows(2).any(|w| w == ["-framerate", "15"]));
        assert_eq!(args.last().unwrap(), "/tmp/run.mp4");
    }

    #[tokio::test]
    async fn missing_or_empty_video_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.mp4");
        assert!(!has_usable_video(&missing).await);

        let empty = dir.path().join("empty.mp4");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert!(!has_usable_video(&empty).await);

        let full = dir.path().join("full.mp4");
        tokio::fs::write(&full, b"frames").await.unwrap();
        assert!(has_usable_video(&full).await);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_not_fatal() {
        let config = RecordingConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        match RecorderHandle::start(&config, dir.path().join("v.mp4")) {
            Err(Error::Recorder(msg)) => assert!(msg.contains("spawn")),
            other => panic!("expected recorder error, got {:?}", other.map(|_| ())),
        }
    }
}
