use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{debug, info};

use crate::{
    ImageSource,
    reclaim::DeviceReclaimer,
    types::{CaptureError, CapturedImage},
};

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Captures a single frame from a V4L2 device by running `ffmpeg`.
///
/// The session keeps the device node open while acquired so a concurrent
/// reclaim by another instance sees it as held.
pub struct FfmpegSnapshot {
    device: PathBuf,
    size: (u32, u32),
    program: String,
    reclaimer: DeviceReclaimer,
    timeout: Duration,
    handle: Option<File>,
}

impl FfmpegSnapshot {
    pub fn new(device: impl Into<PathBuf>, size: (u32, u32)) -> Self {
        Self {
            device: device.into(),
            size,
            program: "ffmpeg".to_string(),
            reclaimer: DeviceReclaimer::default(),
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            handle: None,
        }
    }

    pub fn with_reclaimer(mut self, reclaimer: DeviceReclaimer) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    /// Override the ffmpeg executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Kill the capture process if it has not exited after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_acquired(&self) -> bool {
        self.handle.is_some()
    }

    fn command(&self, output: &Path) -> Command {
        let video_size = format!("{}x{}", self.size.0, self.size.1);
        let mut cmd = Command::new(&self.program);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-video_size")
            .arg(&video_size)
            .arg("-i")
            .arg(&self.device)
            .arg("-frames:v")
            .arg("1")
            .arg("-y")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    fn run_to_completion(&self, mut cmd: Command) -> Result<(), CaptureError> {
        let mut child = cmd.spawn()?;
        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Timeout {
                    program: self.program.clone(),
                    after: self.timeout,
                });
            }
            thread::sleep(EXIT_POLL);
        };

        if !status.success() {
            // `-loglevel error` keeps stderr well inside the pipe buffer.
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(CaptureError::Backend {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

impl ImageSource for FfmpegSnapshot {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.reclaimer.reclaim(&self.device);
        let handle = File::open(&self.device).map_err(|err| {
            debug!("open {} failed: {err}", self.device.display());
            CaptureError::Open {
                uri: self.device.display().to_string(),
            }
        })?;
        self.handle = Some(handle);
        debug!(device = %self.device.display(), "camera acquired");
        Ok(())
    }

    fn capture(&mut self, path: &Path) -> Result<CapturedImage, CaptureError> {
        if self.handle.is_none() {
            return Err(CaptureError::NotAcquired);
        }

        self.run_to_completion(self.command(path))?;

        // ffmpeg has closed the file; make sure it reached storage before
        // anyone reads it back.
        let file = File::open(path)?;
        file.sync_all()?;
        let bytes = file.metadata()?.len();

        info!(path = %path.display(), bytes, "frame captured");
        Ok(CapturedImage {
            path: path.to_path_buf(),
            bytes,
            captured_at: Utc::now(),
        })
    }

    fn release(&mut self) {
        if self.handle.take().is_some() {
            debug!(device = %self.device.display(), "camera released");
        }
    }
}

impl Drop for FfmpegSnapshot {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt};

    use super::*;

    fn quiet_reclaimer(root: &Path) -> DeviceReclaimer {
        DeviceReclaimer::default().with_proc_root(root)
    }

    #[test]
    fn capture_without_acquire_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = FfmpegSnapshot::new(tmp.path().join("video0"), (640, 480))
            .with_reclaimer(quiet_reclaimer(tmp.path()));

        assert!(matches!(
            source.capture(&tmp.path().join("out.jpg")),
            Err(CaptureError::NotAcquired)
        ));
    }

    #[test]
    fn missing_device_fails_to_acquire() {
        let tmp = tempfile::tempdir().unwrap();
        let mut source = FfmpegSnapshot::new(tmp.path().join("video9"), (640, 480))
            .with_reclaimer(quiet_reclaimer(tmp.path()));

        assert!(matches!(source.acquire(), Err(CaptureError::Open { .. })));
        assert!(!source.is_acquired());
    }

    #[test]
    fn acquire_release_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("video0");
        fs::write(&device, "").unwrap();
        let mut source =
            FfmpegSnapshot::new(&device, (640, 480)).with_reclaimer(quiet_reclaimer(tmp.path()));

        source.acquire().unwrap();
        assert!(source.is_acquired());
        source.release();
        assert!(!source.is_acquired());
        source.release();
    }

    #[test]
    fn failing_backend_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("video0");
        fs::write(&device, "").unwrap();
        let mut source = FfmpegSnapshot::new(&device, (640, 480))
            .with_reclaimer(quiet_reclaimer(tmp.path()))
            .with_program("false");

        source.acquire().unwrap();
        assert!(matches!(
            source.capture(&tmp.path().join("out.jpg")),
            Err(CaptureError::Backend { .. })
        ));
    }

    #[test]
    fn wedged_backend_is_killed_after_the_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let device = tmp.path().join("video0");
        fs::write(&device, "").unwrap();
        let program = tmp.path().join("hang.sh");
        fs::write(&program, "#!/bin/sh\nsleep 30\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let mut source = FfmpegSnapshot::new(&device, (640, 480))
            .with_reclaimer(quiet_reclaimer(tmp.path()))
            .with_program(program.display().to_string())
            .with_timeout(Duration::from_millis(200));

        source.acquire().unwrap();
        let started = Instant::now();
        let result = source.capture(&tmp.path().join("out.jpg"));

        assert!(matches!(result, Err(CaptureError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
