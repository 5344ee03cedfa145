//! Sysfs-backed digital lines.
//!
//! A line goes through three steps before use: export (skipped when the line
//! directory already exists), direction set, then opening its `value`
//! endpoint. The value handle stays open for the lifetime of the line so
//! toggling costs one write.

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{InputLine, LineError, OutputLine};

/// Default sysfs GPIO class directory.
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";
/// How long to wait for the kernel to create the line directory after export.
const DEFAULT_EXPORT_SETTLE: Duration = Duration::from_millis(100);
const EXPORT_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// One GPIO controller exposed through sysfs, addressed as `base + offset`.
pub struct GpioChip {
    root: PathBuf,
    base: u32,
    export_settle: Duration,
    claimed: Mutex<HashSet<u32>>,
}

impl GpioChip {
    pub fn new(root: impl Into<PathBuf>, base: u32) -> Self {
        Self {
            root: root.into(),
            base,
            export_settle: DEFAULT_EXPORT_SETTLE,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Override the post-export wait for the line directory to appear.
    pub fn with_export_settle(mut self, settle: Duration) -> Self {
        self.export_settle = settle;
        self
    }

    /// Global line number for a chip-relative offset.
    pub fn line(&self, offset: u32) -> u32 {
        self.base.saturating_add(offset)
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    pub fn is_exported(&self, line: u32) -> bool {
        self.line_dir(line).join("direction").exists()
    }

    /// Export a line. A line that is already exported is left untouched.
    pub fn export(&self, line: u32) -> Result<(), LineError> {
        if self.is_exported(line) {
            return Ok(());
        }

        let export_path = self.root.join("export");
        write_attribute(&export_path, &line.to_string()).map_err(|source| LineError::Export {
            what: format!("gpio{line}"),
            path: export_path.clone(),
            source,
        })?;

        let direction_path = self.line_dir(line).join("direction");
        if !wait_for_path(&direction_path, self.export_settle) {
            return Err(LineError::ExportTimeout {
                what: format!("gpio{line}"),
                path: direction_path,
            });
        }
        debug!(line, "exported gpio line");
        Ok(())
    }

    pub fn set_direction(&self, line: u32, direction: Direction) -> Result<(), LineError> {
        let path = self.line_dir(line).join("direction");
        write_attribute(&path, direction.as_str()).map_err(|source| LineError::Write { path, source })
    }

    /// Claim `offset` as an output. The line starts low.
    pub fn claim_output(self: &Arc<Self>, offset: u32) -> Result<DigitalOutput, LineError> {
        let claim = self.claim(self.line(offset))?;
        self.export(claim.line)?;
        self.set_direction(claim.line, Direction::Out)?;

        let path = self.line_dir(claim.line).join("value");
        let value = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| LineError::Open {
                path: path.clone(),
                source,
            })?;

        let mut output = DigitalOutput {
            claim: Some(claim),
            value,
            path,
        };
        output.set_level(false)?;
        Ok(output)
    }

    /// Claim `offset` as an input.
    pub fn claim_input(self: &Arc<Self>, offset: u32) -> Result<DigitalInput, LineError> {
        let claim = self.claim(self.line(offset))?;
        self.export(claim.line)?;
        self.set_direction(claim.line, Direction::In)?;

        let path = self.line_dir(claim.line).join("value");
        let value = OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|source| LineError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(DigitalInput {
            _claim: claim,
            value,
            path,
        })
    }

    fn claim(self: &Arc<Self>, line: u32) -> Result<LineClaim, LineError> {
        let mut claimed = match self.claimed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !claimed.insert(line) {
            return Err(LineError::Busy { line });
        }
        Ok(LineClaim {
            chip: Arc::clone(self),
            line,
        })
    }

    fn release(&self, line: u32) {
        let mut claimed = match self.claimed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claimed.remove(&line);
    }
}

/// Exclusive hold on one line number; released on drop.
struct LineClaim {
    chip: Arc<GpioChip>,
    line: u32,
}

impl Drop for LineClaim {
    fn drop(&mut self) {
        self.chip.release(self.line);
    }
}

/// Exported output line with an open `value` handle. Driven low on drop.
pub struct DigitalOutput {
    claim: Option<LineClaim>,
    value: File,
    path: PathBuf,
}

impl DigitalOutput {
    pub fn line(&self) -> u32 {
        self.claim.as_ref().map(|claim| claim.line).unwrap_or_default()
    }
}

impl OutputLine for DigitalOutput {
    fn set_level(&mut self, high: bool) -> Result<(), LineError> {
        let level: &[u8] = if high { b"1" } else { b"0" };
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.write_all(level))
            .map_err(|source| LineError::Write {
                path: self.path.clone(),
                source,
            })
    }
}

impl Drop for DigitalOutput {
    fn drop(&mut self) {
        if let Err(err) = self.set_level(false) {
            debug!("failed to drive gpio {} low on release: {err}", self.line());
        }
        self.claim.take();
    }
}

/// Exported input line. Each read rewinds the `value` handle and samples the
/// current level.
pub struct DigitalInput {
    _claim: LineClaim,
    value: File,
    path: PathBuf,
}

impl InputLine for DigitalInput {
    fn level(&mut self) -> Result<bool, LineError> {
        let mut buf = [0u8; 1];
        let read = self
            .value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read(&mut buf))
            .map_err(|source| LineError::Read {
                path: self.path.clone(),
                source,
            })?;
        if read == 0 {
            return Err(LineError::Read {
                path: self.path.clone(),
                source: io::Error::from(io::ErrorKind::UnexpectedEof),
            });
        }
        Ok(buf[0] == b'1')
    }
}

/// Write a sysfs attribute without creating it.
pub(crate) fn write_attribute(path: &Path, value: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value.as_bytes())
}

fn wait_for_path(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXPORT_POLL);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn fake_line(root: &Path, line: u32, value: &str) {
        let dir = root.join(format!("gpio{line}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
        fs::write(dir.join("value"), value).unwrap();
    }

    #[test]
    fn export_of_exported_line_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        fake_line(tmp.path(), 525, "0");
        let chip = GpioChip::new(tmp.path(), 512);

        chip.export(525).unwrap();
        chip.export(525).unwrap();

        assert!(!tmp.path().join("export").exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn export_writes_line_number_and_times_out_without_kernel() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("export"), "").unwrap();
        let chip = GpioChip::new(tmp.path(), 512).with_export_settle(Duration::from_millis(20));

        let err = chip.export(517).unwrap_err();

        assert!(matches!(err, LineError::ExportTimeout { .. }));
        assert_eq!(fs::read_to_string(tmp.path().join("export")).unwrap(), "517");
    }

    #[test]
    fn output_claim_sets_direction_and_starts_low() {
        let tmp = tempfile::tempdir().unwrap();
        fake_line(tmp.path(), 525, "1");
        let chip = Arc::new(GpioChip::new(tmp.path(), 512));

        let mut out = chip.claim_output(13).unwrap();
        let dir = tmp.path().join("gpio525");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "0");

        out.set_level(true).unwrap();
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "1");

        drop(out);
        assert_eq!(fs::read_to_string(dir.join("value")).unwrap(), "0");
    }

    #[test]
    fn second_claim_of_same_line_is_busy_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        fake_line(tmp.path(), 525, "0");
        let chip = Arc::new(GpioChip::new(tmp.path(), 512));

        let first = chip.claim_output(13).unwrap();
        assert!(matches!(
            chip.claim_output(13),
            Err(LineError::Busy { line: 525 })
        ));
        assert!(matches!(
            chip.claim_input(13),
            Err(LineError::Busy { line: 525 })
        ));

        drop(first);
        assert!(chip.claim_output(13).is_ok());
    }

    #[test]
    fn failed_claim_releases_line() {
        let tmp = tempfile::tempdir().unwrap();
        let chip = Arc::new(
            GpioChip::new(tmp.path(), 512).with_export_settle(Duration::from_millis(1)),
        );

        assert!(chip.claim_output(1).is_err());
        assert!(matches!(
            chip.claim_output(1),
            Err(LineError::Export { .. })
        ));
    }

    #[test]
    fn input_reads_current_level_each_time() {
        let tmp = tempfile::tempdir().unwrap();
        fake_line(tmp.path(), 527, "0\n");
        let chip = Arc::new(GpioChip::new(tmp.path(), 512));

        let mut input = chip.claim_input(15).unwrap();
        assert!(!input.level().unwrap());

        fs::write(tmp.path().join("gpio527/value"), "1\n").unwrap();
        assert!(input.level().unwrap());
    }
}
