use std::collections::HashSet;
use std::fs;
use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::debug;
use log::warn;

use crate::gpio::lock;
use crate::gpio::Direction;
use crate::gpio::EdgeSource;
use crate::gpio::Gpio;
use crate::gpio::GpioError;
use crate::gpio::LineId;

// udev needs a moment to fix up permissions of a freshly exported line
const EXPORT_RETRIES: usize = 100;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(10);

pub struct SysfsGpio {
    root: PathBuf,
    exported: Mutex<HashSet<LineId>>,
}

impl SysfsGpio {
    pub fn open(root: &Path) -> Result<SysfsGpio, GpioError> {
        if !root.is_dir() {
            return Err(GpioError::NoBackend(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }
        Ok(SysfsGpio {
            root: root.to_path_buf(),
            exported: Mutex::new(HashSet::new()),
        })
    }

    fn line_dir(&self, line: LineId) -> PathBuf {
        self.root.join(format!("gpio{}", line))
    }

    fn export(&self, line: LineId) -> Result<(), GpioError> {
        if self.line_dir(line).exists() {
            return Ok(());
        }
        fs::write(self.root.join("export"), line.to_string())
            .map_err(|e| GpioError::io(line, e))?;
        lock(&self.exported).insert(line);
        debug!("Exported line {}", line);
        Ok(())
    }

    fn write_attr(&self, line: LineId, attr: &str, value: &str) -> Result<(), GpioError> {
        fs::write(self.line_dir(line).join(attr), value).map_err(|e| GpioError::io(line, e))
    }

    /// Like `write_attr`, but waits out the permission fix-up after export.
    /// Only used while setting a line up, never for value writes.
    fn setup_attr(&self, line: LineId, attr: &str, value: &str) -> Result<(), GpioError> {
        let path = self.line_dir(line).join(attr);
        retry_permission_denied(|| fs::write(&path, value)).map_err(|e| GpioError::io(line, e))
    }
}

fn retry_permission_denied<F>(mut op: F) -> std::io::Result<()>
where
    F: FnMut() -> std::io::Result<()>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied
                && attempt < EXPORT_RETRIES =>
            {
                attempt += 1;
                thread::sleep(EXPORT_RETRY_DELAY);
            }
            result => return result,
        }
    }
}

impl Gpio for SysfsGpio {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn configure(&self, line: LineId, direction: Direction) -> Result<(), GpioError> {
        self.export(line)?;
        let direction = match direction {
            Direction::Input => "in",
            Direction::Output { initial: true } => "high",
            Direction::Output { initial: false } => "low",
        };
        self.setup_attr(line, "direction", direction)
    }

    fn read(&self, line: LineId) -> Result<bool, GpioError> {
        let path = self.line_dir(line).join("value");
        if !path.exists() {
            return Err(GpioError::NotConfigured(line));
        }
        let value = fs::read_to_string(&path).map_err(|e| GpioError::io(line, e))?;
        Ok(value.trim() == "1")
    }

    fn write(&self, line: LineId, value: bool) -> Result<(), GpioError> {
        if !self.line_dir(line).exists() {
            return Err(GpioError::NotConfigured(line));
        }
        self.write_attr(line, "value", if value { "1" } else { "0" })
    }

    fn subscribe(&self, line: LineId) -> Result<Box<dyn EdgeSource>, GpioError> {
        self.configure(line, Direction::Input)?;
        self.setup_attr(line, "edge", "rising")?;
        let mut value = File::open(self.line_dir(line).join("value"))
            .map_err(|e| GpioError::io(line, e))?;
        // the first poll reports the current level unless it is read once
        drain(&mut value).map_err(|e| GpioError::io(line, e))?;
        Ok(Box::new(SysfsEdges { line, value }))
    }

    fn cleanup(&self) {
        let mut exported = lock(&self.exported);
        for line in exported.drain() {
            if let Err(e) = fs::write(self.root.join("unexport"), line.to_string()) {
                warn!("Failed to unexport line {}: {}", line, e);
            }
        }
    }
}

struct SysfsEdges {
    line: LineId,
    value: File,
}

impl EdgeSource for SysfsEdges {
    fn wait(&mut self) -> Result<(), GpioError> {
        let mut fd = libc::pollfd {
            fd: self.value.as_raw_fd(),
            events: libc::POLLPRI | libc::POLLERR,
            revents: 0,
        };
        loop {
            let ready = unsafe { libc::poll(&mut fd, 1, -1) };
            if ready < 0 {
                let e = std::io::Error::last_os_error();
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(GpioError::io(self.line, e));
            }
            if fd.revents & libc::POLLNVAL != 0 {
                return Err(GpioError::Closed(self.line));
            }
            if fd.revents & (libc::POLLPRI | libc::POLLERR) != 0 {
                drain(&mut self.value).map_err(|e| GpioError::io(self.line, e))?;
                return Ok(());
            }
        }
    }
}

fn drain(file: &mut File) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(4);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_line(root: &Path, line: u32) {
        let dir = root.join(format!("gpio{}", line));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("direction"), "in").unwrap();
        fs::write(dir.join("value"), "0\n").unwrap();
        fs::write(dir.join("edge"), "none").unwrap();
    }

    #[test]
    fn configures_outputs_with_initial_level() {
        let root = tempfile::tempdir().unwrap();
        fake_line(root.path(), 10);
        let gpio = SysfsGpio::open(root.path()).unwrap();

        gpio.configure(LineId::new(10), Direction::Output { initial: false })
            .unwrap();

        let direction = fs::read_to_string(root.path().join("gpio10/direction")).unwrap();
        assert_eq!(direction, "low");
    }

    #[test]
    fn reads_and_writes_values() {
        let root = tempfile::tempdir().unwrap();
        fake_line(root.path(), 9);
        let gpio = SysfsGpio::open(root.path()).unwrap();
        let line = LineId::new(9);

        assert!(!gpio.read(line).unwrap());
        gpio.write(line, true).unwrap();
        assert!(gpio.read(line).unwrap());
        assert_eq!(fs::read_to_string(root.path().join("gpio9/value")).unwrap(), "1");
    }

    #[test]
    fn unexported_lines_are_not_configured() {
        let root = tempfile::tempdir().unwrap();
        let gpio = SysfsGpio::open(root.path()).unwrap();

        assert!(matches!(
            gpio.read(LineId::new(3)),
            Err(GpioError::NotConfigured(_))
        ));
        assert!(matches!(
            gpio.write(LineId::new(3), true),
            Err(GpioError::NotConfigured(_))
        ));
    }

    fn permission_denied() -> std::io::Error {
        std::io::Error::from(std::io::ErrorKind::PermissionDenied)
    }

    #[test]
    fn setup_waits_for_permissions() {
        let mut calls = 0;
        let result = retry_permission_denied(|| {
            calls += 1;
            match calls {
                1 | 2 => Err(permission_denied()),
                _ => Ok(()),
            }
        });
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[test]
    fn setup_gives_up_on_persistent_denial() {
        let mut calls = 0;
        let result = retry_permission_denied(|| {
            calls += 1;
            Err(permission_denied())
        });
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::PermissionDenied);
        assert_eq!(calls, EXPORT_RETRIES + 1);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result = retry_permission_denied(|| {
            calls += 1;
            Err(std::io::Error::from(std::io::ErrorKind::NotFound))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn value_writes_fail_without_waiting() {
        let root = tempfile::tempdir().unwrap();
        fake_line(root.path(), 9);
        // a directory in place of the value file makes every write fail
        fs::remove_file(root.path().join("gpio9/value")).unwrap();
        fs::create_dir(root.path().join("gpio9/value")).unwrap();
        let gpio = SysfsGpio::open(root.path()).unwrap();
        let start = std::time::Instant::now();

        assert!(matches!(
            gpio.write(LineId::new(9), true),
            Err(GpioError::Io { .. })
        ));
        assert!(start.elapsed() < EXPORT_RETRY_DELAY * 10);
    }

    #[test]
    fn exports_missing_lines_and_unexports_on_cleanup() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("export"), "").unwrap();
        fs::write(root.path().join("unexport"), "").unwrap();
        let gpio = SysfsGpio::open(root.path()).unwrap();

        // no kernel behind the tree, so the direction write fails after export
        assert!(gpio.configure(LineId::new(7), Direction::Input).is_err());
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "7");

        gpio.cleanup();
        assert_eq!(fs::read_to_string(root.path().join("unexport")).unwrap(), "7");
    }
}
