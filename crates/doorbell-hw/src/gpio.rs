//! Minimal sysfs GPIO access (`/sys/class/gpio`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("gpio{pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("gpio{pin}: unexpected value {value:?}")]
    BadValue { pin: u32, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// One exported sysfs GPIO line.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    pin: u32,
    root: PathBuf,
}

impl SysfsGpio {
    /// Export `pin` if needed and set its direction.
    pub fn open(pin: u32, direction: Direction) -> Result<Self, GpioError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, direction)
    }

    pub fn open_at(root: &Path, pin: u32, direction: Direction) -> Result<Self, GpioError> {
        let gpio = Self {
            pin,
            root: root.to_path_buf(),
        };
        if !gpio.pin_dir().exists() {
            fs::write(root.join("export"), pin.to_string()).map_err(|e| gpio.io(e))?;
            // udev needs a moment to fix permissions on the new node.
            std::thread::sleep(Duration::from_millis(50));
        }
        fs::write(gpio.pin_dir().join("direction"), direction.as_str()).map_err(|e| gpio.io(e))?;
        tracing::debug!(pin, direction = direction.as_str(), "gpio opened");
        Ok(gpio)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn io(&self, source: io::Error) -> GpioError {
        GpioError::Io {
            pin: self.pin,
            source,
        }
    }

    pub fn write(&self, high: bool) -> Result<(), GpioError> {
        fs::write(self.pin_dir().join("value"), if high { "1" } else { "0" })
            .map_err(|e| self.io(e))
    }

    pub fn read(&self) -> Result<bool, GpioError> {
        let raw = fs::read_to_string(self.pin_dir().join("value")).map_err(|e| self.io(e))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(GpioError::BadValue {
                pin: self.pin,
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Fake sysfs tree with `gpio{pin}` already exported.
    pub(crate) fn fake_root(tag: &str, pin: u32) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "doorbell-gpio-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join(format!("gpio{pin}"))).unwrap();
        root
    }

    #[test]
    fn test_open_sets_direction() {
        let root = fake_root("dir", 5);
        SysfsGpio::open_at(&root, 5, Direction::Out).unwrap();
        assert_eq!(fs::read_to_string(root.join("gpio5/direction")).unwrap(), "out");
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_write_then_read() {
        let root = fake_root("rw", 6);
        let gpio = SysfsGpio::open_at(&root, 6, Direction::Out).unwrap();
        gpio.write(true).unwrap();
        assert!(gpio.read().unwrap());
        gpio.write(false).unwrap();
        assert!(!gpio.read().unwrap());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_read_rejects_garbage() {
        let root = fake_root("bad", 7);
        let gpio = SysfsGpio::open_at(&root, 7, Direction::In).unwrap();
        fs::write(root.join("gpio7/value"), "x\n").unwrap();
        assert!(matches!(gpio.read(), Err(GpioError::BadValue { .. })));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_open_missing_root_fails() {
        let err = SysfsGpio::open_at(Path::new("/nonexistent-gpio-root"), 3, Direction::Out);
        assert!(matches!(err, Err(GpioError::Io { pin: 3, .. })));
    }
}
