//! Door lock relay with a timed hold on its own worker thread.

use crate::gpio::{Direction, GpioError, SysfsGpio};
use doorbell_core::DoorActuator;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("relay gpio: {0}")]
    Gpio(#[from] GpioError),
}

/// An output line driving the lock relay (active high).
pub trait RelayPin: Send + Sync {
    fn set(&self, high: bool) -> Result<(), RelayError>;
}

impl RelayPin for SysfsGpio {
    fn set(&self, high: bool) -> Result<(), RelayError> {
        Ok(self.write(high)?)
    }
}

pub struct DoorLock {
    pin: Option<Arc<dyn RelayPin>>,
}

impl DoorLock {
    pub fn new(pin: Arc<dyn RelayPin>) -> Self {
        Self { pin: Some(pin) }
    }

    /// A lock whose unlocks are logged no-ops.
    pub fn disabled() -> Self {
        Self { pin: None }
    }

    /// Open the sysfs relay line when `enabled`, starting low. Any failure
    /// yields a disabled lock.
    pub fn from_sysfs(pin: u32, enabled: bool) -> Self {
        if !enabled {
            tracing::info!("door lock disabled");
            return Self::disabled();
        }
        let opened = SysfsGpio::open(pin, Direction::Out).and_then(|g| g.write(false).map(|_| g));
        match opened {
            Ok(gpio) => {
                tracing::info!(pin, "door lock relay initialized");
                Self::new(Arc::new(gpio))
            }
            Err(e) => {
                tracing::warn!(pin, error = %e, "relay unavailable; door lock disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pin.is_some()
    }

    /// Start a hold on a worker thread. `None` when disabled or the
    /// thread could not be spawned.
    pub fn spawn_unlock(&self, duration: Duration) -> Option<JoinHandle<()>> {
        let Some(pin) = self.pin.clone() else {
            tracing::info!("unlock requested but door lock is disabled");
            return None;
        };
        let spawned = std::thread::Builder::new()
            .name("doorbell-relay".into())
            .spawn(move || {
                if let Err(e) = hold(pin.as_ref(), duration) {
                    tracing::warn!(error = %e, "failed to toggle relay");
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "failed to spawn relay worker");
                None
            }
        }
    }
}

/// Drive high for `duration`, then low. The release is attempted even when
/// raising the line failed; the first error is returned.
fn hold(pin: &dyn RelayPin, duration: Duration) -> Result<(), RelayError> {
    let raised = pin.set(true);
    if raised.is_ok() {
        tracing::info!(seconds = duration.as_secs_f32(), "door unlocked");
        std::thread::sleep(duration);
    }
    let released = pin.set(false);
    raised?;
    released?;
    tracing::info!("door locked");
    Ok(())
}

impl DoorActuator for DoorLock {
    fn unlock_async(&self, duration: Duration) {
        let _ = self.spawn_unlock(duration);
    }
}
