//! doorbell-hw — Hardware adapters for the doorbell pipeline.
//!
//! V4L2 camera capture, a sysfs GPIO door relay, and button/PIR trigger
//! polling. Each adapter implements a contract from `doorbell_core::interfaces`.

pub mod camera;
pub mod frame;
pub mod gpio;
pub mod relay;
pub mod triggers;

pub use camera::{Camera, CameraError, NoCamera, PixelFormat};
pub use gpio::{Direction, GpioError, SysfsGpio};
pub use relay::{DoorLock, RelayError, RelayPin};
pub use triggers::{Trigger, TriggerGate, TriggerListener};
