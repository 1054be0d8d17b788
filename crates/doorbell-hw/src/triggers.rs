//! Doorbell button and PIR motion triggers.
//!
//! A button press only counts when motion was seen shortly before it, and
//! presses inside the bounce interval of the last accepted one are ignored.

use crate::gpio::{Direction, GpioError, SysfsGpio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Debounce and PIR gating for button presses.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    pir_window: Duration,
    bounce: Duration,
    last_motion: Option<Instant>,
    last_press: Option<Instant>,
}

impl TriggerGate {
    pub fn new(pir_window: Duration, bounce: Duration) -> Self {
        Self {
            pir_window,
            bounce,
            last_motion: None,
            last_press: None,
        }
    }

    pub fn on_motion(&mut self, now: Instant) {
        self.last_motion = Some(now);
    }

    /// Whether a press at `now` should start a recognition.
    pub fn on_button(&mut self, now: Instant) -> bool {
        if let Some(prev) = self.last_press {
            if now.saturating_duration_since(prev) < self.bounce {
                return false;
            }
        }
        self.last_press = Some(now);

        let recent = self
            .last_motion
            .is_some_and(|m| now.saturating_duration_since(m) <= self.pir_window);
        if !recent {
            tracing::info!("button pressed but PIR not recent");
        }
        recent
    }
}

/// A digital input line.
pub trait InputPin: Send {
    fn is_high(&self) -> Result<bool, GpioError>;
}

impl InputPin for SysfsGpio {
    fn is_high(&self) -> Result<bool, GpioError> {
        self.read()
    }
}

/// Accepted button press.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub at: Instant,
}

/// Polls the button and PIR lines on a dedicated thread.
pub struct TriggerListener {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TriggerListener {
    /// Open both sysfs lines as inputs and start polling.
    pub fn start_sysfs(
        button_pin: u32,
        pir_pin: u32,
        gate: TriggerGate,
        tx: mpsc::Sender<Trigger>,
    ) -> Result<Self, GpioError> {
        let button = SysfsGpio::open(button_pin, Direction::In)?;
        let pir = SysfsGpio::open(pir_pin, Direction::In)?;
        tracing::info!(button = button_pin, pir = pir_pin, "trigger listener started");
        Self::spawn(Box::new(button), Box::new(pir), gate, tx, POLL_INTERVAL)
            .map_err(|source| GpioError::Io {
                pin: button_pin,
                source,
            })
    }

    pub fn spawn(
        button: Box<dyn InputPin>,
        pir: Box<dyn InputPin>,
        mut gate: TriggerGate,
        tx: mpsc::Sender<Trigger>,
        poll: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("doorbell-triggers".into())
            .spawn(move || {
                let mut button_was = false;
                let mut pir_was = false;
                let mut warned = false;

                while !stop_flag.load(Ordering::Relaxed) {
                    match (button.is_high(), pir.is_high()) {
                        (Ok(b), Ok(p)) => {
                            warned = false;
                            let now = Instant::now();
                            if p && !pir_was {
                                tracing::debug!("motion detected");
                                gate.on_motion(now);
                            }
                            if b && !button_was && gate.on_button(now) {
                                tracing::info!("doorbell pressed");
                                if let Err(e) = tx.try_send(Trigger { at: now }) {
                                    tracing::warn!(error = %e, "trigger dropped");
                                }
                            }
                            button_was = b;
                            pir_was = p;
                        }
                        (Err(e), _) | (_, Err(e)) => {
                            if !warned {
                                tracing::warn!(error = %e, "trigger input read failed");
                                warned = true;
                            }
                        }
                    }
                    std::thread::sleep(poll);
                }
                tracing::debug!("trigger listener stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TriggerListener {
    fn drop(&mut self) {
        self.stop();
    }
}
