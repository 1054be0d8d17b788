use crate::engine::{EngineError, EngineHandle};
use doorbell_core::{EventType, Intent};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Single-slot busy flag. A sample that finds it taken is dropped, never
/// queued.
#[derive(Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

/// Clears the flag on drop.
pub struct BusyGuard(Arc<AtomicBool>);

impl BusyFlag {
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        if self.0.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(BusyGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Something that can run a side-effect-free preview recognition.
pub trait PreviewSource: Clone + Send + Sync + 'static {
    /// True once previews can no longer be served.
    fn is_closed(&self) -> bool;

    fn preview(&self) -> impl Future<Output = Result<EventType, EngineError>> + Send;
}

impl PreviewSource for EngineHandle {
    fn is_closed(&self) -> bool {
        EngineHandle::is_closed(self)
    }

    fn preview(&self) -> impl Future<Output = Result<EventType, EngineError>> + Send {
        let engine = self.clone();
        async move {
            engine
                .recognize(Intent::preview())
                .await
                .map(|result| result.event_type)
        }
    }
}

/// Run previews every `interval` until the source closes. At most one
/// preview is in flight; ticks that land while one runs are dropped.
pub fn spawn_sampler<S: PreviewSource>(
    engine: S,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let busy = BusyFlag::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_ms = interval.as_millis() as u64, "preview sampler started");

        while !engine.is_closed() {
            ticker.tick().await;
            let Some(guard) = busy.try_acquire() else {
                tracing::trace!("previous sample still running; skipping tick");
                continue;
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _guard = guard;
                match engine.preview().await {
                    Ok(event) => tracing::trace!(event = %event, "preview sample"),
                    Err(e) => tracing::debug!(error = %e, "preview sample failed"),
                }
            });
        }
        tracing::info!("preview sampler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_second_acquire_dropped_while_busy() {
        let flag = BusyFlag::default();
        let guard = flag.try_acquire();
        assert!(guard.is_some());
        assert!(flag.is_busy());
        assert!(flag.try_acquire().is_none());
        drop(guard);
        assert!(!flag.is_busy());
        assert!(flag.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = BusyFlag::default();
        let other = flag.clone();
        let _guard = flag.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
    }

    /// Preview that takes `latency` and tracks how many run at once.
    #[derive(Clone, Default)]
    struct SlowSource {
        latency: Duration,
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl PreviewSource for SlowSource {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn preview(&self) -> impl Future<Output = Result<EventType, EngineError>> + Send {
            let this = self.clone();
            async move {
                this.calls.fetch_add(1, Ordering::SeqCst);
                let now = this.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                this.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(this.latency).await;
                this.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(EventType::NoFace)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_previews_never_overlap() {
        let source = SlowSource {
            latency: Duration::from_millis(250),
            ..Default::default()
        };
        let handle = spawn_sampler(source.clone(), Duration::from_millis(100));

        // Ten ticks elapse; each preview spans two and a half of them.
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let calls = source.calls.load(Ordering::SeqCst);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!((3..=4).contains(&calls), "unexpected preview count {calls}");

        source.closed.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler should stop once the source closes")
            .unwrap();
    }
}
