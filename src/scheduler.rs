//! Timers.
//!
//! The orchestrator never sleeps. It asks a [`Scheduler`] to deliver a
//! [`TimerEvent`] after a delay and handles the event when it comes back.
//! Handlers re-check state when an event arrives; an event whose session
//! has moved on is dropped silently.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::trace;

use crate::ble::DeviceType;

/// Delayed work the orchestrator schedules for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// End the transient "completed" pulse of a device type.
    ClearCompleted {
        /// Device whose pulse ends.
        device_type: DeviceType,
        /// Pulse the timer belongs to.
        pulse: u64,
    },
    /// Re-arm the jump-rope MAC latch.
    ReleaseMacLatch,
    /// Recording start settle delay elapsed.
    RecordingSettle {
        /// Recording device.
        device_type: DeviceType,
        /// Recording session the timer belongs to.
        session: u64,
    },
    /// Take one sample.
    SampleTick {
        /// Recording device.
        device_type: DeviceType,
        /// Recording session the timer belongs to.
        session: u64,
    },
    /// A connection attempt ran out of time.
    ConnectTimeout {
        /// Device being connected.
        device_type: DeviceType,
        /// Attempt the timer belongs to.
        attempt: u64,
    },
}

/// Clock and timer source.
pub trait Scheduler: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;

    /// Deliver `event` after `delay`.
    fn schedule(&self, delay: Duration, event: TimerEvent);
}

/// Wall-clock scheduler delivering events on a tokio channel.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<TimerEvent>,
    runtime: Handle,
}

impl TokioScheduler {
    /// Create a scheduler sending due events on `tx`. Must be called from a
    /// tokio runtime.
    pub fn new(tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self {
            tx,
            runtime: Handle::current(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule(&self, delay: Duration, event: TimerEvent) {
        let tx = self.tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
    }
}

#[derive(Debug)]
struct Pending {
    due: DateTime<Utc>,
    seq: u64,
    event: TimerEvent,
}

#[derive(Debug)]
struct VirtualState {
    now: DateTime<Utc>,
    next_seq: u64,
    pending: Vec<Pending>,
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug)]
pub struct VirtualScheduler {
    state: Mutex<VirtualState>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

fn add(time: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl VirtualScheduler {
    /// Create a clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(VirtualState {
                now: start,
                next_seq: 0,
                pending: Vec::new(),
            }),
        }
    }

    /// Number of scheduled events not yet delivered.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Advance the clock by `by`, handing every event that falls due to
    /// `handler` in due order. The clock reads each event's due time while
    /// its handler runs. Events scheduled by the handler fire in the same
    /// call if they fall due before the end of the window.
    pub fn advance(&self, by: Duration, mut handler: impl FnMut(TimerEvent)) {
        let end = add(self.state.lock().now, by);

        while let Some(event) = self.pop_due(end) {
            trace!("Virtual timer fired: {:?}", event);
            handler(event);
        }

        let mut state = self.state.lock();
        if state.now < end {
            state.now = end;
        }
    }

    fn pop_due(&self, end: DateTime<Utc>) -> Option<TimerEvent> {
        let mut state = self.state.lock();
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= end)
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        let pending = state.pending.swap_remove(index);
        if state.now < pending.due {
            state.now = pending.due;
        }
        Some(pending.event)
    }
}

impl Scheduler for VirtualScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, event: TimerEvent) {
        let mut state = self.state.lock();
        let due = add(state.now, delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Pending { due, seq, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clear(device_type: DeviceType) -> TimerEvent {
        TimerEvent::ClearCompleted {
            device_type,
            pulse: 1,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_virtual_fires_in_due_order() {
        let scheduler = VirtualScheduler::new(start());
        scheduler.schedule(Duration::from_secs(2), TimerEvent::ReleaseMacLatch);
        scheduler.schedule(Duration::from_millis(300), clear(DeviceType::Thermometer));
        scheduler.schedule(Duration::from_secs(5), clear(DeviceType::Scale));

        let mut fired = Vec::new();
        scheduler.advance(Duration::from_secs(3), |event| {
            fired.push((event, scheduler.now()));
        });

        assert_eq!(
            fired,
            vec![
                (clear(DeviceType::Thermometer), start() + chrono::Duration::milliseconds(300)),
                (TimerEvent::ReleaseMacLatch, start() + chrono::Duration::seconds(2)),
            ]
        );
        assert_eq!(scheduler.now(), start() + chrono::Duration::seconds(3));
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_virtual_handler_can_reschedule() {
        let scheduler = VirtualScheduler::new(start());
        let tick = TimerEvent::SampleTick {
            device_type: DeviceType::HeartRateBelt,
            session: 1,
        };
        scheduler.schedule(Duration::from_secs(1), tick);

        let mut count = 0;
        scheduler.advance(Duration::from_secs(5), |event| {
            count += 1;
            scheduler.schedule(Duration::from_secs(1), event);
        });

        assert_eq!(count, 5);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_same_due_time_keeps_schedule_order() {
        let scheduler = VirtualScheduler::new(start());
        scheduler.schedule(Duration::from_secs(1), TimerEvent::ReleaseMacLatch);
        scheduler.schedule(Duration::from_secs(1), clear(DeviceType::Scale));

        let mut fired = Vec::new();
        scheduler.advance(Duration::from_secs(1), |event| fired.push(event));
        assert_eq!(fired, vec![TimerEvent::ReleaseMacLatch, clear(DeviceType::Scale)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_delivers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx);
        scheduler.schedule(Duration::from_secs(2), TimerEvent::ReleaseMacLatch);

        let event = rx.recv().await;
        assert_eq!(event, Some(TimerEvent::ReleaseMacLatch));
    }
}
