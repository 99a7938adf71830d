//! Timers: one-shot channels, delayed calls and tickers
//!
//! All of them are driven by the scheduler's timer thread, which is started
//! on first use. Delayed calls run as ordinary scheduler tasks.

use crate::chan::Channel;
use crate::scheduler::timer::TimerAction;
use crate::scheduler::{Scheduler, Shared};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Closes the wrapped channel when dropped, whether the timer fired or its
/// entry was discarded by a shutdown.
struct CloseOnDrop(Channel<Instant>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let _ = self.0.close();
    }
}

/// Handle to a call scheduled with [`Scheduler::after_func`]
#[derive(Debug, Clone)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    /// Prevent the call; returns true only if it had not fired yet
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the call has been handed to the scheduler
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

/// Periodic tick source.
///
/// The channel holds at most one tick; a receiver that falls behind skips
/// ticks instead of accumulating them.
pub struct Ticker {
    channel: Channel<Instant>,
    stopped: Arc<AtomicBool>,
    period: Duration,
}

impl Ticker {
    /// Tick every `period` on the global scheduler's timer.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn new(period: Duration) -> Self {
        Scheduler::global().ticker(period)
    }

    /// Block for the next tick; None once stopped
    pub fn recv(&self) -> Option<Instant> {
        self.channel.recv()
    }

    /// Iterate over ticks until the ticker is stopped
    pub fn ticks(&self) -> crate::chan::Iter<'_, Instant> {
        self.channel.iter()
    }

    /// Stop ticking and close the channel. A tick already buffered can
    /// still be received.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.channel.close();
        }
    }

    /// The tick channel, e.g. for use in a [`Select`](crate::Select)
    pub fn channel(&self) -> &Channel<Instant> {
        &self.channel
    }

    /// Interval between ticks
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("period", &self.period)
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish()
    }
}

impl Scheduler {
    /// Channel that receives the current time once after `delay`, then closes.
    ///
    /// On a shut-down scheduler the channel is returned already closed.
    pub fn after(&self, delay: Duration) -> Channel<Instant> {
        let channel = Channel::bounded(1);
        let Some(timer) = self.shared().timer() else {
            let _ = channel.close();
            return channel;
        };

        let sink = CloseOnDrop(channel.clone());
        timer.schedule(
            Instant::now() + delay,
            TimerAction::Once(Box::new(move || {
                let _ = sink.0.try_send(Instant::now());
            })),
        );
        channel
    }

    /// Run `f` as a task after `delay` unless cancelled first.
    ///
    /// On a bounded scheduler that is full when the delay expires, the call
    /// is admitted past the cap rather than delaying other timers.
    pub fn after_func<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TimerHandle {
            state: Arc::new(AtomicU8::new(PENDING)),
        };
        let Some(timer) = self.shared().timer() else {
            log::warn!("after_func on a shut-down scheduler is never called");
            handle.state.store(CANCELLED, Ordering::Release);
            return handle;
        };

        let state = handle.state.clone();
        let shared: Weak<Shared> = Arc::downgrade(self.shared());
        timer.schedule(
            Instant::now() + delay,
            TimerAction::Once(Box::new(move || {
                if state
                    .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                // The timer thread must not wait for admission.
                if let Err(err) = shared.spawn_task_nonblocking(f) {
                    log::warn!("delayed call dropped: {}", err);
                }
            })),
        );
        handle
    }

    /// Ticker driven by this scheduler's timer.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn ticker(&self, period: Duration) -> Ticker {
        assert!(!period.is_zero(), "ticker period must be non-zero");

        let ticker = Ticker {
            channel: Channel::bounded(1),
            stopped: Arc::new(AtomicBool::new(false)),
            period,
        };
        let Some(timer) = self.shared().timer() else {
            ticker.stop();
            return ticker;
        };

        let sink = CloseOnDrop(ticker.channel.clone());
        let stopped = ticker.stopped.clone();
        timer.schedule(
            Instant::now() + period,
            TimerAction::Repeat {
                period,
                tick: Box::new(move || {
                    if stopped.load(Ordering::Acquire) {
                        return false;
                    }
                    // Full means the receiver has not taken the last tick.
                    let _ = sink.0.try_send(Instant::now());
                    true
                }),
            },
        );
        ticker
    }
}

/// [`Scheduler::after`] on the global scheduler
pub fn after(delay: Duration) -> Channel<Instant> {
    Scheduler::global().after(delay)
}

/// [`Scheduler::after_func`] on the global scheduler
pub fn after_func<F>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    Scheduler::global().after_func(delay, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_after_delivers_once_then_closes() {
        let scheduler = Scheduler::new(1);
        let start = Instant::now();
        let channel = scheduler.after(Duration::from_millis(20));

        let fired = channel.recv().unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(20));
        assert_eq!(channel.recv(), None);
        assert!(channel.is_closed());
    }

    #[test]
    fn test_after_on_shut_down_scheduler_is_closed() {
        let scheduler = Scheduler::new(1);
        scheduler.shutdown();
        let channel = scheduler.after(Duration::from_millis(1));
        assert!(channel.is_closed());
        assert_eq!(channel.recv(), None);
    }

    #[test]
    fn test_shutdown_closes_pending_after() {
        let scheduler = Scheduler::new(1);
        let channel = scheduler.after(Duration::from_secs(60));
        scheduler.shutdown();
        assert_eq!(channel.recv(), None);
    }

    #[test]
    fn test_after_func_runs_on_worker() {
        let scheduler = Scheduler::new(2);
        let done = Channel::bounded(1);
        let tx = done.clone();
        let worker_check = scheduler.clone();
        let handle = scheduler.after_func(Duration::from_millis(5), move || {
            let _ = tx.send(worker_check.is_worker_thread());
        });

        assert_eq!(done.recv(), Some(true));
        assert!(handle.has_fired());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_after_func_cancel_prevents_call() {
        let scheduler = Scheduler::new(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = scheduler.after_func(Duration::from_millis(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.cancel());
        assert!(!handle.cancel());
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!handle.has_fired());
    }

    #[test]
    fn test_after_fires_while_bounded_scheduler_is_full() {
        let config = crate::SchedulerConfig::new(1).with_max_pending(1);
        let scheduler = Scheduler::with_config(config).unwrap();
        let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
        let release = Channel::<()>::new(0);
        let rx = release.clone();
        let blocker = scheduler.spawn(move || {
            started_tx.send(()).ok();
            rx.recv();
        });
        started_rx.recv().unwrap();

        let done = Channel::bounded(1);
        let tx = done.clone();
        let handle = scheduler.after_func(Duration::from_millis(5), move || {
            let _ = tx.send("delayed");
        });
        let later = scheduler.after(Duration::from_millis(10));
        assert!(later.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(handle.has_fired());

        release.close().unwrap();
        blocker.join().unwrap();
        assert_eq!(done.recv_timeout(Duration::from_secs(2)), Ok("delayed"));
    }

    #[test]
    fn test_ticker_ticks_until_stopped() {
        let scheduler = Scheduler::new(1);
        let ticker = scheduler.ticker(Duration::from_millis(5));
        let mut last = Instant::now();
        for _ in 0..3 {
            let tick = ticker.recv().unwrap();
            assert!(tick >= last);
            last = tick;
        }
        ticker.stop();
        // At most one buffered tick remains.
        assert!(ticker.ticks().count() <= 1);
        assert_eq!(ticker.recv(), None);
    }

    #[test]
    fn test_slow_receiver_skips_ticks() {
        let scheduler = Scheduler::new(1);
        let ticker = scheduler.ticker(Duration::from_millis(2));
        std::thread::sleep(Duration::from_millis(40));
        assert!(ticker.channel().len() <= 1);
        ticker.stop();
    }

    #[test]
    #[should_panic(expected = "ticker period must be non-zero")]
    fn test_zero_period_panics() {
        let _ = Ticker::new(Duration::ZERO);
    }
}
