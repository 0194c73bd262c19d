// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Host-side countdown mirroring the peripheral's timed action.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

/// Tick period.
const TICK: Duration = Duration::from_secs(1);

/// Events emitted by the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// One second elapsed; `remaining` seconds left.
    Tick { remaining: u32 },
    /// Countdown reached zero.
    Finished,
}

/// Format seconds as `MM:SS`.
pub fn format_remaining(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[derive(Debug, Default)]
struct Inner {
    remaining: u32,
    running: bool,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// A cancelable one-second countdown. At most one instance runs at a time.
///
/// Events are sent while the internal lock is held, and `cancel()` bumps the
/// generation under the same lock, so nothing from a cancelled run is
/// delivered after `cancel()` returns.
pub struct Countdown<E> {
    inner: Arc<Mutex<Inner>>,
    event_tx: mpsc::UnboundedSender<E>,
}

impl<E> Countdown<E>
where
    E: From<CountdownEvent> + Send + 'static,
{
    /// Create an idle countdown. Must be armed from within a tokio runtime.
    pub fn new(event_tx: mpsc::UnboundedSender<E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            event_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn remaining(&self) -> u32 {
        self.inner.lock().remaining
    }

    /// Start counting down from `seconds`.
    ///
    /// Returns `false` without touching the running countdown if one is
    /// already active.
    pub fn arm(&self, seconds: u32) -> bool {
        let mut inner = self.inner.lock();
        if inner.running {
            debug!("Countdown already running ({}s left), ignoring arm", inner.remaining);
            return false;
        }

        inner.generation += 1;
        if seconds == 0 {
            inner.remaining = 0;
            let _ = self.event_tx.send(CountdownEvent::Finished.into());
            return true;
        }

        info!("Countdown started: {}", format_remaining(seconds));
        inner.remaining = seconds;
        inner.running = true;

        let generation = inner.generation;
        let state = self.inner.clone();
        let event_tx = self.event_tx.clone();
        inner.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            loop {
                ticker.tick().await;

                let mut inner = state.lock();
                if inner.generation != generation || !inner.running {
                    break;
                }
                inner.remaining -= 1;
                let _ = event_tx.send(
                    CountdownEvent::Tick {
                        remaining: inner.remaining,
                    }
                    .into(),
                );
                if inner.remaining == 0 {
                    inner.running = false;
                    inner.task = None;
                    let _ = event_tx.send(CountdownEvent::Finished.into());
                    info!("Countdown finished");
                    break;
                }
            }
        }));
        true
    }

    /// Stop the countdown immediately and reset it to zero.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }
        inner.generation += 1;
        inner.running = false;
        inner.remaining = 0;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        info!("Countdown cancelled");
    }
}

impl<E> Drop for Countdown<E> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.running = false;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<CountdownEvent>) -> Vec<CountdownEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(20 * 60), "20:00");
        assert_eq!(format_remaining(61), "01:01");
        assert_eq!(format_remaining(0), "00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_down_to_finished() {
        let (tx, mut rx) = mpsc::unbounded_channel::<CountdownEvent>();
        let countdown = Countdown::new(tx);
        assert!(countdown.arm(5));
        assert!(countdown.is_running());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
            if event == CountdownEvent::Finished {
                break;
            }
        }

        let expected: Vec<CountdownEvent> = (0..5)
            .rev()
            .map(|remaining| CountdownEvent::Tick { remaining })
            .chain(std::iter::once(CountdownEvent::Finished))
            .collect();
        assert_eq!(events, expected);
        assert!(!countdown.is_running());
        assert_eq!(countdown.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_third_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel::<CountdownEvent>();
        let countdown = Countdown::new(tx);
        countdown.arm(5);

        for expected in [4, 3, 2] {
            assert_eq!(
                rx.recv().await,
                Some(CountdownEvent::Tick {
                    remaining: expected
                })
            );
        }
        countdown.cancel();
        assert!(!countdown.is_running());
        assert_eq!(countdown.remaining(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_while_running_is_noop() {
        let (tx, mut rx) = mpsc::unbounded_channel::<CountdownEvent>();
        let countdown = Countdown::new(tx);
        assert!(countdown.arm(10));
        assert_eq!(rx.recv().await, Some(CountdownEvent::Tick { remaining: 9 }));

        assert!(!countdown.arm(100));
        assert_eq!(countdown.remaining(), 9);
        assert_eq!(rx.recv().await, Some(CountdownEvent::Tick { remaining: 8 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel::<CountdownEvent>();
        let countdown = Countdown::new(tx);
        countdown.arm(1);
        assert_eq!(rx.recv().await, Some(CountdownEvent::Tick { remaining: 0 }));
        assert_eq!(rx.recv().await, Some(CountdownEvent::Finished));

        assert!(countdown.arm(2));
        assert_eq!(rx.recv().await, Some(CountdownEvent::Tick { remaining: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_when_idle() {
        let (tx, mut rx) = mpsc::unbounded_channel::<CountdownEvent>();
        let countdown = Countdown::new(tx);
        countdown.cancel();
        assert!(!countdown.is_running());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_zero_finishes_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel::<CountdownEvent>();
        let countdown = Countdown::new(tx);
        assert!(countdown.arm(0));
        assert!(!countdown.is_running());
        assert_eq!(drain(&mut rx), vec![CountdownEvent::Finished]);
    }
}
