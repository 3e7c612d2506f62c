//! Paced queue bucket: a bounded queue drained into a sink at a fixed cadence.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::config::PacedQueueConfig;
use crate::error::{Result, SluiceError};

#[derive(Debug, Default)]
struct PacerState {
    running: bool,
    /// Bumped on every start so a loop left over from an earlier run exits.
    generation: u64,
}

#[derive(Debug)]
struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    /// Every change wakes the pacing loop, so stop and restart take effect
    /// without waiting out a sleep.
    state: watch::Sender<PacerState>,
}

impl<T> Shared<T> {
    fn is_running(&self, generation: u64) -> bool {
        let state = self.state.borrow();
        state.running && state.generation == generation
    }

    fn halt(&self) -> bool {
        self.state.send_if_modified(|state| std::mem::replace(&mut state.running, false))
    }
}

/// A bounded queue whose items are released to a sink at `rate_per_second`.
///
/// Producers never block: [`enqueue`](Self::enqueue) fails fast with
/// `QueueFull`. A single pacing task, launched by [`start`](Self::start),
/// releases at most one item per interval. Each delivery runs as its own
/// task, so a slow sink cannot stall the pacing clock.
#[derive(Debug)]
pub struct PacedQueueBucket<T> {
    shared: Arc<Shared<T>>,
    capacity: usize,
    interval: Duration,
    poll_interval: Duration,
    out: mpsc::Sender<T>,
}

impl<T: Send + 'static> PacedQueueBucket<T> {
    /// Create a stopped pacer that will deliver into `out`.
    pub fn new(out: mpsc::Sender<T>, config: PacedQueueConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(config.capacity)),
                state: watch::Sender::new(PacerState::default()),
            }),
            capacity: config.capacity,
            interval: config.interval(),
            poll_interval: config.poll_interval,
            out,
        })
    }

    /// Queue an item for paced delivery, failing immediately when full.
    pub fn enqueue(&self, item: T) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.capacity {
            debug!(capacity = self.capacity, "Paced queue is full");
            return Err(SluiceError::QueueFull);
        }
        queue.push_back(item);
        Ok(())
    }

    /// Launch the pacing loop on the current Tokio runtime.
    ///
    /// Calling `start` while already running is a no-op.
    pub fn start(&self) -> Result<()> {
        let handle = Handle::try_current()?;

        let started = self.shared.state.send_if_modified(|state| {
            if state.running {
                return false;
            }
            state.running = true;
            state.generation += 1;
            true
        });
        if !started {
            return Ok(());
        }
        let wake = self.shared.state.subscribe();
        let generation = wake.borrow().generation;

        info!(
            interval = ?self.interval,
            capacity = self.capacity,
            generation,
            "Starting pacer"
        );

        handle.spawn(pace(
            Arc::clone(&self.shared),
            self.out.clone(),
            self.interval,
            self.poll_interval,
            generation,
            wake,
        ));
        Ok(())
    }

    /// Stop the pacing loop.
    ///
    /// The loop exits as soon as it is woken; deliveries already handed to
    /// the sink are not cancelled. Items still queued stay queued.
    pub fn stop(&self) {
        if self.shared.halt() {
            info!(generation = self.shared.state.borrow().generation, "Stopping pacer");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.borrow().running
    }

    /// Number of items waiting to be released.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for PacedQueueBucket<T> {
    fn drop(&mut self) {
        self.shared.halt();
    }
}

async fn pace<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    out: mpsc::Sender<T>,
    interval: Duration,
    poll_interval: Duration,
    generation: u64,
    mut wake: watch::Receiver<PacerState>,
) {
    while shared.is_running(generation) {
        let next = shared.queue.lock().pop_front();
        let pause = match next {
            Some(item) => {
                trace!(generation, "Releasing paced item");
                let out = out.clone();
                tokio::spawn(async move {
                    if out.send(item).await.is_err() {
                        warn!("Paced sink closed, dropping item");
                    }
                });
                interval
            }
            None => poll_interval,
        };

        tokio::select! {
            changed = wake.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
    debug!(generation, "Pacer loop exited");
}
