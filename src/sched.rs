//! Priority scheduler: weighted round robin over the four channels.
//!
//! Each priority has an integer weight and a credit counter. A selection
//! pass scans the channels in fixed order and pops from the first one that
//! still has credit and a visible message; popping spends one credit, while
//! an empty channel is skipped without spending its turn. When every credit
//! is spent (or every credited channel is empty) the window resets to the
//! configured weights. Over a full window each non-empty channel is served
//! in proportion to its weight, so low priorities cannot starve.

use crate::config::Weights;
use crate::error::Result;
use crate::queue::{Priority, Queue, QueueEntry};
use parking_lot::Mutex;
use std::sync::Arc;

struct CreditWindow {
    immediate: u32,
    soon: u32,
    normal: u32,
    later: u32,
}

impl CreditWindow {
    fn from_weights(weights: &Weights) -> Self {
        Self {
            immediate: weights.immediate,
            soon: weights.soon,
            normal: weights.normal,
            later: weights.later,
        }
    }

    fn get(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Immediate => self.immediate,
            Priority::Soon => self.soon,
            Priority::Normal => self.normal,
            Priority::Later => self.later,
        }
    }

    fn spend(&mut self, priority: Priority) {
        let slot = match priority {
            Priority::Immediate => &mut self.immediate,
            Priority::Soon => &mut self.soon,
            Priority::Normal => &mut self.normal,
            Priority::Later => &mut self.later,
        };
        *slot = slot.saturating_sub(1);
    }

    fn refund(&mut self, priority: Priority, weights: &Weights) {
        let (slot, cap) = match priority {
            Priority::Immediate => (&mut self.immediate, weights.immediate),
            Priority::Soon => (&mut self.soon, weights.soon),
            Priority::Normal => (&mut self.normal, weights.normal),
            Priority::Later => (&mut self.later, weights.later),
        };
        *slot = (*slot + 1).min(cap);
    }
}

/// Weighted-round-robin selection over one queue backend's four channels.
///
/// Safe to call from many workers at once; the credit window is the only
/// shared state and sits behind its own small lock, never held across a
/// backend call.
pub struct PriorityScheduler {
    queue: Arc<dyn Queue>,
    weights: Weights,
    credits: Mutex<CreditWindow>,
}

impl PriorityScheduler {
    pub fn new(queue: Arc<dyn Queue>, weights: Weights) -> Self {
        let credits = Mutex::new(CreditWindow::from_weights(&weights));
        Self {
            queue,
            weights,
            credits,
        }
    }

    /// Pop the next entry according to the weighted rotation. Returns None
    /// when every channel is empty; callers wait for work and try again.
    pub async fn next(&self) -> Result<Option<QueueEntry>> {
        // Two passes: the current credit window first, then a fresh one so
        // channels whose credit was already spent still get served when the
        // credited ones turn out empty. A credit is reserved before the pop
        // and refunded if the channel was empty, so an empty channel never
        // loses its turn to a concurrent selector.
        for pass in 0..2 {
            let mut seen_empty = [false; Priority::ALL.len()];
            loop {
                let reserved = {
                    let mut credits = self.credits.lock();
                    let pick = Priority::ALL
                        .into_iter()
                        .enumerate()
                        .find(|(idx, p)| !seen_empty[*idx] && credits.get(*p) > 0);
                    if let Some((_, priority)) = pick {
                        credits.spend(priority);
                    }
                    pick
                };
                let Some((idx, priority)) = reserved else {
                    break;
                };
                match self.queue.pop(priority).await? {
                    Some(entry) => return Ok(Some(entry)),
                    None => {
                        self.credits.lock().refund(priority, &self.weights);
                        seen_empty[idx] = true;
                    }
                }
            }
            if pass == 0 {
                let mut credits = self.credits.lock();
                *credits = CreditWindow::from_weights(&self.weights);
            }
        }
        Ok(None)
    }

    /// Block until the backend signals new work or `timeout` elapses.
    pub async fn wait_for_work(&self, timeout: std::time::Duration) {
        self.queue.wait_for_work(timeout).await;
    }
}
