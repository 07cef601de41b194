//! Per-direction FIFO queue with wake-up
//!
//! One [`ChannelQueue`] carries each direction of traffic: commands
//! towards the interpreter, and stdout/stderr lines away from it.
//! Producers never block; the single consumer suspends until there is
//! something to drain and then takes the whole current batch.

use async_channel::{Receiver, Sender};
use std::time::Duration;

/// Unbounded FIFO paired with a wake signal
///
/// Backed by an unbounded channel: a send is the enqueue plus the
/// signal-set, and a receive that finds the channel empty is the wait.
#[derive(Debug)]
pub struct ChannelQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> ChannelQueue<T> {
    /// Create an empty, open queue
    pub fn new() -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self { sender, receiver }
    }

    /// Append `item` and wake the consumer
    ///
    /// Returns `false` if the queue has been closed, in which case the
    /// item is dropped.
    pub fn enqueue(&self, item: T) -> bool {
        self.sender.try_send(item).is_ok()
    }

    /// Drain everything currently queued, oldest first
    pub fn try_dequeue_all(&self) -> Vec<T> {
        std::iter::from_fn(|| self.receiver.try_recv().ok()).collect()
    }

    /// Wait until items are available, then drain the current batch
    ///
    /// With a timeout, an empty batch is returned when it elapses first.
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn wait_for_items(&self, timeout: Option<Duration>) -> Option<Vec<T>> {
        let first = match timeout {
            None => self.receiver.recv().await.ok()?,
            Some(timeout) => {
                let received = async { Some(self.receiver.recv().await) };
                let expired = async {
                    smol::Timer::after(timeout).await;
                    None
                };
                match smol::future::or(received, expired).await {
                    Some(Ok(item)) => item,
                    Some(Err(_)) => return None,
                    None => return Some(Vec::new()),
                }
            }
        };

        let mut batch = vec![first];
        batch.extend(self.try_dequeue_all());
        Some(batch)
    }

    /// Stop accepting items; queued items can still be drained
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        self.sender.close()
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> Default for ChannelQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
