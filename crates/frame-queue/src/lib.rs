//! Bounded single-producer single-consumer frame queue.
//!
//! One queue decouples a connection's transport read loop from the task
//! consuming its frames. `put` suspends while the queue is full, so a slow
//! consumer exerts backpressure on the producer instead of dropping frames
//! or buffering without bound. Dropping either half is the close signal:
//! a consumer parked on `get` wakes promptly once the producer is gone.

use thiserror::Error;
use tokio::sync::mpsc;

/// The other half of the queue was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("frame queue closed")]
pub struct QueueClosed;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryGetError {
    /// Nothing buffered right now; the queue is still open.
    #[error("frame queue empty")]
    Empty,
    /// Producer dropped and every buffered frame has been drained.
    #[error("frame queue closed")]
    Closed,
}

/// Create a queue holding at most `capacity` frames.
pub fn bounded<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Producer half, held by the transport read loop.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> QueueProducer<T> {
    /// Append a frame in arrival order. Suspends while the queue is full;
    /// never drops.
    pub async fn put(&self, frame: T) -> Result<(), QueueClosed> {
        self.tx.send(frame).await.map_err(|_| QueueClosed)
    }

    /// Frames currently buffered but not yet consumed.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer half, held by the engine task. Exactly one per connection.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueConsumer<T> {
    /// Take the oldest frame, suspending until one arrives. Fails only
    /// after the producer dropped and the queue drained.
    pub async fn get(&mut self) -> Result<T, QueueClosed> {
        self.rx.recv().await.ok_or(QueueClosed)
    }

    /// Non-suspending variant for polling consumers.
    pub fn get_nowait(&mut self) -> Result<T, TryGetError> {
        self.rx.try_recv().map_err(|err| match err {
            mpsc::error::TryRecvError::Empty => TryGetError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryGetError::Closed,
        })
    }
}
