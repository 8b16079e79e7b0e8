//! Bounded FIFO queues between stages

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{PipelineError, Result};

/// A queue entry tagged with its frame index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced<T> {
    pub seq: usize,
    pub payload: T,
}

impl<T> Sequenced<T> {
    pub fn new(seq: usize, payload: T) -> Self {
        Self { seq, payload }
    }

    /// Replace the payload through a fallible step, keeping the sequence number
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> std::result::Result<U, E>) -> std::result::Result<Sequenced<U>, E> {
        Ok(Sequenced {
            seq: self.seq,
            payload: f(self.payload)?,
        })
    }
}

/// Capacity of a queue whose depth is counted in elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: &'static str,
    /// Depth in elements
    pub depth: usize,
    /// Elements per entry
    pub entry_size: usize,
}

impl QueueSpec {
    /// Whole entries the queue holds; fails when not even one fits
    pub fn capacity(&self) -> Result<usize> {
        if self.entry_size == 0 || self.depth < self.entry_size {
            return Err(PipelineError::QueueCapacityExceeded {
                queue: self.name,
                depth: self.depth,
                required: self.entry_size,
            });
        }
        Ok(self.depth / self.entry_size)
    }

    /// Open a fresh channel pair sized to this spec
    pub fn open<T>(&self) -> Result<(Sender<Sequenced<T>>, Receiver<Sequenced<T>>)> {
        Ok(bounded(self.capacity()?))
    }
}
