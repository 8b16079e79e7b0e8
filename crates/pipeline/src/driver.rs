//! Host-side event loop

use crate::error::Result;
use crate::session::AcceleratorSession;

/// Input word `j` of event `event` in the reference host test data:
/// `trunc(12.34 × (j + len × (event + 1)))`
pub fn synthetic_event_input(event: usize, len: usize) -> Vec<i32> {
    let offset = len * (event + 1);
    (0..len)
        .map(|j| (12.34 * (j + offset) as f64) as i32)
        .collect()
}

/// Drives a session over a sequence of events with reusable buffers
pub struct HostDriver<S> {
    session: S,
    input: Vec<i32>,
    output: Vec<i32>,
}

impl<S: AcceleratorSession> HostDriver<S> {
    pub fn new(session: S) -> Self {
        let input = vec![0; session.input_len()];
        let output = vec![0; session.output_len()];
        Self {
            session,
            input,
            output,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// For each event: fill the input, zero the output, execute, and hand
    /// the output to `sink`. Stops at the first failing event.
    pub fn run<F, K>(&mut self, nevents: usize, mut fill: F, mut sink: K) -> Result<()>
    where
        F: FnMut(usize, &mut [i32]),
        K: FnMut(usize, &[i32]),
    {
        for event in 0..nevents {
            fill(event, &mut self.input);
            self.output.iter_mut().for_each(|w| *w = 0);
            self.session.execute(&self.input, &mut self.output)?;
            sink(event, &self.output);
            tracing::debug!(event, "event complete");
        }
        Ok(())
    }
}
