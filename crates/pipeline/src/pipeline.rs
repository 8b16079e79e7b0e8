//! Ingest → compute → emit streaming pipeline

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use convstream_fixed_point::FixedVector;
use convstream_model::{Frame, NetworkEvaluator};

use crate::config::{PipelineConfig, ScheduleMode};
use crate::error::{PipelineError, Result};
use crate::queue::{QueueSpec, Sequenced};

/// Shared flag that stops ingest; the run then fails with
/// [`PipelineError::Cancelled`]
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the next run proceeds
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Statistics of one completed run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    /// Frames carried end to end
    pub frames: usize,
    pub schedule: ScheduleMode,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn frames_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Three stages joined by two bounded FIFO queues.
///
/// One invocation consumes `stream_size` frames from the input buffer and
/// writes `stream_size` results into the output buffer, in frame order.
pub struct StreamingPipeline {
    evaluator: Arc<NetworkEvaluator>,
    config: PipelineConfig,
    frames: QueueSpec,
    results: QueueSpec,
    input_len: usize,
    output_len: usize,
    cancel: CancelToken,
}

impl StreamingPipeline {
    /// Build a pipeline; queue depths are checked here, not at run time
    pub fn new(evaluator: Arc<NetworkEvaluator>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let input_width = evaluator.input_width();
        let output_width = evaluator.output_width();
        let input_len = config.buffer_len(input_width)?;
        let output_len = config.buffer_len(output_width)?;
        let frames = QueueSpec {
            name: "frames",
            depth: config.ingest_depth_for(input_width)?,
            entry_size: input_width,
        };
        let results = QueueSpec {
            name: "results",
            depth: config.result_depth_for(output_width)?,
            entry_size: output_width,
        };
        let frame_capacity = frames.capacity()?;
        let result_capacity = results.capacity()?;

        tracing::info!(
            stream_size = config.stream_size,
            schedule = %config.schedule,
            frame_capacity,
            result_capacity,
            "pipeline ready"
        );

        Ok(Self {
            evaluator,
            config,
            frames,
            results,
            input_len,
            output_len,
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Arc<NetworkEvaluator> {
        &self.evaluator
    }

    /// Token that cancels runs of this pipeline
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Words of input consumed per run
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Words of output produced per run
    pub fn output_len(&self) -> usize {
        self.output_len
    }

    /// Process one stream synchronously to completion
    pub fn run(&self, input: &[i32], output: &mut [i32]) -> Result<RunStats> {
        if input.len() != self.input_len() {
            return Err(PipelineError::BufferLength {
                buffer: "input",
                expected: self.input_len(),
                got: input.len(),
            });
        }
        if output.len() != self.output_len() {
            return Err(PipelineError::BufferLength {
                buffer: "output",
                expected: self.output_len(),
                got: output.len(),
            });
        }

        let start = Instant::now();
        match self.config.schedule {
            ScheduleMode::Threaded => self.run_threaded(input, output)?,
            ScheduleMode::Sequential => self.run_sequential(input, output)?,
        }

        let stats = RunStats {
            frames: self.config.stream_size,
            schedule: self.config.schedule,
            elapsed: start.elapsed(),
        };
        tracing::debug!(frames = stats.frames, elapsed = ?stats.elapsed, "run complete");
        Ok(stats)
    }

    /// Decode one frame's words the way ingest does
    pub fn decode_frame(&self, words: &[i32]) -> Result<Frame> {
        self.config.input_encoding.decode_frame(words, &self.evaluator)
    }

    fn write_result(
        &self,
        entry: Sequenced<FixedVector>,
        expected: usize,
        output: &mut [i32],
    ) -> Result<()> {
        if entry.seq != expected {
            return Err(PipelineError::OrderViolation {
                expected,
                got: entry.seq,
            });
        }
        let width = self.evaluator.output_width();
        let encoding = self.config.output_encoding;
        let result = entry.payload;
        let slot = &mut output[expected * width..(expected + 1) * width];
        for (word, &raw) in slot.iter_mut().zip(&result.data) {
            *word = encoding.encode(raw, result.format);
        }
        Ok(())
    }

    fn ingest(&self, input: &[i32], tx: Sender<Sequenced<Frame>>) -> Result<()> {
        for (seq, words) in input.chunks_exact(self.evaluator.input_width()).enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(seq, "ingest cancelled");
                return Err(PipelineError::Cancelled);
            }
            let frame = self.decode_frame(words)?;
            tx.send(Sequenced::new(seq, frame))
                .map_err(|_| PipelineError::StageDisconnected { stage: "compute" })?;
        }
        Ok(())
    }

    fn compute(
        &self,
        rx: Receiver<Sequenced<Frame>>,
        tx: Sender<Sequenced<FixedVector>>,
    ) -> Result<()> {
        let mut processed = 0;
        for entry in rx.iter() {
            let result = entry.try_map(|frame| self.evaluator.evaluate(&frame))?;
            tx.send(result)
                .map_err(|_| PipelineError::StageDisconnected { stage: "emit" })?;
            processed += 1;
        }
        if processed != self.config.stream_size {
            return Err(PipelineError::StageDisconnected { stage: "ingest" });
        }
        Ok(())
    }

    fn emit(&self, rx: Receiver<Sequenced<FixedVector>>, output: &mut [i32]) -> Result<()> {
        for expected in 0..self.config.stream_size {
            let entry = rx
                .recv()
                .map_err(|_| PipelineError::StageDisconnected { stage: "compute" })?;
            self.write_result(entry, expected, output)?;
        }
        Ok(())
    }

    fn run_threaded(&self, input: &[i32], output: &mut [i32]) -> Result<()> {
        let (frame_tx, frame_rx) = self.frames.open::<Frame>()?;
        let (result_tx, result_rx) = self.results.open::<FixedVector>()?;

        let (ingest, compute, emit) = std::thread::scope(|s| {
            let ingest = s.spawn(move || self.ingest(input, frame_tx));
            let compute = s.spawn(move || self.compute(frame_rx, result_tx));
            let emit = self.emit(result_rx, output);
            (
                ingest
                    .join()
                    .unwrap_or(Err(PipelineError::StagePanicked { stage: "ingest" })),
                compute
                    .join()
                    .unwrap_or(Err(PipelineError::StagePanicked { stage: "compute" })),
                emit,
            )
        });

        first_cause([ingest, compute, emit])
    }

    fn run_sequential(&self, input: &[i32], output: &mut [i32]) -> Result<()> {
        let (frame_tx, frame_rx) = self.frames.open::<Frame>()?;
        let (result_tx, result_rx) = self.results.open::<FixedVector>()?;

        let n = self.config.stream_size;
        let mut chunks = input.chunks_exact(self.evaluator.input_width()).enumerate();
        let mut staged_frame: Option<Sequenced<Frame>> = None;
        let mut staged_result: Option<Sequenced<FixedVector>> = None;
        let mut emitted = 0;

        while emitted < n {
            let mut progressed = false;

            // Ingest
            if staged_frame.is_none() {
                if let Some((seq, words)) = chunks.next() {
                    if self.cancel.is_cancelled() {
                        tracing::warn!(seq, "ingest cancelled");
                        return Err(PipelineError::Cancelled);
                    }
                    staged_frame = Some(Sequenced::new(seq, self.decode_frame(words)?));
                }
            }
            if let Some(entry) = staged_frame.take() {
                match frame_tx.try_send(entry) {
                    Ok(()) => progressed = true,
                    Err(TrySendError::Full(entry)) => staged_frame = Some(entry),
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(PipelineError::StageDisconnected { stage: "compute" })
                    }
                }
            }

            // Compute
            if staged_result.is_none() {
                match frame_rx.try_recv() {
                    Ok(entry) => {
                        staged_result =
                            Some(entry.try_map(|frame| self.evaluator.evaluate(&frame))?);
                        progressed = true;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        return Err(PipelineError::StageDisconnected { stage: "ingest" })
                    }
                }
            }
            if let Some(entry) = staged_result.take() {
                match result_tx.try_send(entry) {
                    Ok(()) => progressed = true,
                    Err(TrySendError::Full(entry)) => staged_result = Some(entry),
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(PipelineError::StageDisconnected { stage: "emit" })
                    }
                }
            }

            // Emit
            match result_rx.try_recv() {
                Ok(entry) => {
                    self.write_result(entry, emitted, output)?;
                    emitted += 1;
                    progressed = true;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    return Err(PipelineError::StageDisconnected { stage: "compute" })
                }
            }

            if !progressed {
                return Err(PipelineError::StageDisconnected { stage: "ingest" });
            }
        }
        Ok(())
    }
}

/// A failing stage makes its neighbours fail with `StageDisconnected`;
/// report the stage that failed first for another reason.
fn first_cause(outcomes: [Result<()>; 3]) -> Result<()> {
    let mut fallback = None;
    for outcome in outcomes {
        match outcome {
            Ok(()) => {}
            Err(e @ PipelineError::StageDisconnected { .. }) => {
                fallback.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    fallback.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convstream_model::{NetworkConfig, NetworkWeights};

    fn evaluator() -> Arc<NetworkEvaluator> {
        let config = NetworkConfig::default();
        let weights = NetworkWeights::seeded(&config, 11).unwrap();
        Arc::new(NetworkEvaluator::new(config, weights).unwrap())
    }

    fn ramp(len: usize) -> Vec<i32> {
        (0..len).map(|i| (i as i32 * 37) % 4096 - 2048).collect()
    }

    #[test]
    fn test_buffer_length_checked() {
        let pipeline = StreamingPipeline::new(evaluator(), PipelineConfig::default()).unwrap();
        let mut output = vec![0; pipeline.output_len()];
        let err = pipeline.run(&[0; 3], &mut output).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::BufferLength { buffer: "input", expected: 320, got: 3 }
        ));

        let input = vec![0; pipeline.input_len()];
        let err = pipeline.run(&input, &mut [0; 4]).unwrap_err();
        assert!(matches!(err, PipelineError::BufferLength { buffer: "output", .. }));
    }

    #[test]
    fn test_schedules_agree() {
        let net = evaluator();
        let threaded = StreamingPipeline::new(net.clone(), PipelineConfig::default()).unwrap();
        let sequential = StreamingPipeline::new(
            net,
            PipelineConfig::default().with_schedule(ScheduleMode::Sequential),
        )
        .unwrap();

        let input = ramp(threaded.input_len());
        let mut a = vec![0; threaded.output_len()];
        let mut b = vec![0; sequential.output_len()];
        threaded.run(&input, &mut a).unwrap();
        let stats = sequential.run(&input, &mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(stats.frames, 8);
        assert_eq!(stats.schedule, ScheduleMode::Sequential);
    }

    #[test]
    fn test_single_entry_queues() {
        let config = PipelineConfig {
            ingest_depth: Some(40),
            result_depth: Some(5),
            ..PipelineConfig::default()
        };
        let reference = StreamingPipeline::new(evaluator(), PipelineConfig::default()).unwrap();
        let input = ramp(reference.input_len());
        let mut expected = vec![0; reference.output_len()];
        reference.run(&input, &mut expected).unwrap();

        for schedule in [ScheduleMode::Threaded, ScheduleMode::Sequential] {
            let pipeline =
                StreamingPipeline::new(evaluator(), config.clone().with_schedule(schedule)).unwrap();
            let mut output = vec![0; pipeline.output_len()];
            pipeline.run(&input, &mut output).unwrap();
            assert_eq!(output, expected);
        }
    }

    #[test]
    fn test_cancel_and_reset() {
        let pipeline = StreamingPipeline::new(evaluator(), PipelineConfig::default()).unwrap();
        let token = pipeline.cancel_token();
        let input = vec![0; pipeline.input_len()];
        let mut output = vec![0; pipeline.output_len()];

        token.cancel();
        assert!(matches!(pipeline.run(&input, &mut output), Err(PipelineError::Cancelled)));
        token.reset();
        pipeline.run(&input, &mut output).unwrap();
    }

    #[test]
    fn test_decoded_frame_traces_to_output() {
        let config = PipelineConfig {
            input_encoding: crate::wire::WireEncoding::Integer,
            ..PipelineConfig::default()
        };
        let pipeline = StreamingPipeline::new(evaluator(), config).unwrap();
        let input = crate::driver::synthetic_event_input(0, pipeline.input_len());
        let mut output = vec![0; pipeline.output_len()];
        pipeline.run(&input, &mut output).unwrap();

        let width = pipeline.evaluator().input_width();
        let frame = pipeline.decode_frame(&input[..width]).unwrap();
        let stages = pipeline.evaluator().trace(&frame).unwrap();
        let last = stages.last().unwrap();
        assert_eq!(last.raw, output[..pipeline.evaluator().output_width()]);

        // Interpreting integer words as raw gives a different frame
        let raw_frame = pipeline.evaluator().frame(input[..width].to_vec()).unwrap();
        assert_ne!(raw_frame.data, frame.data);
    }

    #[test]
    fn test_stream_size_overflow_is_config_error() {
        let config = PipelineConfig::default().with_stream_size(usize::MAX);
        assert!(matches!(
            StreamingPipeline::new(evaluator(), config),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_first_cause() {
        let disconnected = || Err(PipelineError::StageDisconnected { stage: "emit" });
        let out = first_cause([disconnected(), Err(PipelineError::Cancelled), Ok(())]);
        assert!(matches!(out, Err(PipelineError::Cancelled)));
        let out = first_cause([Ok(()), disconnected(), Ok(())]);
        assert!(matches!(out, Err(PipelineError::StageDisconnected { .. })));
        assert!(first_cause([Ok(()), Ok(()), Ok(())]).is_ok());
    }
}
