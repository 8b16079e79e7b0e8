//! convstream Integration Tests
//!
//! End-to-end runs of the network through the streaming pipeline, the
//! software session and the host driver.

use std::sync::Arc;

use convstream_fixed_point::{FixedVector, OverflowMode};
use convstream_model::{Frame, NetworkConfig, NetworkEvaluator, NetworkWeights};
use convstream_pipeline::{
    synthetic_event_input, AcceleratorSession, HostDriver, PipelineConfig, PipelineError,
    ScheduleMode, SoftwareSession, StreamingPipeline, WireEncoding,
};

fn evaluator_with(config: NetworkConfig, seed: u64) -> Arc<NetworkEvaluator> {
    let weights = NetworkWeights::seeded(&config, seed).unwrap();
    Arc::new(NetworkEvaluator::new(config, weights).unwrap())
}

fn evaluator() -> Arc<NetworkEvaluator> {
    evaluator_with(NetworkConfig::default(), 2024)
}

fn pipeline(config: PipelineConfig) -> StreamingPipeline {
    StreamingPipeline::new(evaluator(), config).unwrap()
}

/// Distinct raw words per frame so reordering would be visible
fn varied_input(len: usize) -> Vec<i32> {
    (0..len)
        .map(|i| ((i as i64 * 7919) % 16_384 - 8_192) as i32)
        .collect()
}

fn run(pipeline: &StreamingPipeline, input: &[i32]) -> Vec<i32> {
    let mut output = vec![0; pipeline.output_len()];
    pipeline.run(input, &mut output).unwrap();
    output
}

fn frames_of(net: &NetworkEvaluator, input: &[i32]) -> Vec<Frame> {
    input
        .chunks_exact(net.input_width())
        .map(|words| net.frame(words.to_vec()).unwrap())
        .collect()
}

// =============================================================================
// Section 1: End-to-End
// =============================================================================

mod end_to_end_tests {
    use super::*;

    /// Eight all-zero frames produce bias-driven, identical, normalized scores
    #[test]
    fn test_all_zero_stream() {
        let pipeline = pipeline(PipelineConfig::default());
        assert_eq!(pipeline.input_len(), 8 * 40);
        assert_eq!(pipeline.output_len(), 8 * 5);

        let input = vec![0; pipeline.input_len()];
        let first = run(&pipeline, &input);
        let second = run(&pipeline, &input);
        assert_eq!(first, second);
        assert!(first.iter().any(|&w| w != 0));

        let format = pipeline.evaluator().result_format();
        for scores in first.chunks_exact(5) {
            assert_eq!(scores, &first[..5]);
            let v = FixedVector { data: scores.to_vec(), format };
            assert!(v.data.iter().all(|&x| x >= 0));
            assert!(v.sum_f64() <= 1.0 && v.sum_f64() > 1.0 - 5.0 * format.ulp());
        }
    }

    /// Separately built pipelines with the same seed agree bit for bit
    #[test]
    fn test_determinism_across_instances() {
        let input = varied_input(8 * 40);
        let a = run(&pipeline(PipelineConfig::default()), &input);
        let b = run(&pipeline(PipelineConfig::default()), &input);
        assert_eq!(a, b);
    }

    /// Different weights give different scores
    #[test]
    fn test_seed_changes_output() {
        let input = varied_input(8 * 40);
        let a = run(&pipeline(PipelineConfig::default()), &input);
        let other = StreamingPipeline::new(
            evaluator_with(NetworkConfig::default(), 7),
            PipelineConfig::default(),
        )
        .unwrap();
        assert_ne!(a, run(&other, &input));
    }
}

// =============================================================================
// Section 2: Ordering & Liveness
// =============================================================================

mod ordering_tests {
    use super::*;

    /// Every output slot holds the score of the frame at the same index
    #[test]
    fn test_frame_order_preserved() {
        for stream_size in [1, 2, 3, 8, 17] {
            for schedule in [ScheduleMode::Threaded, ScheduleMode::Sequential] {
                let config = PipelineConfig::default()
                    .with_stream_size(stream_size)
                    .with_schedule(schedule);
                let pipeline = pipeline(config);
                let input = varied_input(pipeline.input_len());
                let output = run(&pipeline, &input);

                let net = pipeline.evaluator();
                for (i, frame) in frames_of(net, &input).iter().enumerate() {
                    let expected = net.evaluate(frame).unwrap();
                    assert_eq!(
                        &output[i * 5..(i + 1) * 5],
                        expected.data.as_slice(),
                        "frame {} of {} ({})",
                        i,
                        stream_size,
                        schedule
                    );
                }
            }
        }
    }

    /// The output buffer is overwritten completely on each run
    #[test]
    fn test_every_slot_written() {
        let pipeline = pipeline(PipelineConfig::default().with_stream_size(4));
        let input = vec![0; pipeline.input_len()];
        let mut output = vec![i32::MIN; pipeline.output_len()];
        pipeline.run(&input, &mut output).unwrap();
        assert!(output.iter().all(|&w| w != i32::MIN));
    }

    /// Long streams through one-entry queues complete without stalling
    #[test]
    fn test_liveness_with_minimal_queues() {
        let config = PipelineConfig {
            stream_size: 64,
            ingest_depth: Some(40),
            result_depth: Some(5),
            ..PipelineConfig::default()
        };
        for schedule in [ScheduleMode::Threaded, ScheduleMode::Sequential] {
            let pipeline = pipeline(config.clone().with_schedule(schedule));
            let input = varied_input(pipeline.input_len());
            let mut output = vec![0; pipeline.output_len()];
            let stats = pipeline.run(&input, &mut output).unwrap();
            assert_eq!(stats.frames, 64);
        }
    }
}

// =============================================================================
// Section 3: Reference Equality
// =============================================================================

mod reference_tests {
    use super::*;

    #[test]
    fn test_pipeline_matches_batch_evaluation() {
        let pipeline = pipeline(PipelineConfig::default().with_stream_size(32));
        let input = varied_input(pipeline.input_len());
        let output = run(&pipeline, &input);

        let net = pipeline.evaluator();
        let reference: Vec<i32> = net
            .evaluate_batch(&frames_of(net, &input))
            .unwrap()
            .into_iter()
            .flat_map(|v| v.data)
            .collect();
        assert_eq!(output, reference);
    }

    #[test]
    fn test_sequential_matches_threaded() {
        let input = varied_input(8 * 40);
        let threaded = run(&pipeline(PipelineConfig::default()), &input);
        let sequential = run(
            &pipeline(PipelineConfig::default().with_schedule(ScheduleMode::Sequential)),
            &input,
        );
        assert_eq!(threaded, sequential);
    }

    #[test]
    fn test_wrap_network_through_pipeline() {
        let mut config = NetworkConfig::default();
        config.precision = config.precision.with_overflow(OverflowMode::Wrap);
        let net = evaluator_with(config, 2024);
        let pipeline = StreamingPipeline::new(net.clone(), PipelineConfig::default()).unwrap();
        let input = varied_input(pipeline.input_len());
        let output = run(&pipeline, &input);
        let reference: Vec<i32> = net
            .evaluate_batch(&frames_of(&net, &input))
            .unwrap()
            .into_iter()
            .flat_map(|v| v.data)
            .collect();
        assert_eq!(output, reference);
    }
}

// =============================================================================
// Section 4: Configuration Errors & Cancellation
// =============================================================================

mod error_tests {
    use super::*;

    #[test]
    fn test_shallow_ingest_queue_rejected() {
        let config = PipelineConfig {
            ingest_depth: Some(39),
            ..PipelineConfig::default()
        };
        match StreamingPipeline::new(evaluator(), config) {
            Err(PipelineError::QueueCapacityExceeded { queue, depth, required }) => {
                assert_eq!(queue, "frames");
                assert_eq!(depth, 39);
                assert_eq!(required, 40);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected capacity error"),
        }
    }

    #[test]
    fn test_shallow_result_queue_rejected() {
        let config = PipelineConfig {
            result_depth: Some(4),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            StreamingPipeline::new(evaluator(), config),
            Err(PipelineError::QueueCapacityExceeded { queue: "results", .. })
        ));
    }

    #[test]
    fn test_cancelled_run_fails() {
        for schedule in [ScheduleMode::Threaded, ScheduleMode::Sequential] {
            let pipeline = pipeline(PipelineConfig::default().with_schedule(schedule));
            pipeline.cancel_token().cancel();
            let input = vec![0; pipeline.input_len()];
            let mut output = vec![0; pipeline.output_len()];
            assert!(matches!(
                pipeline.run(&input, &mut output),
                Err(PipelineError::Cancelled)
            ));
        }
    }

    #[test]
    fn test_zero_stream_size_rejected() {
        assert!(matches!(
            StreamingPipeline::new(evaluator(), PipelineConfig::default().with_stream_size(0)),
            Err(PipelineError::Config(_))
        ));
    }
}

// =============================================================================
// Section 5: Session & Host Driver
// =============================================================================

mod session_tests {
    use super::*;

    #[test]
    fn test_software_session_executes() {
        let mut session = SoftwareSession::new(pipeline(PipelineConfig::default())).unwrap();
        assert_eq!(session.input_len(), 320);
        assert_eq!(session.output_len(), 40);
        assert!(session.last_stats().is_none());

        let input = synthetic_event_input(0, session.input_len());
        let mut output = vec![0; session.output_len()];
        session.execute(&input, &mut output).unwrap();
        assert_eq!(session.last_stats().unwrap().frames, 8);
    }

    #[test]
    fn test_session_propagates_buffer_errors() {
        let mut session = SoftwareSession::new(pipeline(PipelineConfig::default())).unwrap();
        let mut output = vec![0; session.output_len()];
        assert!(matches!(
            session.execute(&[1, 2, 3], &mut output),
            Err(PipelineError::BufferLength { .. })
        ));
    }

    /// The host loop over synthetic events, as the reference host runs it
    #[test]
    fn test_host_driver_synthetic_events() {
        let session = SoftwareSession::new(pipeline(PipelineConfig::default())).unwrap();
        let mut driver = HostDriver::new(session);
        let mut events = Vec::new();
        driver
            .run(
                3,
                |event, input| input.copy_from_slice(&synthetic_event_input(event, input.len())),
                |event, output| events.push((event, output.to_vec())),
            )
            .unwrap();

        assert_eq!(events.len(), 3);
        let replay = pipeline(PipelineConfig::default());
        for (event, output) in &events {
            let expected = run(&replay, &synthetic_event_input(*event, replay.input_len()));
            assert_eq!(output, &expected);
        }
    }

    /// Integer wire words saturate into the activation format on ingest and
    /// scores truncate toward zero on emit
    #[test]
    fn test_integer_wire_encoding() {
        let config = PipelineConfig {
            input_encoding: WireEncoding::Integer,
            output_encoding: WireEncoding::Integer,
            ..PipelineConfig::default()
        };
        let pipeline = pipeline(config);
        let input = synthetic_event_input(0, pipeline.input_len());
        let output = run(&pipeline, &input);
        // Probabilities below 1.0 truncate to 0; exactly 1.0 stays 1
        assert!(output.iter().all(|&w| w == 0 || w == 1));
    }
}
