//! convstream host driver
//!
//! Runs NEVENTS synthetic events through the streaming classifier and
//! prints the class scores of every frame.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convstream_fixed_point::FixedVector;
use convstream_model::{NetworkConfig, NetworkEvaluator, NetworkWeights};
use convstream_pipeline::{
    synthetic_event_input, HostDriver, PipelineConfig, ScheduleMode, SoftwareSession,
    StreamingPipeline, WireEncoding,
};

#[derive(Parser, Debug)]
#[command(name = "convstream", version, about = "Streaming 1-D CNN classifier host")]
struct Args {
    /// Number of events to run
    #[arg(default_value_t = 1)]
    nevents: usize,

    /// Network config (JSON); defaults to the built-in topology
    #[arg(long)]
    config: Option<PathBuf>,

    /// Weight file (JSON); seeded weights are used when absent
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Seed for generated weights
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Frames per event (overrides CONVSTREAM_STREAM_SIZE)
    #[arg(long)]
    stream_size: Option<usize>,

    /// threaded | sequential (overrides CONVSTREAM_SCHEDULE)
    #[arg(long)]
    schedule: Option<ScheduleMode>,

    /// raw | integer (overrides CONVSTREAM_INPUT_ENCODING)
    #[arg(long)]
    input_encoding: Option<WireEncoding>,

    /// raw | integer (overrides CONVSTREAM_OUTPUT_ENCODING)
    #[arg(long)]
    output_encoding: Option<WireEncoding>,

    /// Write the weights in use to this JSON file
    #[arg(long)]
    dump_weights: Option<PathBuf>,

    /// Log every stage of the first frame of each event
    #[arg(long)]
    trace: bool,
}

fn format_words(words: &[i32], encoding: WireEncoding, evaluator: &NetworkEvaluator) -> String {
    match encoding {
        WireEncoding::Raw => scores_of(words, evaluator)
            .to_f64_vec()
            .iter()
            .map(|v| format!("{:.6}", v))
            .collect::<Vec<_>>()
            .join(" "),
        WireEncoding::Integer => words
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn scores_of(words: &[i32], evaluator: &NetworkEvaluator) -> FixedVector {
    FixedVector {
        data: words.to_vec(),
        format: evaluator.result_format(),
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let network = match &args.config {
        Some(path) => NetworkConfig::from_json_file(path)
            .with_context(|| format!("loading network config {}", path.display()))?,
        None => NetworkConfig::default(),
    };
    network.validate()?;

    let weights = match &args.weights {
        Some(path) => NetworkWeights::from_json_file(path, &network)
            .with_context(|| format!("loading weights {}", path.display()))?,
        None => NetworkWeights::seeded(&network, args.seed)?,
    };
    if let Some(path) = &args.dump_weights {
        weights
            .save_json_file(path)
            .with_context(|| format!("writing weights {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote weights");
    }

    let mut config = PipelineConfig::from_env();
    if let Some(stream_size) = args.stream_size {
        config.stream_size = stream_size;
    }
    if let Some(schedule) = args.schedule {
        config.schedule = schedule;
    }
    if let Some(encoding) = args.input_encoding {
        config.input_encoding = encoding;
    }
    if let Some(encoding) = args.output_encoding {
        config.output_encoding = encoding;
    }
    let input_encoding = config.input_encoding;
    let output_encoding = config.output_encoding;

    let evaluator = Arc::new(NetworkEvaluator::new(network, weights)?);
    let pipeline = StreamingPipeline::new(evaluator.clone(), config)?;
    let session = SoftwareSession::new(pipeline)?;
    let mut driver = HostDriver::new(session);

    let input_width = evaluator.input_width();
    let output_width = evaluator.output_width();
    let trace = args.trace;

    driver.run(
        args.nevents,
        |event, input| {
            input.copy_from_slice(&synthetic_event_input(event, input.len()));
            if trace {
                let stages = input_encoding
                    .decode_frame(&input[..input_width], &evaluator)
                    .map_err(anyhow::Error::from)
                    .and_then(|frame| Ok(evaluator.trace(&frame)?));
                match stages {
                    Ok(stages) => {
                        for stage in stages {
                            tracing::info!(event, stage = stage.stage, shape = ?stage.shape, values = ?stage.values());
                        }
                    }
                    Err(e) => tracing::warn!(event, error = %e, "trace skipped"),
                }
            }
        },
        |event, output| {
            for (i, scores) in output.chunks_exact(output_width).enumerate() {
                println!("frame {}: {}", i, format_words(scores, output_encoding, &evaluator));
                if output_encoding == WireEncoding::Raw {
                    let scores = scores_of(scores, &evaluator);
                    if let Some(best) = scores.argmax().and_then(|k| scores.get(k).map(|p| (k, p))) {
                        tracing::debug!(event, frame = i, class = best.0, score = %best.1, "predicted");
                    }
                }
            }
            println!("---- END EVENT {} ----", event + 1);
        },
    )?;

    if let Some(stats) = driver.session().last_stats() {
        tracing::info!(
            frames = stats.frames,
            elapsed = ?stats.elapsed,
            frames_per_sec = stats.frames_per_sec(),
            "last event"
        );
    }
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convstream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    tracing::info!("Starting convstream v{}", env!("CARGO_PKG_VERSION"));

    match run(args) {
        Ok(()) => println!("TEST PASSED"),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            println!("TEST FAILED");
            std::process::exit(1);
        }
    }
}
