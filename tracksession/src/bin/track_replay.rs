/// Replay a recorded detection scenario through a tracking session
///
/// Usage:
///   cargo run --release --bin track_replay -- [--out <tracks.jsonl>] [--tracker <variant>] <scenario.json>
///
/// Examples:
///   cargo run --release --bin track_replay -- demos/crossing.json
///   cargo run --release --bin track_replay -- --tracker csrt --out tracks.jsonl demos/crossing.json
///
/// The session result (stats and every track) is printed to stdout as JSON.
/// Ctrl-C stops the session at the next frame boundary.
use anyhow::{bail, Context};
use std::env;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracksession::capability::FrameSink;
use tracksession::replay::{JsonLinesSink, MemorySink, Scenario};
use tracksession::{SessionConfig, TrackerVariant, TrackingSession};

fn print_usage() {
    eprintln!("Usage: track_replay [--out <tracks.jsonl>] [--tracker <fast|balanced|accurate>] <scenario.json>");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let mut out_path: Option<String> = None;
    let mut tracker: Option<TrackerVariant> = None;
    let mut scenario_path: Option<String> = None;

    let mut arg_idx = 1;
    while arg_idx < args.len() {
        match args[arg_idx].as_str() {
            "--out" => {
                arg_idx += 1;
                out_path = Some(args.get(arg_idx).cloned().context("--out needs a path")?);
            }
            "--tracker" => {
                arg_idx += 1;
                let name = args.get(arg_idx).context("--tracker needs a variant name")?;
                tracker = Some(name.parse()?);
            }
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other if other.starts_with("--") => {
                print_usage();
                bail!("unknown option {}", other);
            }
            other => scenario_path = Some(other.to_string()),
        }
        arg_idx += 1;
    }

    let Some(scenario_path) = scenario_path else {
        print_usage();
        bail!("no scenario file given");
    };

    let mut scenario = Scenario::from_file(&scenario_path)
        .with_context(|| format!("failed to load scenario {}", scenario_path))?;

    if let Some(variant) = tracker {
        let preset = SessionConfig::for_variant(variant);
        scenario.config.tracker = variant;
        scenario.config.max_lost_frames = preset.max_lost_frames;
        scenario.config.confidence_decay_success = preset.confidence_decay_success;
    }

    log::info!(
        "Replaying {} ({} scripted detection frames, tracker {})",
        scenario_path,
        scenario.detections.len(),
        scenario.config.tracker
    );

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping at the next frame");
            ctrl_c_token.cancel();
        }
    });

    let mut session =
        TrackingSession::with_motion_tracker(scenario.config.clone(), Arc::new(scenario.detector()));
    let mut source = scenario.source();
    let mut sink: Box<dyn FrameSink> = match &out_path {
        Some(path) => Box::new(JsonLinesSink::new(path)),
        None => Box::new(MemorySink::new()),
    };

    let result = session
        .run(&mut source, sink.as_mut(), cancel)
        .await
        .context("tracking session failed")?;

    println!("{}", result.to_json()?);
    eprintln!(
        "Processed {} frames in {} ms: {} tracks created, {} live, success rate {:.1}%",
        result.stats.frames_processed,
        result.stats.processing_time_ms(),
        result.stats.tracks_created,
        result.stats.active_tracks,
        result.stats.tracking_success_rate() * 100.0
    );
    if let Some(path) = out_path {
        eprintln!("Frame records written to {}", path);
    }

    Ok(())
}
