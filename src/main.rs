use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carlink::config::PipelineConfig;
use carlink::video::nal::{self, NalType};
use carlink::video::{
    CodecSession, DecoderFormat, MockDecoder, SessionState, SurfaceHandle, UpstreamControl,
};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// carlink demo player command line arguments
#[derive(Parser, Debug)]
#[command(name = "carlink")]
#[command(version, about = "Feed an Annex-B H.264 file through the decode pipeline", long_about = None)]
struct CliArgs {
    /// Raw Annex-B H.264 elementary stream to play
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Playback rate in frames per second
    #[arg(short = 'f', long, value_name = "FPS", default_value_t = 30)]
    fps: u32,

    /// Optional JSON pipeline configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dump a stats snapshot every N seconds while playing
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    stats_interval: u64,

    /// Stall the reference decoder after this many frames to
    /// demonstrate watchdog recovery
    #[arg(long, value_name = "N")]
    stall_after: Option<usize>,

    /// How many frames the injected stall lasts
    #[arg(long, value_name = "N", default_value_t = 90)]
    stall_frames: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Upstream stand-in for the demo: keyframe requests only get logged,
/// a file source cannot honor them.
struct FileSource;

impl UpstreamControl for FileSource {
    fn request_keyframe(&self) {
        tracing::info!("Keyframe requested (file source, ignoring)");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting carlink demo player v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    config.fps = args.fps;
    config.validate()?;

    let stream = std::fs::read(&args.input)?;
    tracing::info!(
        "Loaded {} ({} bytes)",
        args.input.display(),
        stream.len()
    );
    let frames = split_access_units(&stream, config.nal_scan_window);
    tracing::info!("Parsed {} access units", frames.len());
    if frames.is_empty() {
        anyhow::bail!("no H.264 start codes found in input");
    }

    let (decoder, control) = MockDecoder::new();
    let session = CodecSession::new(config, Arc::new(FileSource));
    session
        .configure(
            Box::new(decoder),
            DecoderFormat {
                width: 1280,
                height: 720,
                fps: args.fps,
            },
            SurfaceHandle::new(1),
        )
        .await?;
    session.start().await?;

    let frame_period = Duration::from_micros(1_000_000 / args.fps as u64);
    let mut stats_timer = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    stats_timer.tick().await;

    for (index, frame) in frames.iter().enumerate() {
        if session.state() != SessionState::Running {
            tracing::warn!("Session left Running state, stopping playback");
            break;
        }
        if let Some(stall_after) = args.stall_after {
            if index == stall_after {
                tracing::warn!("Injecting decoder stall for {} frames", args.stall_frames);
                control.set_stalled(true);
            } else if index == stall_after + args.stall_frames {
                tracing::info!("Clearing injected decoder stall");
                control.set_stalled(false);
            }
        }
        session.submit_frame(frame);
        tokio::select! {
            _ = tokio::time::sleep(frame_period) => {}
            _ = stats_timer.tick() => {
                print_stats(&session)?;
            }
        }
    }

    // Let the feeder drain the tail of the ring
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop().await?;

    print_stats(&session)?;
    tracing::info!(
        "Playback finished: {} submissions reached the decoder",
        control.submissions().len()
    );
    Ok(())
}

/// Split an Annex-B elementary stream into per-frame submissions the
/// way a transport would deliver them: configuration units ride along
/// with the slice that follows them, so an IDR arrives as an
/// SPS+PPS+IDR bundle.
fn split_access_units(stream: &[u8], scan_window: usize) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut from = 0;

    while let Some((offset, sc_len)) = nal::find_start_code(stream, from, stream.len()) {
        let header = offset + sc_len;
        if header >= stream.len() {
            break;
        }
        let end = nal::find_start_code(stream, header, stream.len())
            .map(|(next, _)| next)
            .unwrap_or(stream.len());
        let unit = &stream[offset..end];

        match NalType::from_header_byte(stream[header]) {
            NalType::NonIdrSlice | NalType::IdrSlice => {
                pending.extend_from_slice(unit);
                frames.push(std::mem::take(&mut pending));
            }
            _ => pending.extend_from_slice(unit),
        }
        from = end;
    }

    // Sanity: a well-formed unit classifies under the ingest window
    frames.retain(|f| nal::classify(f, scan_window).is_some());
    frames
}

fn print_stats(session: &Arc<CodecSession>) -> anyhow::Result<()> {
    let stats = session.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "carlink=error",
        LogLevel::Warn => "carlink=warn",
        LogLevel::Info => "carlink=info",
        LogLevel::Debug => "carlink=debug",
        LogLevel::Trace => "carlink=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
