//! Headless playback driver for HNM4 streams.
//!
//! Exercises the decoder exactly the way a real front end would: one fetch
//! per scheduling tick, pacing driven by the decoder's per-frame delays.
//! Frames are decoded and timed but not rendered.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use hnm_formats::{DPCM_SAMPLE_RATE, EndOfStream, HnmDecoder, HnmOptions};
use log::{debug, info};

#[derive(Parser)]
#[command(about = "Drive HNM4 playback without rendering", version)]
struct Args {
    /// Path to the .hnm file to play.
    input: PathBuf,

    /// Restart from the beginning when the stream runs out.
    #[arg(long = "loop")]
    loop_playback: bool,

    /// Stop after this many presented frames.
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// Sleep between frames so playback runs at stream speed.
    #[arg(long)]
    realtime: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let options = HnmOptions {
        loop_playback: args.loop_playback,
        ..HnmOptions::default()
    };
    let mut decoder = HnmDecoder::open(&args.input, options)
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let header = decoder.header();
    info!(
        "{}: {}x{}, {} frames declared, audio: {}",
        args.input.display(),
        header.width,
        header.height,
        header.frame_count,
        if decoder.has_audio() {
            "mono 16-bit DPCM"
        } else {
            "none"
        }
    );

    let start = Instant::now();
    let mut presented = 0u64;
    let mut samples_total = 0u64;
    let mut palette_updates = 0u64;

    loop {
        if let Some(limit) = args.max_frames {
            if presented >= limit {
                break;
            }
        }

        if args.realtime {
            let due = Duration::from_millis(u64::from(decoder.next_frame_start_ms()));
            let elapsed = start.elapsed();
            if due > elapsed {
                std::thread::sleep(due - elapsed);
            }
        }

        let before = decoder.current_frame();
        match decoder.next_packet() {
            Ok(()) => {}
            Err(err) if err.downcast_ref::<EndOfStream>().is_some() => {
                info!("stream finished after {presented} frames");
                break;
            }
            Err(err) => return Err(err),
        }

        if decoder.take_palette_dirty() {
            palette_updates += 1;
            debug!("palette update ({palette_updates} total)");
        }
        samples_total += decoder.drain_audio().len() as u64;

        let after = decoder.current_frame();
        // A loop restart drops the frame index back below `before`.
        let newly = if after >= before {
            (after - before) as u64
        } else {
            (after + 1) as u64
        };
        if newly > 0 {
            presented += newly;
            debug!(
                "frame {} presented, delay {} ms, next at {} ms",
                decoder.current_frame(),
                decoder.last_frame_delay_ms(),
                decoder.next_frame_start_ms()
            );
        }
    }

    info!(
        "presented {presented} frames, {samples_total} audio samples ({:.2}s at {DPCM_SAMPLE_RATE} Hz), {palette_updates} palette updates",
        samples_total as f64 / f64::from(DPCM_SAMPLE_RATE)
    );
    Ok(())
}
