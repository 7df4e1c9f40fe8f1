use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hnm_formats::{EndOfStream, HnmDecoder, HnmOptions, PALETTE_SIZE};

#[derive(Parser)]
#[command(about = "Decode HNM4 frames and audio into raw dumps", version)]
struct Args {
    /// Path to the input .hnm file.
    input: PathBuf,
    /// Output directory where decoded frames will be written.
    output: PathBuf,
    /// Output format for decoded frames (default: ppm).
    #[arg(long, value_enum, default_value_t = OutputFormat::Ppm)]
    format: OutputFormat,
    /// Optional limit on the number of frames to decode.
    #[arg(long)]
    limit: Option<usize>,
    /// Also write decoded audio as raw mono s16le samples.
    #[arg(long)]
    audio: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    /// Binary PPM with the retained palette applied.
    Ppm,
    /// Raw 8-bit paletted frame plus a .pal file per palette change.
    Pal8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let mut decoder = HnmDecoder::open(&args.input, HnmOptions::default())?;
    let width = decoder.header().width as usize;
    let height = decoder.header().height as usize;

    let mut pcm = Vec::new();
    let mut written = 0usize;
    loop {
        if let Some(limit) = args.limit {
            if written >= limit {
                break;
            }
        }

        let before = decoder.current_frame();
        match decoder.next_packet() {
            Ok(()) => {}
            // The stream simply ran out; everything decoded so far stands.
            Err(err) if err.downcast_ref::<EndOfStream>().is_some() => break,
            Err(err) => return Err(err),
        }

        pcm.extend_from_slice(&decoder.drain_audio());
        if decoder.current_frame() == before {
            continue;
        }

        let frame = decoder.current_frame();
        if decoder.take_palette_dirty() && args.format == OutputFormat::Pal8 {
            let path = args.output.join(format!("frame_{frame:05}.pal"));
            std::fs::write(&path, decoder.palette())
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        match args.format {
            OutputFormat::Ppm => {
                let path = args.output.join(format!("frame_{frame:05}.ppm"));
                write_ppm(&path, width, height, decoder.surface(), decoder.palette())?;
            }
            OutputFormat::Pal8 => {
                let path = args.output.join(format!("frame_{frame:05}.pal8"));
                std::fs::write(&path, decoder.surface())
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        written += 1;
    }

    println!("wrote {written} frames to {}", args.output.display());

    if args.audio {
        let path = args.output.join("audio_s16le_22050.pcm");
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        for sample in &pcm {
            file.write_all(&sample.to_le_bytes())?;
        }
        println!("wrote {} samples to {}", pcm.len(), path.display());
    }

    Ok(())
}

fn write_ppm(
    path: &PathBuf,
    width: usize,
    height: usize,
    surface: &[u8],
    palette: &[u8; PALETTE_SIZE],
) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write!(file, "P6\n{width} {height}\n255\n")?;
    let mut rgb = Vec::with_capacity(width * height * 3);
    for &index in surface {
        let base = index as usize * 3;
        rgb.extend_from_slice(&palette[base..base + 3]);
    }
    file.write_all(&rgb)?;
    Ok(())
}
