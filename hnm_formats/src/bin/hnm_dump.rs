use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use hnm_formats::ChunkScan;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(about = "Inspect HNM4 container headers and chunk layout", version)]
struct Args {
    /// HNM files to inspect (may repeat)
    #[arg(value_name = "PATH", conflicts_with = "root")]
    inputs: Vec<PathBuf>,

    /// Directory to scan recursively for .hnm files instead
    #[arg(long, value_name = "DIR", conflicts_with = "inputs")]
    root: Option<PathBuf>,

    /// Emit the scan as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Also list every sub-chunk instead of per-file summaries only
    #[arg(long)]
    chunks: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let inputs = resolve_inputs(&args)?;
    if inputs.is_empty() {
        bail!("no HNM files to inspect");
    }

    for path in inputs {
        let scan = ChunkScan::open(&path)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&scan)?);
            continue;
        }
        print_summary(&path, &scan, args.chunks);
    }
    Ok(())
}

fn resolve_inputs(args: &Args) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();

    if !args.inputs.is_empty() {
        inputs.extend(args.inputs.iter().cloned());
    } else if let Some(root) = args.root.as_ref() {
        for entry in WalkDir::new(root).into_iter().filter_map(|res| res.ok()) {
            if entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("hnm"))
                    .unwrap_or(false)
            {
                inputs.push(entry.into_path());
            }
        }
    }

    inputs.sort();
    inputs.dedup();

    Ok(inputs)
}

fn print_summary(path: &PathBuf, scan: &ChunkScan, list_chunks: bool) {
    let header = &scan.header;
    println!(
        "{}: {}x{}, {} frames, sound format {} ({} bits), frame buffer {} bytes",
        path.display(),
        header.width,
        header.height,
        header.frame_count,
        header.sound_format,
        header.sound_bits,
        header.frame_buffer_size
    );
    let copyright = header.copyright_text();
    if !copyright.is_empty() {
        println!("  copyright: {copyright}");
    }
    println!("  {} super-chunks", scan.superchunks.len());

    if !list_chunks {
        return;
    }
    for (index, superchunk) in scan.superchunks.iter().enumerate() {
        println!("  super-chunk {index} ({} bytes)", superchunk.size);
        for chunk in &superchunk.chunks {
            println!(
                "    {tag:<2} {size:>10} flags=0x{flags:04x}",
                tag = chunk.tag,
                size = chunk.size,
                flags = chunk.flags
            );
        }
    }
}
