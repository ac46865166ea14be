//! Seqstream CLI - pack, inspect and extract image sequence containers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use seqstream::{
    EncodingMode, FormatVersion, FrameGeometry, SequenceStream, SequenceWriter, WriterConfig,
};

/// Extensions accepted as frame sources when packing.
const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tga", "tif", "tiff", "gif"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// LZ4-compressed raw RGBA frames
    Raw,
    /// Independently encoded images
    Image,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print header and frame index summary
    Info { path: PathBuf },
    /// Pack a directory of numbered images into a sequence file
    Pack {
        input_dir: PathBuf,
        out_file: PathBuf,
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,
        /// Write the version 1 header layout
        #[arg(long)]
        legacy: bool,
        /// Writer configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Decode one frame to a PNG file
    Extract {
        path: PathBuf,
        frame: usize,
        out_file: PathBuf,
    },
    /// Decode every frame and report failures
    Verify { path: PathBuf },
    /// Print a default writer configuration
    ExampleConfig,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { path } => info(&path),
        Commands::Pack {
            input_dir,
            out_file,
            mode,
            legacy,
            config,
        } => {
            let mut config: WriterConfig = match config {
                Some(path) => {
                    let json = fs::read_to_string(&path)
                        .with_context(|| format!("Error reading config {}", path.display()))?;
                    serde_json::from_str(&json).context("Error parsing config")?
                }
                None => WriterConfig::default(),
            };
            if let Some(mode) = mode {
                config.mode = match mode {
                    ModeArg::Raw => EncodingMode::RawCompressed,
                    ModeArg::Image => EncodingMode::ImageCodec,
                };
            }
            if legacy {
                config.version = FormatVersion::V1;
            }
            pack(&input_dir, &out_file, config)
        }
        Commands::Extract {
            path,
            frame,
            out_file,
        } => extract(&path, frame, &out_file),
        Commands::Verify { path } => verify(&path),
        Commands::ExampleConfig => {
            println!("{}", serde_json::to_string_pretty(&WriterConfig::default())?);
            Ok(())
        }
    }
}

fn open(path: &Path) -> Result<SequenceStream> {
    SequenceStream::open(path).with_context(|| format!("Could not open {}", path.display()))
}

fn info(path: &Path) -> Result<()> {
    let stream = open(path)?;
    let header = stream.header();

    println!("Sequence: {}", path.display());
    println!("  Version: {:?}", header.version);
    println!("  Encoding: {:?}", header.mode);
    println!("  Frames: {}", stream.frame_count());
    println!("  Size: {}x{}", stream.width(), stream.height());
    if let Some(bpr) = stream.bytes_per_row() {
        println!("  Bytes per row: {}", bpr);
    }
    println!("  Decoded frame: {} bytes", stream.frame_byte_size());

    let lengths: Vec<u64> = stream
        .range()
        .filter_map(|i| stream.frame_entry(i))
        .map(|e| e.length as u64)
        .collect();
    let total: u64 = lengths.iter().sum();
    println!(
        "  Payloads: {} bytes total, {}-{} bytes/frame ({} avg)",
        total,
        lengths.iter().min().copied().unwrap_or(0),
        lengths.iter().max().copied().unwrap_or(0),
        total / lengths.len().max(1) as u64
    );
    Ok(())
}

/// Trailing number of a file stem, e.g. `turntable_0042` -> 42.
fn frame_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[stem.len() - digits..].parse().ok()
}

/// Image files in `dir`, ordered by trailing frame number then name.
fn collect_frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Could not read {}", dir.display()))? {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && is_frame {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| (frame_number(a), a).cmp(&(frame_number(b), b)));
    Ok(paths)
}

fn is_passthrough_image(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

fn pack(input_dir: &Path, out_file: &Path, config: WriterConfig) -> Result<()> {
    let paths = collect_frame_paths(input_dir)?;
    let Some(first) = paths.first() else {
        bail!("No image files found in {}", input_dir.display());
    };

    let (width, height) = image::image_dimensions(first)
        .with_context(|| format!("Could not read {}", first.display()))?;
    let geometry = FrameGeometry::rgba(
        u16::try_from(width).context("Frame width exceeds 65535")?,
        u16::try_from(height).context("Frame height exceeds 65535")?,
    );

    println!(
        "Packing {} frames of {}x{} ({:?})",
        paths.len(),
        width,
        height,
        config.mode
    );
    let start = Instant::now();

    let mode = config.mode;
    let mut writer = SequenceWriter::create(out_file, geometry, paths.len() as u32, config)?;
    for path in &paths {
        let result = if mode == EncodingMode::ImageCodec && is_passthrough_image(path) {
            writer.push_encoded(&fs::read(path)?)
        } else {
            let pixels = image::open(path)
                .with_context(|| format!("Could not decode {}", path.display()))?
                .into_rgba8();
            writer.push_raw(pixels.as_raw())
        };
        result.with_context(|| format!("Could not add {}", path.display()))?;
    }
    let stats = writer.finish()?;

    println!("Wrote {}: {}", out_file.display(), stats);
    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}

fn extract(path: &Path, frame: usize, out_file: &Path) -> Result<()> {
    let mut stream = open(path)?;
    if let Some(bpr) = stream.bytes_per_row() {
        if bpr != stream.width() * 4 {
            bail!("Row stride {} is not packed RGBA8, cannot export", bpr);
        }
    }

    let pixels = stream.decode_to_vec(frame)?;
    let image = image::RgbaImage::from_raw(stream.width(), stream.height(), pixels)
        .context("Decoded frame does not match sequence geometry")?;
    image
        .save(out_file)
        .with_context(|| format!("Could not save {}", out_file.display()))?;

    println!("Frame {} -> {}", frame, out_file.display());
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    let mut stream = open(path)?;
    let mut buf = vec![0u8; stream.frame_byte_size()];
    let start = Instant::now();

    let mut failures = 0;
    for frame in stream.range() {
        if let Err(err) = stream.decode(frame, &mut buf) {
            eprintln!("  Frame {}: {}", frame, err);
            failures += 1;
        }
    }

    let elapsed = start.elapsed().as_secs_f32();
    println!(
        "Verified {} frames in {:.2}s ({:.1} frames/s)",
        stream.frame_count(),
        elapsed,
        stream.frame_count() as f32 / elapsed.max(f32::EPSILON)
    );
    if failures > 0 {
        bail!("{} of {} frames failed to decode", failures, stream.frame_count());
    }
    Ok(())
}
