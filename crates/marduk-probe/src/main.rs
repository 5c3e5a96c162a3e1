use std::time::Instant;

use anyhow::{Context as _, Result};
use clap::Parser;
use marduk_gpu::logging::{init_logging, LoggingConfig};
use marduk_gpu::{BufferInit, BufferUsage, Context, CopyRegion, DeviceBackend, GpuInit};

/// Streams data through an orphaned buffer and verifies every frame.
#[derive(Debug, Parser)]
#[command(name = "marduk-probe", version)]
struct Args {
    /// Keep buffers in host memory instead of on a GPU.
    #[arg(long)]
    host: bool,

    /// Request a software adapter (CI machines without a GPU).
    #[arg(long, conflicts_with = "host")]
    fallback: bool,

    /// Number of frames to stream.
    #[arg(long, default_value_t = 120)]
    frames: u32,

    /// Bytes written per frame.
    #[arg(long, default_value_t = 64 * 1024)]
    size: u64,

    /// Usage hint of the streamed buffer: static, dynamic or stream.
    #[arg(long, default_value = "stream")]
    usage: BufferUsage,

    /// Log filter, `env_logger` syntax. Falls back to RUST_LOG.
    #[arg(long)]
    log: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LoggingConfig {
        env_filter: args.log.clone(),
        ..LoggingConfig::default()
    });

    if args.host {
        return run(Context::host(), &args);
    }

    let init = if args.fallback {
        GpuInit::fallback()
    } else {
        GpuInit::default()
    };
    let ctx = Context::headless(init).context("no usable GPU; rerun with --host")?;
    let info = ctx.backend().gpu().adapter_info();
    println!();
    println!("  adapter       {} ({:?}, {:?})", info.name, info.backend, info.device_type);
    run(ctx, &args)
}

fn run<B: DeviceBackend>(ctx: Context<B>, args: &Args) -> Result<()> {
    let size = args.size;
    anyhow::ensure!(size > 0, "--size must be positive");
    anyhow::ensure!(
        size.saturating_mul(2) <= ctx.max_buffer_size(),
        "--size {size} leaves no room to double under the device limit of {} bytes",
        ctx.max_buffer_size()
    );

    let backend = ctx.backend().name();
    log::info!("streaming {} frames of {size} bytes on the {backend} backend", args.frames);

    let mut stream = ctx.buffer(
        BufferInit::reserved(size)
            .with_usage(args.usage)
            .with_label("probe stream"),
    )?;
    let mut snapshot = ctx.buffer(BufferInit::reserved(size).with_label("probe snapshot"))?;

    let started = Instant::now();
    for frame in 0..args.frames {
        let payload = pattern(frame, size);

        stream.orphan(None, false)?;
        stream.write(&payload, 0)?;
        snapshot.copy_from_buffer(&stream, CopyRegion::default())?;

        let readback = snapshot.read(None, 0)?;
        anyhow::ensure!(readback == payload, "frame {frame}: readback mismatch");
    }
    let elapsed = started.elapsed();

    stream.orphan(None, true)?;
    anyhow::ensure!(stream.size() == size * 2, "doubling orphan did not resize");

    let stats = ctx.stats();
    println!();
    println!("  marduk-probe  ·  {backend} backend");
    println!("  frames        {}", args.frames);
    println!("  bytes/frame   {size}");
    println!("  elapsed       {:.2?}", elapsed);
    println!(
        "  throughput    {:.1} MiB/s",
        (size as f64 * f64::from(args.frames)) / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(1e-9)
    );
    println!(
        "  buffers       created {}  freed {}  orphaned {}  live {} ({} bytes)",
        stats.created, stats.freed, stats.orphaned, stats.live, stats.live_bytes
    );
    println!();

    Ok(())
}

/// Frame-dependent byte pattern so stale allocations are detectable.
fn pattern(frame: u32, size: u64) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(frame) as u8)
        .collect()
}
