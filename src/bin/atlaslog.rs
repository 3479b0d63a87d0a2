//! AtlasLog Admin Binary
//!
//! Inspect, verify, append to and scavenge a chunk directory.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use atlaslog::chunk::ScannedRecord;
use atlaslog::record::EXPECTED_VERSION_ANY;
use atlaslog::{AtlasError, ChunkManager, Config, LogRecord, Result, Scavenger};

/// AtlasLog administration tool
#[derive(Parser, Debug)]
#[command(name = "atlaslog")]
#[command(about = "Chunked transaction log with scavenging")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./atlaslog_data")]
    data_dir: String,

    /// Chunk data-region size in MB (must match existing chunks)
    #[arg(short = 'c', long, default_value = "256")]
    chunk_mb: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the chunk table
    Info,

    /// Print every record of a chunk with its positions
    Dump {
        /// Chunk number
        #[arg(long)]
        chunk: u32,
    },

    /// Verify the checksum of every completed chunk
    Verify,

    /// Append a single-event record
    Write {
        /// Stream to write to
        #[arg(long)]
        stream: String,

        /// Event type
        #[arg(long)]
        event_type: String,

        /// Event data (UTF-8)
        #[arg(long, default_value = "")]
        data: String,
    },

    /// Scavenge every completed chunk
    Scavenge {
        /// Discard records of this stream (repeatable)
        #[arg(long = "discard-stream")]
        discard_streams: Vec<String>,

        /// Replace chunks even when nothing is saved
        #[arg(long)]
        always_keep: bool,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlaslog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("AtlasLog v{}", atlaslog::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .chunk_size(args.chunk_mb.saturating_mul(1024 * 1024))
        .build();

    if let Err(e) = run(config, args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: Config, command: Commands) -> Result<()> {
    let manager = ChunkManager::open(config)?;

    match command {
        Commands::Info => print_info(&manager)?,
        Commands::Dump { chunk } => dump_chunk(&manager, chunk)?,
        Commands::Verify => verify_chunks(&manager)?,
        Commands::Write {
            stream,
            event_type,
            data,
        } => write_event(&manager, stream, event_type, data)?,
        Commands::Scavenge {
            discard_streams,
            always_keep,
        } => {
            let policy = move |stream: &str| discard_streams.iter().any(|s| s == stream);
            let summary = Scavenger::new(&manager, policy)
                .always_keep_scavenged(always_keep)
                .scavenge()?;

            for chunk in &summary.chunks {
                println!(
                    "chunk #{:<6} kept {:>8} discarded {:>8} {:>12} -> {:>12} {}",
                    chunk.chunk_number,
                    chunk.records_kept,
                    chunk.records_discarded,
                    chunk.old_size,
                    chunk.new_size,
                    if chunk.replaced { "replaced" } else { "kept original" }
                );
            }
            println!(
                "{} chunk(s) replaced, {} bytes saved",
                summary.chunks_replaced(),
                summary.space_saved()
            );
        }
    }

    manager.close()
}

fn print_info(manager: &ChunkManager) -> Result<()> {
    println!("{:<8} {:<8} {:<10} {:>12} {:>12} {:>8}", "chunk", "version", "state", "physical", "logical", "map");
    for number in 0..manager.chunks_count() as u32 {
        let Some(chunk) = manager.get_chunk(number) else {
            continue;
        };
        println!(
            "{:<8} {:<8} {:<10} {:>12} {:>12} {:>8}",
            number,
            manager.chunk_version(number).unwrap_or(0),
            format!("{:?}", chunk.state()),
            chunk.physical_data_size(),
            chunk.logical_data_size(),
            chunk.pos_map_len()
        );
    }
    println!("write position: {}", manager.write_position()?);
    Ok(())
}

fn dump_chunk(manager: &ChunkManager, number: u32) -> Result<()> {
    let chunk = manager
        .get_chunk(number)
        .ok_or_else(|| AtlasError::InvalidState(format!("chunk #{} does not exist", number)))?;

    for scanned in chunk.iter_records() {
        let ScannedRecord {
            original_position,
            physical_position,
            size,
            record,
        } = scanned?;
        println!(
            "{:>10} {:>10} {:>8} {:<8?} {}",
            original_position,
            physical_position,
            size,
            record.record_type(),
            record.stream_id().unwrap_or("-")
        );
    }
    Ok(())
}

fn verify_chunks(manager: &ChunkManager) -> Result<()> {
    let mut failures = 0usize;
    for chunk in manager.completed_chunks() {
        match chunk.verify_checksum() {
            Ok(()) => println!("chunk #{}: ok", chunk.chunk_number()),
            Err(e) => {
                failures += 1;
                println!("chunk #{}: {}", chunk.chunk_number(), e);
            }
        }
    }

    if failures > 0 {
        return Err(AtlasError::CorruptChunk {
            path: manager.data_dir().display().to_string(),
            reason: format!("{} chunk(s) failed verification", failures),
        });
    }
    Ok(())
}

fn write_event(manager: &ChunkManager, stream: String, event_type: String, data: String) -> Result<()> {
    let correlation_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    let build = |position: u64| {
        LogRecord::single_write(
            position,
            correlation_id,
            event_id,
            stream.as_str(),
            EXPECTED_VERSION_ANY,
            event_type.as_str(),
            data.as_bytes(),
            Vec::new(),
        )
    };

    let mut result = manager.write(&build(manager.write_position()?))?;
    if !result.success {
        // Rolled over: the record has to carry its new position
        result = manager.write(&build(result.new_position))?;
    }

    if !result.success {
        return Err(AtlasError::InvalidState(
            "record was not written after roll-over".to_string(),
        ));
    }

    manager.flush()?;
    println!("written at {}", result.old_position);
    Ok(())
}
