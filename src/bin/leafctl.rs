//! leafctl
//!
//! Offline tool for files of leaf blocks: check and summarize them, or
//! generate sample files to experiment with.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use leafkv::inspect::{self, BlockKind};
use leafkv::{Config, LeafNode, ReplTimestamp, ShortValueSizer, ValueSizer};
use tracing_subscriber::{fmt, EnvFilter};

/// leafkv block tool
#[derive(Parser, Debug)]
#[command(name = "leafctl")]
#[command(about = "Inspect and generate leaf block files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fsck and summarize every block of a file
    Inspect {
        /// Block file to read
        file: PathBuf,

        /// Block size in bytes
        #[arg(short, long, default_value = "4096")]
        block_size: usize,

        /// Also dump the pairs of every leaf
        #[arg(short, long)]
        entries: bool,
    },

    /// Write a file of filled leaf blocks
    Generate {
        /// Block file to create
        file: PathBuf,

        /// Number of leaves to write
        #[arg(short, long, default_value = "4")]
        leaves: usize,

        /// Block size in bytes
        #[arg(short, long, default_value = "4096")]
        block_size: usize,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,leafkv=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let code = match args.command {
        Commands::Inspect {
            file,
            block_size,
            entries,
        } => run_inspect(&file, block_size, entries),
        Commands::Generate {
            file,
            leaves,
            block_size,
        } => run_generate(&file, leaves, block_size),
    };
    std::process::exit(code);
}

fn sizer_for(block_size: usize) -> Option<ShortValueSizer> {
    let config = Config::builder().block_size(block_size).build();
    match ShortValueSizer::from_config(&config) {
        Ok(sizer) => Some(sizer),
        Err(e) => {
            tracing::error!("Invalid block size: {}", e);
            None
        }
    }
}

fn run_inspect(file: &Path, block_size: usize, entries: bool) -> i32 {
    let Some(sizer) = sizer_for(block_size) else {
        return 2;
    };

    let bytes = match std::fs::read(file) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to read {}: {}", file.display(), e);
            return 2;
        }
    };

    let reports = match inspect::inspect_blocks(&bytes, &sizer) {
        Ok(reports) => reports,
        Err(e) => {
            tracing::error!("Failed to inspect {}: {}", file.display(), e);
            return 2;
        }
    };

    let mut corrupt = 0;
    for report in &reports {
        match &report.kind {
            BlockKind::Zeroed => println!("block {:>5} @{:<9} free", report.index, report.offset),
            BlockKind::Foreign(magic) => println!(
                "block {:>5} @{:<9} foreign magic \"{}\"",
                report.index,
                report.offset,
                magic.escape_ascii()
            ),
            BlockKind::Leaf {
                summary: Some(s), ..
            } => {
                println!(
                    "block {:>5} @{:<9} leaf pairs={} live={} deleted={} skips={} \
                     stamped={} mandatory={} gap={}{}",
                    report.index,
                    report.offset,
                    s.num_pairs,
                    s.live_entries,
                    s.deletion_entries,
                    s.skip_entries,
                    s.timestamped_entries,
                    s.mandatory_cost,
                    s.free_gap,
                    if s.underfull { " underfull" } else { "" }
                );
                if entries {
                    let block = &bytes[report.offset..report.offset + block_size];
                    print!("{}", LeafNode::new(block).dump(&sizer));
                }
            }
            BlockKind::Leaf { error, .. } => {
                corrupt += 1;
                println!(
                    "block {:>5} @{:<9} CORRUPT: {}",
                    report.index,
                    report.offset,
                    error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    tracing::info!(blocks = reports.len(), corrupt, "inspection finished");
    if corrupt > 0 {
        1
    } else {
        0
    }
}

fn run_generate(file: &Path, leaves: usize, block_size: usize) -> i32 {
    let Some(sizer) = sizer_for(block_size) else {
        return 2;
    };

    let mut nodes = Vec::with_capacity(leaves);
    let mut tstamp = ReplTimestamp::new(1);
    let mut counter = 0u32;
    for _ in 0..leaves {
        let mut node = LeafNode::new(vec![0u8; sizer.block_size()]);
        node.init(&sizer);

        loop {
            let key = format!("key{counter:08}");
            let value = match sizer.encode(format!("value-{counter}").as_bytes()) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!("Failed to encode value: {}", e);
                    return 2;
                }
            };
            if node.is_full(&sizer, key.as_bytes(), &value) {
                break;
            }
            node.insert(&sizer, key.as_bytes(), &value, tstamp);
            tstamp = tstamp.next();

            // leave a tombstone behind now and then
            if counter % 7 == 3 && !node.is_full_for_removal(&sizer, key.as_bytes()) {
                node.remove(&sizer, key.as_bytes(), tstamp);
                tstamp = tstamp.next();
            }
            counter += 1;
        }
        nodes.push(node);
    }

    if let Err(e) = inspect::write_block_file(file, &nodes) {
        tracing::error!("Failed to write {}: {}", file.display(), e);
        return 2;
    }

    tracing::info!(
        leaves,
        keys = counter,
        path = %file.display(),
        "generated block file"
    );
    0
}
