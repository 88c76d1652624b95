//! zb-fetch: compact block range fetcher
//!
//! Fetches `[start, end]` from a lightwalletd gRPC-Web proxy and prints a
//! summary, or runs the batched sync loop and reports throughput.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use zb_block_stream::{
    flatten_transactions, BlockConsumer, BlockRangeApi, BlockRangeService, CompactTxStreamer,
    MockCompactTxStreamer, MockDelivery, ShieldedPool, StreamConfig, StreamError,
    StreamOutcome, SyncReport, TransactionBatch, WireFormat,
};
use zb_telemetry::{encode_metrics, init_telemetry, TelemetryConfig};

/// zb-fetch: stream compact blocks from lightwalletd
#[derive(Parser, Debug)]
#[command(name = "zb-fetch")]
#[command(about = "Fetch or sync compact block ranges over gRPC-Web")]
struct Args {
    /// First height (inclusive)
    #[arg(short, long)]
    start: u64,

    /// Last height (inclusive)
    #[arg(short, long)]
    end: u64,

    /// gRPC-Web proxy URL (overrides config and ZB_LIGHTWALLETD_URL)
    #[arg(long)]
    endpoint: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bearer token for the proxy (overrides ZB_AUTH_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Wire format: text or binary
    #[arg(long)]
    format: Option<WireFormat>,

    /// Concurrent streams
    #[arg(long)]
    shards: Option<usize>,

    /// Session deadline in seconds
    #[arg(long)]
    deadline: Option<u64>,

    /// Run the batched sync loop instead of a single fetch
    #[arg(long)]
    sync: bool,

    /// Heights per sync batch
    #[arg(long)]
    batch_size: Option<u64>,

    /// Pools counted during sync: sapling, orchard or both
    #[arg(long)]
    pool: Option<ShieldedPool>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Serve synthetic blocks instead of connecting
    #[arg(long)]
    demo: bool,
}

impl Args {
    fn stream_config(&self) -> anyhow::Result<StreamConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                StreamConfig::from_toml_str(&raw)?
            }
            None => StreamConfig::from_env(),
        };
        if let Some(endpoint) = &self.endpoint {
            config.lightwalletd_url = endpoint.clone();
        }
        if let Some(token) = &self.token {
            config.auth_token = Some(token.clone());
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(shards) = self.shards {
            config.shards = shards;
        }
        if let Some(deadline) = self.deadline {
            config.deadline_secs = Some(deadline);
        }
        if let Some(batch_size) = self.batch_size {
            config.block_batch_size = batch_size;
        }
        if let Some(pool) = self.pool {
            config.pool = pool;
        }
        Ok(config)
    }
}

/// Result of a single fetch.
#[derive(Debug, Serialize)]
struct FetchSummary {
    start: u64,
    end: u64,
    blocks: usize,
    transactions: usize,
    orchard_actions: usize,
    sapling_outputs: usize,
    sapling_spends: usize,
}

impl FetchSummary {
    fn new(start: u64, end: u64, batch: &TransactionBatch) -> Self {
        Self {
            start,
            end,
            blocks: batch.block_count,
            transactions: batch.transactions.len(),
            orchard_actions: batch.orchard_actions().count(),
            sapling_outputs: batch.sapling_outputs().count(),
            sapling_spends: batch.sapling_spends().count(),
        }
    }
}

/// Sync consumer that tallies the notes a scanner would trial-decrypt.
struct NoteCounter {
    pool: ShieldedPool,
    notes: usize,
}

#[async_trait]
impl BlockConsumer for NoteCounter {
    async fn consume(&mut self, batch: TransactionBatch) -> Result<(), StreamError> {
        let notes = batch.note_count(self.pool);
        self.notes += notes;
        info!(
            start = batch.start_height,
            end = batch.end_height,
            notes,
            total_notes = self.notes,
            "batch scanned"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = init_telemetry(TelemetryConfig::from_env())?;
    let config = args.stream_config()?;

    if args.demo {
        let node = MockCompactTxStreamer {
            tip_height: args.end.max(args.start),
            delivery: MockDelivery::Interleaved,
            ..Default::default()
        };
        run(&args, BlockRangeService::new(config, node)).await?;
    } else {
        let client = config.connect()?;
        run(&args, BlockRangeService::with_shared(config, Arc::new(client))).await?;
    }

    if args.metrics {
        println!("{}", encode_metrics()?);
    }
    Ok(())
}

async fn run<S: CompactTxStreamer + 'static>(
    args: &Args,
    service: BlockRangeService<S>,
) -> anyhow::Result<()> {
    info!(
        endpoint = %service.streamer().endpoint(),
        network = ?service.config().network,
        "zb-fetch starting"
    );

    if args.sync {
        let mut consumer = NoteCounter {
            pool: service.config().pool,
            notes: 0,
        };
        let report = service.sync_range(args.start, args.end, &mut consumer).await?;
        print_sync(args.json, &report, consumer.notes)?;
        return Ok(());
    }

    let shards = service.config().shards;
    let outcome = if shards > 1 {
        service.fetch_sharded(args.start, args.end, shards).await
    } else {
        service.fetch_range(args.start, args.end).await
    };
    match outcome {
        StreamOutcome::Completed(blocks) => {
            let summary = FetchSummary::new(args.start, args.end, &flatten_transactions(&blocks));
            print_fetch(args.json, &summary)
        }
        StreamOutcome::Failed(e) => bail!("fetch of [{}, {}] failed: {}", args.start, args.end, e),
    }
}

fn print_fetch(json: bool, summary: &FetchSummary) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("Fetched blocks [{}, {}]", summary.start, summary.end);
        println!("  blocks:          {}", summary.blocks);
        println!("  transactions:    {}", summary.transactions);
        println!("  orchard actions: {}", summary.orchard_actions);
        println!("  sapling outputs: {}", summary.sapling_outputs);
        println!("  sapling spends:  {}", summary.sapling_spends);
    }
    Ok(())
}

fn print_sync(json: bool, report: &SyncReport, notes: usize) -> anyhow::Result<()> {
    if json {
        let mut value = serde_json::to_value(report)?;
        value["notes"] = notes.into();
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let secs = (report.elapsed_ms as f64 / 1000.0).max(f64::EPSILON);
        println!("Synced {} blocks in {:.2}s", report.blocks_processed, secs);
        println!("  batches:      {}", report.batches);
        println!("  transactions: {}", report.transactions_processed);
        println!("  notes:        {}", notes);
        println!("  retries:      {}", report.retries);
        println!(
            "  throughput:   {:.1} blocks/s",
            report.blocks_processed as f64 / secs
        );
    }
    Ok(())
}
