use std::{sync::Arc, time::Duration};

use blockchain_pow_contour::{
    now_millis, CancellationToken, ContourEngine, EngineConfig, MiningEvent, Transaction,
    VerificationAlgorithm,
};
use clap::Parser as _;
use color_eyre::eyre::{bail, eyre, Context as _};
use rand::Rng as _;
use tracing::{debug, info, warn};

#[derive(Debug, clap::Parser)]
struct Args {
    /// Leading zero bytes the contour hash must start with.
    #[arg(short, long, default_value_t = 1)]
    difficulty: u32,
    #[arg(long, default_value_t = 3)]
    dimensions: usize,
    #[arg(long, default_value_t = 10)]
    min_points: usize,
    #[arg(long, default_value_t = 50)]
    max_points: usize,
    #[arg(short = 'c', long, default_value_t = 30.0)]
    complexity_threshold: f64,
    /// bezier, spline or convexHull
    #[arg(short, long, default_value = "bezier")]
    algorithm: String,
    #[arg(long, default_value_t = 10)]
    target_block_secs: u64,
    #[arg(long, default_value_t = 1000)]
    progress_interval: u64,
    #[arg(short, long, default_value_t = 3)]
    blocks: u64,
    #[arg(short, long)]
    num_threads: Option<usize>,
    /// Transactions each submitter thread sends.
    #[arg(short, long, default_value_t = 20)]
    transactions: usize,
    #[arg(long, default_value_t = 10)]
    batch_size: usize,
    #[arg(short, long, default_value = "miner-0")]
    miner: String,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env()
        .context("couldn't parse RUST_LOG environment variable")?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    debug!(?args);

    let config = EngineConfig {
        difficulty: args.difficulty,
        dimensions: args.dimensions,
        min_points: args.min_points,
        max_points: args.max_points,
        complexity_threshold: args.complexity_threshold,
        verification_algorithm: VerificationAlgorithm::from_name(&args.algorithm),
        target_block_time: Duration::from_secs(args.target_block_secs),
        progress_interval: args.progress_interval,
        ..EngineConfig::default()
    };
    let engine = Arc::new(ContourEngine::new(config).context("invalid engine configuration")?);

    let events = engine.subscribe();
    std::thread::spawn(move || {
        for event in events {
            match event {
                MiningEvent::Progress { attempts, elapsed } => {
                    debug!(attempts, ?elapsed, "searching")
                }
                MiningEvent::Cancelled { attempts } => warn!(attempts, "search cancelled"),
                other => debug!(?other),
            }
        }
    });

    let num_threads = match (args.num_threads, std::thread::available_parallelism()) {
        (Some(user), _) => user,
        (None, Ok(default)) => default.get(),
        (_, Err(err)) => {
            return Err(color_eyre::Report::from(err))
                .context("couldn't get a default for num threads")
        }
    };
    info!("spawning {num_threads} submitter threads");

    let submitters = (0..num_threads)
        .map(|thread_num| {
            let engine = engine.clone();
            let count = args.transactions;
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..count {
                    let transaction = Transaction {
                        from_address: format!("user-{thread_num}"),
                        to_address: format!("user-{}", rng.gen_range(0..num_threads.max(2))),
                        amount: rng.gen_range(1.0..100.0),
                        fee: rng.gen_range(0.0..2.0),
                        timestamp: now_millis(),
                        signature: rng.gen::<[u8; 32]>().to_vec(),
                    };
                    match engine.add_transaction(transaction) {
                        Ok(hash) => debug!(%thread_num, %hash, "submitted"),
                        Err(error) => warn!(%thread_num, %error, "rejected"),
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    let token = CancellationToken::new();
    for _ in 0..args.blocks {
        let block = engine
            .mine_next_block(&args.miner, args.batch_size, &token)
            .context("couldn't mine the next block")?;
        info!(
            index = block.index(),
            hash = %block.hash(),
            nonce = block.header().nonce,
            complexity = block.header().contour_complexity,
            difficulty = engine.get_difficulty(),
            "mined block"
        );
    }

    for submitter in submitters {
        submitter.join().map_err(|_| eyre!("submitter thread panicked"))?;
    }

    let stats = engine.stats();
    info!(?stats);
    if !engine.validate_chain() {
        bail!("chain failed validation");
    }

    Ok(())
}
