//! Strata world server entry point.
//!
//! Loads `config.ron` (CLI flags override it), initialises logging, opens the
//! world directory and runs the world tick until Ctrl-C. On shutdown every
//! shard drains its queue before dirty chunks are written back.
//!
//! Run with: `cargo run -p strata-server -- --world-path ./world`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use strata_config::{CliArgs, Config};
use strata_world::{
    ActiveBlockHandler, BlockPos, CachePolicy, Chunk, ChunkCoord, ChunkManager, ChunkSubscribers,
    DiskStore, LocalShardManager,
};
use tracing::{info, warn};

/// Per-block behaviour belongs to the game layer. Without one, active
/// blocks simply go inactive after a single tick.
struct ExpireActiveBlocks;

impl ActiveBlockHandler for ExpireActiveBlocks {
    fn tick_block(&self, _chunk: &mut Chunk, _pos: BlockPos) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(|| dirs::config_dir().map(|dir| dir.join("strata")))
        .unwrap_or_else(|| PathBuf::from("."));

    let (mut config, config_err) = match Config::load_or_create(&config_dir) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    config.apply_cli_overrides(&args);

    strata_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );
    if let Some(e) = config_err {
        warn!("using default config: {e}");
    }

    config.validate()?;

    let world_path = config.world.path.clone();
    if !world_path.is_dir() {
        bail!("world directory {} does not exist", world_path.display());
    }

    info!("Strata world server");
    info!(
        "World: {} | view radius: {} | cache limit: {}",
        world_path.display(),
        config.world.view_radius,
        config.world.cache_max_chunks
    );

    let observers = Arc::new(ChunkSubscribers::new());
    let chunks = Arc::new(ChunkManager::new(
        Arc::new(DiskStore::new(&world_path)),
        observers,
        CachePolicy::from_max_chunks(config.world.cache_max_chunks),
    ));
    let shards = Arc::new(LocalShardManager::new(Arc::clone(&chunks)));

    let radius = config.world.view_radius;
    let preloaded = {
        let chunks = Arc::clone(&chunks);
        tokio::task::spawn_blocking(move || preload_spawn_area(&chunks, radius))
            .await
            .context("spawn area preload task failed")?
    };
    info!("Preloaded {preloaded} chunks around spawn");
    shards
        .shard_client(ChunkCoord::default())
        .context("starting spawn shard")?;

    run_tick_loop(&config, &shards).await;

    info!("Shutting down");
    let saved = {
        let shards = Arc::clone(&shards);
        tokio::task::spawn_blocking(move || {
            shards.shutdown();
            shards.chunks().save_dirty()
        })
        .await
        .context("shutdown task failed")?
    };
    let stats = shards.stats();
    info!(
        "Saved {saved} chunks | ops: {} | transfers: {} done, {} dropped | moves rejected: {} | panics: {}",
        stats.executed,
        stats.transfers_completed,
        stats.transfers_dropped,
        stats.moves_rejected,
        stats.panics
    );
    Ok(())
}

/// Loads the square around the origin, logging chunks that are unavailable.
fn preload_spawn_area(chunks: &ChunkManager, radius: i32) -> usize {
    let mut loaded = 0;
    for (coord, result) in chunks.chunks_in_radius(ChunkCoord::default(), radius) {
        match result {
            Ok(_) => loaded += 1,
            Err(e) => tracing::debug!("spawn chunk {coord} unavailable: {e}"),
        }
    }
    loaded
}

/// Ticks every shard at the configured rate until Ctrl-C, saving and
/// trimming the chunk cache every `save_interval_ticks`.
async fn run_tick_loop(config: &Config, shards: &Arc<LocalShardManager>) {
    let handler: Arc<dyn ActiveBlockHandler> = Arc::new(ExpireActiveBlocks);
    let save_every = config.shard.save_interval_ticks;
    let mut interval =
        tokio::time::interval(Duration::from_millis(config.shard.tick_interval_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut tick: u64 = 0;
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            _ = interval.tick() => {
                tick += 1;
                shards.tick_all(Arc::clone(&handler));

                if save_every > 0 && tick % save_every == 0 {
                    let chunks = Arc::clone(shards.chunks());
                    let maintenance = tokio::task::spawn_blocking(move || {
                        (chunks.save_dirty(), chunks.evict_idle())
                    });
                    match maintenance.await {
                        Ok((saved, evicted)) => tracing::debug!(
                            "tick {tick}: saved {saved} chunks, evicted {evicted}"
                        ),
                        Err(e) => warn!("chunk maintenance failed: {e}"),
                    }
                }
            }
        }
    }
}
