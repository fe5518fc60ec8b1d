#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Distributed loss requires the tile-sharded partition scheme")]
    DistributedLossRequiresTileSharding,

    #[error("Invalid heuristic decay: {0} (expected 0.0 to 1.0)")]
    InvalidHeuristicDecay(f64),

    #[error("Invalid redistribution frequency: {0}")]
    InvalidRedistributionFrequency(u64),

    #[error("Invalid sparse density threshold: {0} (expected 0.0 to 1.0)")]
    InvalidSparseDensityThreshold(f64),

    #[error("Invalid strategy string: {0}")]
    InvalidStrategyString(String),

    #[error("Invalid tile size: {0}x{1}")]
    InvalidTileSize(u32, u32),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "Mismatched buffer length in collective: {found} (expected {expected})"
    )]
    MismatchedBufferLength { expected: usize, found: usize },

    #[error(
        "Mismatched strategy for camera {camera_id}: \
         open iteration {open}, finished iteration {finished}"
    )]
    MismatchedStrategy {
        camera_id: u32,
        open: u64,
        finished: u64,
    },

    #[error(
        "Mismatched worker count in statistics: {found} (world size {expected})"
    )]
    MismatchedWorkerCount { expected: usize, found: usize },

    #[error("No open strategy for camera {0}")]
    NoOpenStrategy(u32),

    #[error("Worker group poisoned: a peer worker failed")]
    PoisonedWorkerGroup,

    #[error("Rank out of range: {rank} (world size {world_size})")]
    RankOutOfRange { rank: usize, world_size: usize },

    #[error("Redistribution requires the point-sharded partition scheme")]
    RedistributionRequiresPointSharding,

    #[error("Statistics were already recorded for this strategy")]
    StatsAlreadyRecorded,

    #[error("A strategy is already open for camera {0}")]
    StrategyAlreadyOpen(u32),

    #[error("Zero world size")]
    ZeroWorldSize,
}
