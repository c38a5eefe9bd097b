// LongVault Protocol Core
//
// Tick-indexed leveraged long positions against a shared vault
// counterparty, with two-phase (initiate/validate) user actions priced
// by an external oracle.
//
// This crate provides the tick ledger and its 512-bit liquidation
// accumulator, the funding/PnL engine, the pending-action queue, the
// bounded liquidation sweep, the rebalancer trigger, the orchestration
// layer tying them together, and the RocksDB persistence layer.

pub mod bitmap;
pub mod errors;
pub mod funding;
pub mod hugeuint;
pub mod ledger;
pub mod liquidation;
pub mod oracle;
pub mod pending;
pub mod protocol;
pub mod rebalancer;
pub mod storage;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use bitmap::TickBitmap;
pub use errors::ProtocolError;
pub use funding::{FundingApplied, FundingConfig, FundingEngine, FundingState};
pub use hugeuint::HugeUint;
pub use ledger::{
    tick_hash, position_value, CloseOutcome, LedgerConfig, LiquidatedTick, OpenValidation,
    TickData, TickHash, TickLedger,
};
pub use liquidation::{
    GasRewardCalculator, LiquidationEngine, LiquidationResult, LiquidationRewards, NoRewards,
    SweepMetrics,
};
pub use oracle::{FeedOracle, OracleAdapter, PriceInfo};
pub use pending::{
    PendingAction, PendingClose, PendingDeposit, PendingOpen, PendingQueue, PendingWithdrawal,
};
pub use protocol::{
    EvictedPending, InitiateOutcome, Protocol, ProtocolConfig, ProtocolSnapshot, ProtocolState,
    RemovedPending, Settlement,
};
pub use rebalancer::{
    imbalance_bps, Rebalancer, RebalancerConfig, RebalancerOutcome, REBALANCER_ADDRESS,
};
pub use storage::ProtocolStorage;
pub use types::{
    bps_of, mul_div, Position, PositionId, Price, ProtocolAction, BPS_DIVISOR, FUNDING_SCALE,
    LEVERAGE_SCALE, SECONDS_PER_DAY,
};
pub use vault::{assets_for_shares, shares_for_deposit, MintableToken, RebaseToken};
