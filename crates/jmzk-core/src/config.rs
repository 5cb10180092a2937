use serde::{Deserialize, Serialize};

/// Chain configuration carried in the global property object. Charge
/// factors are adjustable at runtime through `prodvote`; everything else
/// is fixed at genesis.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Maximum seconds a transaction's expiration may lie in the future.
    pub max_transaction_lifetime: u32,
    /// Maximum recursion depth for authority resolution over groups.
    pub max_authority_depth: u16,
    /// Seconds an EVT-Link timestamp may deviate from pending block time.
    pub evt_link_expired_secs: u32,

    // Charge factors; see ChargeManager. Percentages are fixed point with
    // a denominator of 10_000.
    pub base_network_charge_factor: u32,
    pub base_storage_charge_factor: u32,
    pub base_cpu_charge_factor: u32,
    pub global_charge_factor: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_transaction_lifetime: 60 * 60,
            max_authority_depth: 6,
            evt_link_expired_secs: 24,
            base_network_charge_factor: 10,
            base_storage_charge_factor: 10,
            base_cpu_charge_factor: 10,
            global_charge_factor: 10,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> bool {
        self.max_transaction_lifetime > 0
            && self.max_authority_depth > 0
            && self.global_charge_factor > 0
    }
}

/// Staking parameters; fixed at genesis.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Days an unstake proposal waits before it can settle.
    pub unstake_pending_days: u32,
    /// Minimum days for a fixed-term stake.
    pub fixed_days_min: u32,
    /// Maximum days for a fixed-term stake.
    pub fixed_days_max: u32,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self { unstake_pending_days: 7, fixed_days_min: 30, fixed_days_max: 9000 }
    }
}

/// Number of sequential blocks produced by a single producer.
pub const PRODUCER_REPETITIONS: u32 = 12;

/// Maximum number of producers in a schedule.
pub const MAX_PRODUCERS: usize = 125;

/// Hard cap on the token-database savepoint stack: (4/3·24+1)·12.
pub const MAX_SAVEPOINTS: usize = (24 * 4 / 3 + 1) * 12;

/// TAPOS ring size; `block_summary[num & 0xffff]` holds recent block ids.
pub const BLOCK_SUMMARY_SLOTS: usize = 0x10000;
