use jmzk_core::config::ChainConfig;
use jmzk_core::transaction::SignedTransaction;

/// Flat per-signature wire cost: 64-byte compact signature plus recovery id.
const SIGNATURE_SIZE: u64 = 65;

/// Fixed network overhead per packed transaction.
const FIXED_NET_OVERHEAD: u64 = 16;

/// Computes the fee for one transaction in base EVT units. Three cost
/// legs, each scaled by its prodvote-adjustable factor, then a global
/// scale with a denominator of 10_000.
pub struct ChargeManager<'a> {
    config: &'a ChainConfig,
}

impl<'a> ChargeManager<'a> {
    pub fn new(config: &'a ChainConfig) -> Self {
        Self { config }
    }

    /// Network leg: bytes on the wire.
    fn network(&self, packed_size: u64, sig_count: u64) -> u64 {
        let bytes = packed_size + sig_count * SIGNATURE_SIZE + FIXED_NET_OVERHEAD;
        bytes * self.config.base_network_charge_factor as u64
    }

    /// Storage leg: payload bytes the actions may persist.
    fn storage(&self, trx: &SignedTransaction) -> u64 {
        let bytes: u64 = trx.trx.actions.iter().map(|a| a.data.len() as u64).sum();
        bytes * self.config.base_storage_charge_factor as u64
    }

    /// CPU leg: a flat estimate per action.
    fn cpu(&self, trx: &SignedTransaction) -> u64 {
        let units = trx.trx.actions.len() as u64 * 100;
        units * self.config.base_cpu_charge_factor as u64
    }

    pub fn charge(&self, trx: &SignedTransaction, packed_size: usize) -> u64 {
        let sig_count = trx.signatures.len() as u64;
        let base =
            self.network(packed_size as u64, sig_count) + self.storage(trx) + self.cpu(trx);
        base * self.config.global_charge_factor as u64 / 10_000
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use jmzk_core::address::Address;
    use jmzk_core::transaction::{Action, Transaction};
    use jmzk_core::types::Signature;
    use jmzk_core::{n, n128};

    fn trx(n_actions: usize, data_len: usize, n_sigs: usize) -> SignedTransaction {
        let actions = (0..n_actions)
            .map(|_| Action {
                name: n!("transferft"),
                domain: n128!(".fungible"),
                key: n128!("1"),
                data: vec![0u8; data_len],
            })
            .collect();
        SignedTransaction {
            trx: Transaction {
                expiration: 0,
                ref_block_num: 0,
                ref_block_prefix: 0,
                actions,
                payer: Address::Reserved,
                max_charge: u64::MAX,
            },
            signatures: vec![Signature { rs: [0; 64], recovery: 0 }; n_sigs],
        }
    }

    #[test]
    fn scales_with_size_and_signatures() {
        let config = ChainConfig::default();
        let cm = ChargeManager::new(&config);
        let small = cm.charge(&trx(1, 16, 1), 100);
        let more_data = cm.charge(&trx(1, 160, 1), 244);
        let more_sigs = cm.charge(&trx(1, 16, 3), 100);
        assert!(more_data > small);
        assert!(more_sigs > small);
    }

    #[test]
    fn factors_scale_linearly() {
        let mut config = ChainConfig::default();
        let base = ChargeManager::new(&config).charge(&trx(2, 32, 1), 200);
        config.global_charge_factor *= 2;
        let doubled = ChargeManager::new(&config).charge(&trx(2, 32, 1), 200);
        assert_eq!(doubled, base * 2);
    }

    #[test]
    fn default_factors_are_nonzero() {
        let config = ChainConfig::default();
        assert!(ChargeManager::new(&config).charge(&trx(1, 0, 1), 64) > 0);
    }
}
