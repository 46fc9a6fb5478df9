use bondgraph_core::Address;
use serde::{Deserialize, Serialize};

/// Delegators carried over from the L1 deployment when arbitrum-one went
/// live.
pub const ARBITRUM_ONE_DELEGATORS: u64 = 3520;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NetworkConfig {
    pub name: String,

    /// When set, poll watchers only react to logs emitted by this address.
    #[serde(default)]
    pub bonding_manager: Option<Address>,

    /// Uniswap v3 style LPT/ETH pool used to price LPT at each round.
    #[serde(default)]
    pub lpt_eth_pool: Option<Address>,

    /// Uniswap v3 style DAI/ETH pool used to value ticket redemptions in USD.
    #[serde(default)]
    pub dai_eth_pool: Option<Address>,

    /// Starting value of the protocol's delegator counter.
    #[serde(default)]
    pub initial_delegators_count: u64,
}

impl NetworkConfig {
    pub fn arbitrum_one() -> Self {
        Self {
            name: "arbitrum-one".into(),
            bonding_manager: "0x35bcf3c30594191d53231e4ff333e8a770453e40".parse().ok(),
            lpt_eth_pool: "0x4fd47e5102dfbf95541f64ed6fe13d4ed26d2546".parse().ok(),
            dai_eth_pool: "0xa961f0473da4864c5ed28e00fcc53a3aab056c1b".parse().ok(),
            initial_delegators_count: ARBITRUM_ONE_DELEGATORS,
        }
    }

    /// Whether a log emitted at `address` can drive poll watchers.
    pub fn is_bonding_manager(&self, address: &Address) -> bool {
        match &self.bonding_manager {
            Some(expected) => expected == address,
            None => true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "devnet".into(),
            bonding_manager: None,
            lpt_eth_pool: None,
            dai_eth_pool: None,
            initial_delegators_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_network_has_pools() {
        let config = NetworkConfig::arbitrum_one();

        assert!(config.lpt_eth_pool.is_some());
        assert!(config.dai_eth_pool.is_some());
        assert_eq!(config.initial_delegators_count, 3520);
    }

    #[test]
    fn unset_bonding_manager_accepts_any_emitter() {
        let mut config = NetworkConfig::default();
        let emitter = Address::repeat_byte(7);

        assert!(config.is_bonding_manager(&emitter));

        config.bonding_manager = Some(Address::repeat_byte(8));
        assert!(!config.is_bonding_manager(&emitter));
    }
}
