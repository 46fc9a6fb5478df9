use bondgraph_core::{Address, U256};
use bondgraph_livepeer::ids;

pub mod chain;
pub mod simulator;

pub use chain::{ChainState, MockChain};
pub use simulator::Simulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAddress {
    Alice,
    Bob,
    Carol,
    Dave,
    Eve,
    Custom(u8),
}

impl TestAddress {
    pub fn everyone() -> Vec<Self> {
        vec![
            TestAddress::Alice,
            TestAddress::Bob,
            TestAddress::Carol,
            TestAddress::Dave,
            TestAddress::Eve,
        ]
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            TestAddress::Alice => 1,
            TestAddress::Bob => 2,
            TestAddress::Carol => 3,
            TestAddress::Dave => 4,
            TestAddress::Eve => 5,
            TestAddress::Custom(x) => *x,
        }
    }

    pub fn address(&self) -> Address {
        let mut bytes = [0xa0; 20];
        bytes[19] = self.ordinal();
        Address::new(bytes)
    }

    /// Key of the entities stored for this address.
    pub fn id(&self) -> String {
        ids::address_id(&self.address())
    }
}

impl From<TestAddress> for Address {
    fn from(value: TestAddress) -> Self {
        value.address()
    }
}

/// Raw amount of `whole` tokens with 18 decimals.
pub fn lpt(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18u8))
}
