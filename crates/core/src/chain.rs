use std::fmt::{self, Display};

use alloy_chains::{self, NamedChain};
use color_eyre::eyre::{self, eyre};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chain {
    pub name: String,
    pub metadata: alloy_chains::Chain,
}

impl Chain {
    pub fn new(name: &str) -> eyre::Result<Self> {
        let metadata = match name {
            "bsc" | "binance" => alloy_chains::Chain::from(NamedChain::BinanceSmartChain),
            "bsc-testnet" => alloy_chains::Chain::from(NamedChain::BinanceSmartChainTestnet),
            "ethereum" | "mainnet" => alloy_chains::Chain::from(NamedChain::Mainnet),
            _ => return Err(eyre!("unsupported chain {}", name)),
        };

        Ok(Self {
            name: name.to_string(),
            metadata,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.metadata.id()
    }
}

impl Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id={})", self.name, self.chain_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_names_resolve() {
        assert_eq!(Chain::new("bsc").unwrap().chain_id(), 56);
        assert_eq!(Chain::new("bsc-testnet").unwrap().chain_id(), 97);
        assert_eq!(Chain::new("ethereum").unwrap().chain_id(), 1);
    }

    #[test]
    fn unknown_chain_name_is_rejected() {
        assert!(Chain::new("dogechain").is_err());
    }
}
