//! In-memory chain fakes shared by the scanner, poller and monitor tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolCall as _,
};
use async_trait::async_trait;
use color_eyre::eyre::{self, eyre};

use crate::{
    abi::IDexRouter,
    endpoint::{BlockBody, BlockStamp, ChainRead, TxRecord},
};

/// Clones share the underlying state, so a test can keep a probe handle
/// while the worker owns the reader.
#[derive(Clone)]
pub(crate) struct FakeChain {
    label: String,
    state: Arc<Mutex<State>>,
}

struct State {
    heights: Vec<Result<u64, String>>,
    next_height: usize,
    blocks: BTreeMap<u64, BlockBody>,
    // remaining "not yet available" responses per height
    header_misses: HashMap<u64, u32>,
    header_fetches: Vec<u64>,
}

impl FakeChain {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            state: Arc::new(Mutex::new(State {
                heights: Vec::new(),
                next_height: 0,
                blocks: BTreeMap::new(),
                header_misses: HashMap::new(),
                header_fetches: Vec::new(),
            })),
        }
    }

    /// Scripts the responses to `latest_height`, in order. The last entry
    /// repeats once the script runs out.
    pub(crate) fn with_heights(self, heights: Vec<Result<u64, String>>) -> Self {
        self.state.lock().unwrap().heights = heights;
        self
    }

    pub(crate) fn with_block(self, block: BlockBody) -> Self {
        self.state.lock().unwrap().blocks.insert(block.height, block);
        self
    }

    /// The block at `height` reports "not yet available" for the first
    /// `misses` header fetches.
    pub(crate) fn with_header_misses(self, height: u64, misses: u32) -> Self {
        self.state.lock().unwrap().header_misses.insert(height, misses);
        self
    }

    /// Heights whose headers were requested, in request order.
    pub(crate) fn header_fetches(&self) -> Vec<u64> {
        self.state.lock().unwrap().header_fetches.clone()
    }
}

#[async_trait]
impl ChainRead for FakeChain {
    fn label(&self) -> &str {
        &self.label
    }

    async fn latest_height(&self) -> eyre::Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.heights.is_empty() {
            return Err(eyre!("{}: no scripted heights", self.label));
        }
        let idx = state.next_height.min(state.heights.len() - 1);
        state.next_height += 1;
        match &state.heights[idx] {
            Ok(height) => Ok(*height),
            Err(message) => Err(eyre!("{}: {message}", self.label)),
        }
    }

    async fn header(&self, height: u64) -> eyre::Result<Option<BlockStamp>> {
        let mut state = self.state.lock().unwrap();
        state.header_fetches.push(height);
        if let Some(misses) = state.header_misses.get_mut(&height) {
            if *misses > 0 {
                *misses -= 1;
                return Ok(None);
            }
        }
        Ok(state.blocks.get(&height).map(|block| BlockStamp {
            height: block.height,
            timestamp: block.timestamp,
        }))
    }

    async fn block_with_txs(&self, height: u64) -> eyre::Result<Option<BlockBody>> {
        let state = self.state.lock().unwrap();
        Ok(state.blocks.get(&height).cloned())
    }
}

pub(crate) fn empty_block(height: u64) -> BlockBody {
    BlockBody {
        height,
        timestamp: 1_700_000_000 + height,
        transactions: Vec::new(),
    }
}

pub(crate) fn block_with(height: u64, transactions: Vec<TxRecord>) -> BlockBody {
    BlockBody {
        height,
        timestamp: 1_700_000_000 + height,
        transactions,
    }
}

pub(crate) fn in_ether(units: u64) -> U256 {
    U256::from(units) * U256::from(10u64).pow(U256::from(18u64))
}

pub(crate) fn add_liquidity_eth_tx(
    hash_byte: u8,
    router: Address,
    token: Address,
    token_amount: U256,
    eth_amount: U256,
) -> TxRecord {
    let call = IDexRouter::addLiquidityETHCall {
        token,
        amountTokenDesired: token_amount,
        amountTokenMin: token_amount,
        amountETHMin: eth_amount,
        to: Address::ZERO,
        deadline: U256::ZERO,
    };
    TxRecord {
        hash: B256::with_last_byte(hash_byte),
        to: Some(router),
        input: call.abi_encode().into(),
    }
}

pub(crate) fn add_liquidity_tx(
    hash_byte: u8,
    router: Address,
    token_a: Address,
    token_b: Address,
    amount_a: U256,
    amount_b: U256,
) -> TxRecord {
    let call = IDexRouter::addLiquidityCall {
        tokenA: token_a,
        tokenB: token_b,
        amountADesired: amount_a,
        amountBDesired: amount_b,
        amountAMin: amount_a,
        amountBMin: amount_b,
        to: Address::ZERO,
        deadline: U256::ZERO,
    };
    TxRecord {
        hash: B256::with_last_byte(hash_byte),
        to: Some(router),
        input: call.abi_encode().into(),
    }
}
