//! Chain-read access: the [`ChainRead`] seam the scanner and poller work
//! against, plus its alloy HTTP implementation.

use alloy::{
    consensus::Transaction as _,
    network::TransactionResponse as _,
    primitives::{Address, B256, Bytes},
    providers::{Provider as _, RootProvider},
};
use async_trait::async_trait;
use color_eyre::eyre::{self, WrapErr as _};

/// Header-level view of a block, fetched before the transaction bodies to
/// cheaply probe whether an endpoint has the height yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStamp {
    pub height: u64,
    pub timestamp: u64,
}

/// The transaction fields the scanner classifies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub hash: B256,
    pub to: Option<Address>,
    pub input: Bytes,
}

/// A block with full transaction bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBody {
    pub height: u64,
    pub timestamp: u64,
    pub transactions: Vec<TxRecord>,
}

/// Read-side chain access. `Ok(None)` from the block getters means the
/// endpoint has not synced to that height yet, as opposed to a transport
/// failure.
#[async_trait]
pub trait ChainRead: Send + Sync {
    fn label(&self) -> &str;

    async fn latest_height(&self) -> eyre::Result<u64>;

    async fn header(&self, height: u64) -> eyre::Result<Option<BlockStamp>>;

    async fn block_with_txs(&self, height: u64) -> eyre::Result<Option<BlockBody>>;
}

/// One HTTP JSON-RPC endpoint.
pub struct RpcEndpoint {
    url: String,
    provider: RootProvider,
}

impl RpcEndpoint {
    pub fn connect(url: &str) -> eyre::Result<Self> {
        let parsed = url
            .parse()
            .wrap_err_with(|| format!("invalid endpoint url {url}"))?;
        Ok(Self {
            url: url.to_string(),
            provider: RootProvider::new_http(parsed),
        })
    }
}

#[async_trait]
impl ChainRead for RpcEndpoint {
    fn label(&self) -> &str {
        &self.url
    }

    async fn latest_height(&self) -> eyre::Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("{}: get_block_number failed", self.url))
    }

    async fn header(&self, height: u64) -> eyre::Result<Option<BlockStamp>> {
        let block = self
            .provider
            .get_block_by_number(height.into())
            .await
            .wrap_err_with(|| format!("{}: header fetch for block {height} failed", self.url))?;

        Ok(block.map(|block| BlockStamp {
            height: block.header.number,
            timestamp: block.header.timestamp,
        }))
    }

    async fn block_with_txs(&self, height: u64) -> eyre::Result<Option<BlockBody>> {
        let Some(block) = self
            .provider
            .get_block_by_number(height.into())
            .full()
            .await
            .wrap_err_with(|| format!("{}: full fetch for block {height} failed", self.url))?
        else {
            return Ok(None);
        };

        let transactions = block
            .transactions
            .txns()
            .map(|tx| TxRecord {
                hash: tx.tx_hash(),
                to: tx.to(),
                input: tx.input().clone(),
            })
            .collect();

        Ok(Some(BlockBody {
            height: block.header.number,
            timestamp: block.header.timestamp,
            transactions,
        }))
    }
}

/// Health as observed by the poller. A degraded endpoint is skipped for the
/// cycle, never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Reachable,
    Degraded,
}

/// Per-endpoint bookkeeping owned by the poller.
pub struct Endpoint<R> {
    pub reader: R,
    pub health: Health,
    pub last_seen_height: Option<u64>,
}

impl<R> Endpoint<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            health: Health::Reachable,
            last_seen_height: None,
        }
    }
}
