pub mod abi;
pub mod allowance;
pub mod chain;
pub mod config;
pub mod endpoint;
pub mod events;
pub mod executor;
pub mod monitor;
pub mod poller;
pub mod retry;
pub mod scanner;

#[cfg(test)]
pub(crate) mod testutil;
