//! ERC-20 spend approval: the precondition for any sell-side trade.

use alloy::{
    primitives::{Address, U256},
    providers::Provider,
};
use async_trait::async_trait;
use color_eyre::eyre::{self, WrapErr as _, bail};
use tracing::{debug, info, instrument};

use crate::abi::IErc20;

/// Token contract operations the allowance manager needs. Seam for tests.
#[async_trait]
pub trait TokenOps: Send + Sync {
    async fn allowance(&self, owner: Address, spender: Address) -> eyre::Result<U256>;

    /// Submits an approval and returns the receipt status.
    async fn approve(&self, spender: Address, amount: U256) -> eyre::Result<bool>;

    async fn balance_of(&self, account: Address) -> eyre::Result<U256>;

    async fn symbol(&self) -> eyre::Result<String>;
}

pub struct Erc20Token<P> {
    token: IErc20::IErc20Instance<P>,
}

impl<P: Provider> Erc20Token<P> {
    pub fn new(token: Address, provider: P) -> Self {
        Self {
            token: IErc20::new(token, provider),
        }
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> TokenOps for Erc20Token<P> {
    async fn allowance(&self, owner: Address, spender: Address) -> eyre::Result<U256> {
        self.token
            .allowance(owner, spender)
            .call()
            .await
            .wrap_err("allowance read failed")
    }

    async fn approve(&self, spender: Address, amount: U256) -> eyre::Result<bool> {
        let receipt = self
            .token
            .approve(spender, amount)
            .send()
            .await
            .wrap_err("approval submission failed")?
            .get_receipt()
            .await
            .wrap_err("approval receipt failed")?;
        Ok(receipt.status())
    }

    async fn balance_of(&self, account: Address) -> eyre::Result<U256> {
        self.token
            .balanceOf(account)
            .call()
            .await
            .wrap_err("balance read failed")
    }

    async fn symbol(&self) -> eyre::Result<String> {
        self.token.symbol().call().await.wrap_err("symbol read failed")
    }
}

pub struct AllowanceManager<T> {
    token: T,
    owner: Address,
    spender: Address,
}

impl<T: TokenOps> AllowanceManager<T> {
    pub fn new(token: T, owner: Address, spender: Address) -> Self {
        Self {
            token,
            owner,
            spender,
        }
    }

    /// Reads the current allowance and, if it differs from `desired`,
    /// submits an approval and re-reads to confirm. An approval that does
    /// not land is an error; callers must not proceed to a sell-side trade
    /// on failure.
    #[instrument(skip(self), fields(owner = %self.owner, spender = %self.spender))]
    pub async fn ensure_allowance(&self, desired: U256) -> eyre::Result<U256> {
        let current = self
            .token
            .allowance(self.owner, self.spender)
            .await
            .wrap_err("allowance pre-check failed")?;

        if current == desired {
            debug!(%current, "allowance already at the desired amount");
            return Ok(current);
        }

        info!(%current, %desired, "granting spend approval");
        if !self
            .token
            .approve(self.spender, desired)
            .await
            .wrap_err("approval failed")?
        {
            bail!("approval transaction reverted");
        }

        let confirmed = self
            .token
            .allowance(self.owner, self.spender)
            .await
            .wrap_err("allowance confirmation failed")?;
        if confirmed != desired {
            bail!("allowance is {confirmed} after approval, expected {desired}");
        }

        info!(%confirmed, "spend approval confirmed");
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use color_eyre::eyre::eyre;

    use super::*;

    struct FakeToken {
        allowance: Mutex<U256>,
        approvals: Mutex<u32>,
        approve_succeeds: bool,
    }

    impl FakeToken {
        fn with_allowance(allowance: U256) -> Self {
            Self {
                allowance: Mutex::new(allowance),
                approvals: Mutex::new(0),
                approve_succeeds: true,
            }
        }

        fn approvals(&self) -> u32 {
            *self.approvals.lock().unwrap()
        }
    }

    #[async_trait]
    impl TokenOps for &FakeToken {
        async fn allowance(&self, _owner: Address, _spender: Address) -> eyre::Result<U256> {
            Ok(*self.allowance.lock().unwrap())
        }

        async fn approve(&self, _spender: Address, amount: U256) -> eyre::Result<bool> {
            *self.approvals.lock().unwrap() += 1;
            if self.approve_succeeds {
                *self.allowance.lock().unwrap() = amount;
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn balance_of(&self, _account: Address) -> eyre::Result<U256> {
            Err(eyre!("unused"))
        }

        async fn symbol(&self) -> eyre::Result<String> {
            Err(eyre!("unused"))
        }
    }

    fn manager(token: &FakeToken) -> AllowanceManager<&FakeToken> {
        AllowanceManager::new(
            token,
            Address::with_last_byte(1),
            Address::with_last_byte(2),
        )
    }

    #[tokio::test]
    async fn differing_allowance_triggers_exactly_one_approval() {
        let token = FakeToken::with_allowance(U256::ZERO);
        let desired = U256::from(1_000u64);

        let granted = manager(&token).ensure_allowance(desired).await.unwrap();

        assert_eq!(granted, desired);
        assert_eq!(token.approvals(), 1);
    }

    #[tokio::test]
    async fn ensure_allowance_is_idempotent() {
        let token = FakeToken::with_allowance(U256::ZERO);
        let desired = U256::from(1_000u64);
        let manager = manager(&token);

        manager.ensure_allowance(desired).await.unwrap();
        assert_eq!(token.approvals(), 1);

        // second call finds the allowance already in place: no chain write
        let granted = manager.ensure_allowance(desired).await.unwrap();
        assert_eq!(granted, desired);
        assert_eq!(token.approvals(), 1);
    }

    #[tokio::test]
    async fn matching_allowance_performs_no_write() {
        let desired = U256::from(500u64);
        let token = FakeToken::with_allowance(desired);

        manager(&token).ensure_allowance(desired).await.unwrap();

        assert_eq!(token.approvals(), 0);
    }

    #[tokio::test]
    async fn reverted_approval_is_an_error() {
        let mut token = FakeToken::with_allowance(U256::ZERO);
        token.approve_succeeds = false;

        let result = manager(&token).ensure_allowance(U256::from(9u64)).await;

        assert!(result.is_err());
    }
}
