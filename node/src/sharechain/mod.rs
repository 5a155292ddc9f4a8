//! The pool's share chain, seen from the stratum side.
//!
//! Only the parts the stratum server talks to exist so far: the current share
//! target and the work/submission interface. Recording shares and computing
//! payouts is not done here.
use crate::error::ShareChainError;
use crate::target::{Target, ROOT_DEPTH};
use async_trait::async_trait;
use num::{BigInt, BigRational};
use std::sync::RwLock;

/// Number of shares kept; at two shares a minute this covers four days.
pub const SHARE_CHAIN_LENGTH: usize = 2 * 1440 * 4;
/// Target seconds between two shares.
pub const SHARE_TIME: u64 = 30;
/// Sized for a 1 GH/s miner to find two shares a day.
pub const START_HASHES_PER_SHARE: u64 = 1_000_000_000 * 3600 * 24 / 2;

/// Share target the chain starts from, [`ROOT_DEPTH`] made
/// [`START_HASHES_PER_SHARE`] times harder.
pub fn start_target() -> Target {
    let difficulty = BigRational::from_integer(BigInt::from(START_HASHES_PER_SHARE));
    ROOT_DEPTH.mul_difficulty(&difficulty)
}

/// Header a miner grinds nonces on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_id: [u8; 32],
    pub nonce: [u8; 8],
    pub timestamp: u64,
    pub merkle_root: [u8; 32],
}

/// What the stratum server needs from the share chain.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Share target currently in force.
    fn target(&self) -> Target;

    /// Header template and target for a miner paying out to `payout_address`.
    async fn header_for_work(
        &self,
        payout_address: &str,
    ) -> Result<(BlockHeader, Target), ShareChainError>;

    /// Hands a solved header back for validation. `Ok(true)` means accepted.
    async fn submit_header(
        &self,
        payout_address: &str,
        header: BlockHeader,
    ) -> Result<bool, ShareChainError>;
}

#[derive(Debug)]
pub struct ShareChain {
    target: RwLock<Target>,
}

impl ShareChain {
    pub fn new() -> Self {
        let target = start_target();
        tracing::info!(%target, "Share chain starting");
        ShareChain {
            target: RwLock::new(target),
        }
    }

    pub fn set_target(&self, target: Target) {
        tracing::info!(%target, "Share target changed");
        match self.target.write() {
            Ok(mut current) => *current = target,
            Err(poisoned) => *poisoned.into_inner() = target,
        }
    }
}

impl Default for ShareChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkSource for ShareChain {
    fn target(&self) -> Target {
        match self.target.read() {
            Ok(target) => *target,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn header_for_work(
        &self,
        payout_address: &str,
    ) -> Result<(BlockHeader, Target), ShareChainError> {
        let target = self.target();
        tracing::debug!(payout_address, %target, "Handing out an empty header template");
        Ok((BlockHeader::default(), target))
    }

    async fn submit_header(
        &self,
        payout_address: &str,
        _header: BlockHeader,
    ) -> Result<bool, ShareChainError> {
        tracing::debug!(payout_address, "Rejecting header submission");
        Err(ShareChainError::SubmissionUnsupported)
    }
}
