use alloy_primitives::Bytes;
use evmnode_primitives::{DelayedTx, Quantity};
use evmnode_rollup_client::RollupClient;
use serde::{Deserialize, Serialize};

use crate::error::FollowerError;

/// Everything the follower learned happened at one L1 level: new
/// delayed transactions, an optional kernel/sequencer upgrade, and an
/// optional finalization signal.
///
/// The wire shape is this node's own (`bincode`-encoded, following the
/// convention in `evmnode_primitives::payload`); the follower reads it
/// from the same durable-storage key/value surface the rollup client
/// already exposes (`GET .../durable/wasm_2_0_0/value`), under a
/// per-level key, rather than inventing a new consumed endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1LevelEvents {
    /// Delayed transactions the L1 inbox recorded at this level.
    pub delayed_transactions: Vec<DelayedTx>,
    /// A kernel/sequencer upgrade payload scheduled by this level, if any.
    pub kernel_upgrade: Option<Bytes>,
    /// The blueprint number this level finalizes, if it carries a
    /// finalization signal.
    pub finalized_blueprint: Option<Quantity>,
}

/// A source of L1-level events the follower polls. A trait boundary
/// rather than a concrete struct so observer-mode tests and the
/// production rollup-node-backed implementation share one contract.
#[async_trait::async_trait]
pub trait DelayedInboxSource: Send + Sync + std::fmt::Debug {
    /// Polls for the events recorded at `level`. Returns `Ok(None)` if
    /// the source has not observed `level` yet — the follower treats
    /// this as "caught up for now", not an error.
    async fn poll_level(&self, level: u64) -> Result<Option<L1LevelEvents>, FollowerError>;
}

/// The production [`DelayedInboxSource`]: reads L1 level events from the
/// rollup node's durable storage, one key per level.
#[derive(Debug)]
pub struct RollupNodeInboxSource {
    client: RollupClient,
}

impl RollupNodeInboxSource {
    /// Builds a source reading through `client`.
    #[must_use]
    pub const fn new(client: RollupClient) -> Self {
        Self { client }
    }

    fn durable_path(level: u64) -> String {
        format!("/evm/delayed_inbox/level/{level}")
    }
}

#[async_trait::async_trait]
impl DelayedInboxSource for RollupNodeInboxSource {
    async fn poll_level(&self, level: u64) -> Result<Option<L1LevelEvents>, FollowerError> {
        let raw = self
            .client
            .get_durable_value(&Self::durable_path(level))
            .await
            .map_err(|err| FollowerError::Source(Box::new(err)))?;
        let Some(raw) = raw else { return Ok(None) };
        bincode::deserialize(&raw)
            .map(Some)
            .map_err(|err| FollowerError::Decode(err.to_string()))
    }
}

/// An in-memory [`DelayedInboxSource`] for tests, shared by this
/// module's and the crate's integration tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FakeSource {
    pub levels: std::sync::Mutex<std::collections::BTreeMap<u64, L1LevelEvents>>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl DelayedInboxSource for FakeSource {
    async fn poll_level(&self, level: u64) -> Result<Option<L1LevelEvents>, FollowerError> {
        Ok(self.levels.lock().unwrap().get(&level).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_source_returns_none_past_its_levels() {
        let source = FakeSource::default();
        assert_eq!(source.poll_level(0).await.unwrap(), None);
    }
}
