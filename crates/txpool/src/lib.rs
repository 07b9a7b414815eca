//! A bounded, per-address FIFO pool of pending transactions.
//!
//! Block production consumes this pool as an input without prescribing
//! its shape beyond three configured limits (`tx_pool_timeout_limit`,
//! `tx_pool_addr_limit`, `tx_pool_tx_per_addr_limit`). This crate is
//! deliberately small: one FIFO queue in arrival order, with a count
//! per sender enforcing the per-address cap and a total distinct-sender
//! cap.

#![warn(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use alloy_primitives::{Address, Bytes};
use evmnode_primitives::TxHash;
use evmnode_tasks::GracefulShutdown;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

/// A transaction waiting to be included in a blueprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    /// Hash of the raw transaction, as reported by the submitter.
    pub hash: TxHash,
    /// The sender address, used for per-address bounding.
    pub sender: Address,
    /// Raw transaction bytes, kernel-decodable.
    pub raw: Bytes,
}

/// Errors returned by [`TxPool::insert`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxPoolError {
    /// The pool already tracks `tx_pool_addr_limit` distinct senders and
    /// `tx.sender` is not among them.
    #[error("tx pool address limit reached")]
    AddressLimitReached,
    /// `tx.sender` already has `tx_pool_tx_per_addr_limit` pending
    /// transactions.
    #[error("tx pool per-address limit reached for this sender")]
    PerAddressLimitReached,
}

/// The three configured bounds for the tx pool.
#[derive(Debug, Clone, Copy)]
pub struct TxPoolLimits {
    /// How long a transaction may sit in the pool before [`TxPool::sweep_expired`]
    /// evicts it.
    pub timeout: Duration,
    /// Maximum number of distinct sender addresses tracked at once.
    pub addr_limit: usize,
    /// Maximum number of pending transactions per sender address.
    pub tx_per_addr_limit: usize,
}

struct Inner {
    queue: VecDeque<(PendingTx, Instant)>,
    counts: HashMap<Address, usize>,
}

/// A bounded pool of pending transactions awaiting inclusion in a
/// blueprint, shared between the submission path (RPC, observer
/// forwarding) and the producer/observer loops that drain it.
pub struct TxPool {
    limits: TxPoolLimits,
    inner: Mutex<Inner>,
}

impl TxPool {
    /// Creates an empty pool with the given bounds.
    #[must_use]
    pub fn new(limits: TxPoolLimits) -> Self {
        Self { limits, inner: Mutex::new(Inner { queue: VecDeque::new(), counts: HashMap::new() }) }
    }

    /// Accepts `tx` into the pool if its sender is under the
    /// per-address limit and, for a new sender, the pool is under the
    /// distinct-address limit.
    pub fn insert(&self, tx: PendingTx) -> Result<(), TxPoolError> {
        let mut inner = self.inner.lock();
        let count = inner.counts.get(&tx.sender).copied().unwrap_or(0);
        if count == 0 && inner.counts.len() >= self.limits.addr_limit {
            return Err(TxPoolError::AddressLimitReached);
        }
        if count >= self.limits.tx_per_addr_limit {
            return Err(TxPoolError::PerAddressLimitReached);
        }
        *inner.counts.entry(tx.sender).or_insert(0) += 1;
        inner.queue.push_back((tx, Instant::now()));
        Ok(())
    }

    /// Removes and returns every pending transaction, in arrival order.
    ///
    /// Used by `produce_block` to gather the batch for the next
    /// blueprint.
    pub fn drain(&self) -> Vec<PendingTx> {
        let mut inner = self.inner.lock();
        inner.counts.clear();
        inner.queue.drain(..).map(|(tx, _)| tx).collect()
    }

    /// Re-inserts `tx` at the front of the queue, bypassing the
    /// capacity checks in [`Self::insert`] since it was already
    /// admitted once. Used when a blueprint is rejected and its delayed
    /// transactions must be retried.
    pub fn requeue_front(&self, tx: PendingTx) {
        let mut inner = self.inner.lock();
        *inner.counts.entry(tx.sender).or_insert(0) += 1;
        inner.queue.push_front((tx, Instant::now()));
    }

    /// Evicts transactions that have sat in the pool longer than
    /// `timeout`, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let timeout = self.limits.timeout;
        let now = Instant::now();
        let before = inner.queue.len();
        inner.queue.retain(|(_, received_at)| now.duration_since(*received_at) < timeout);
        let removed = before - inner.queue.len();
        if removed > 0 {
            inner.counts.clear();
            for (tx, _) in &inner.queue {
                *inner.counts.entry(tx.sender).or_insert(0) += 1;
            }
        }
        removed
    }

    /// Number of transactions currently pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// `true` if no transactions are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs [`Self::sweep_expired`] on a fixed tick until `shutdown`
    /// fires, enforcing `tx_pool_timeout_limit` for transactions that
    /// are never drained by a producer or observer (e.g. a rejected
    /// blueprint whose raw txs are dropped upstream of the pool, or a
    /// node that simply never produces a block).
    pub async fn run_sweep_loop(&self, shutdown: GracefulShutdown, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                () = shutdown.wait() => return,
                _ = interval.tick() => {}
            }
            let evicted = self.sweep_expired();
            if evicted > 0 {
                debug!(target: "tx-pool", evicted, "swept expired pending transactions");
            }
        }
    }
}

impl std::fmt::Debug for TxPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxPool").field("len", &self.len()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use std::sync::Arc;

    fn tx(sender: u8, seed: u8) -> PendingTx {
        PendingTx {
            hash: TxHash::from(B256::repeat_byte(seed)),
            sender: Address::repeat_byte(sender),
            raw: Bytes::from_static(b"tx"),
        }
    }

    fn pool(addr_limit: usize, tx_per_addr_limit: usize) -> TxPool {
        TxPool::new(TxPoolLimits { timeout: Duration::from_secs(3600), addr_limit, tx_per_addr_limit })
    }

    #[test]
    fn drain_returns_in_arrival_order() {
        let pool = pool(10, 10);
        pool.insert(tx(1, 1)).unwrap();
        pool.insert(tx(2, 2)).unwrap();
        pool.insert(tx(1, 3)).unwrap();
        let drained = pool.drain();
        assert_eq!(drained.iter().map(|t| t.hash).collect::<Vec<_>>(), vec![
            TxHash::from(B256::repeat_byte(1)),
            TxHash::from(B256::repeat_byte(2)),
            TxHash::from(B256::repeat_byte(3)),
        ]);
        assert!(pool.is_empty());
    }

    #[test]
    fn per_address_limit_is_enforced() {
        let pool = pool(10, 2);
        pool.insert(tx(1, 1)).unwrap();
        pool.insert(tx(1, 2)).unwrap();
        assert_eq!(pool.insert(tx(1, 3)), Err(TxPoolError::PerAddressLimitReached));
    }

    #[test]
    fn address_limit_rejects_new_senders_once_full() {
        let pool = pool(1, 10);
        pool.insert(tx(1, 1)).unwrap();
        assert_eq!(pool.insert(tx(2, 2)), Err(TxPoolError::AddressLimitReached));
        // the existing sender can still submit more
        pool.insert(tx(1, 3)).unwrap();
    }

    #[test]
    fn drain_resets_per_address_counts() {
        let pool = pool(1, 1);
        pool.insert(tx(1, 1)).unwrap();
        assert_eq!(pool.insert(tx(1, 2)), Err(TxPoolError::PerAddressLimitReached));
        pool.drain();
        pool.insert(tx(1, 3)).unwrap();
    }

    #[test]
    fn requeue_front_bypasses_limits_and_orders_first() {
        let pool = pool(10, 1);
        pool.insert(tx(1, 1)).unwrap();
        pool.requeue_front(tx(2, 2));
        let drained = pool.drain();
        assert_eq!(drained[0].sender, Address::repeat_byte(2));
    }

    #[test]
    fn sweep_expired_evicts_old_entries_only() {
        let pool = pool(10, 10);
        pool.insert(tx(1, 1)).unwrap();
        // freshly inserted, nothing should expire yet under a long timeout
        assert_eq!(pool.sweep_expired(), 0);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_loop_evicts_expired_entries_on_tick() {
        let pool = Arc::new(TxPool::new(TxPoolLimits {
            timeout: Duration::from_millis(100),
            addr_limit: 10,
            tx_per_addr_limit: 10,
        }));
        pool.insert(tx(1, 1)).unwrap();

        let manager = evmnode_tasks::TaskManager::new(Duration::from_millis(200));
        let shutdown = manager.executor().shutdown_signal();
        let loop_pool = pool.clone();
        let handle = tokio::spawn(async move { loop_pool.run_sweep_loop(shutdown, Duration::from_millis(10)).await });

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(pool.is_empty());

        handle.abort();
    }
}
