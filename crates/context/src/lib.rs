//! The EVM context: the single writer that owns the durable store, the
//! aux index, and the kernel runner, and serializes every state
//! transition through them.
//!
//! `bin/evmnode` constructs exactly one [`EvmContext`] per process and
//! hands it to whichever of the producer/publisher/follower/observer
//! loops the configured mode needs.

#![warn(missing_docs)]

mod context;
mod error;
mod state;

pub use context::{build_payload, ApplyOutcome, EvmContext, ReplayOutcome};
pub use error::ContextError;
pub use state::EvmState;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use alloy_primitives::{Address, Bytes};
    use evmnode_primitives::{DelayedTx, Quantity, RollupAddress, GENESIS_PARENT_HASH};

    use super::*;

    const PRODUCES_ONE_BLOCK_WAT: &str = r#"
        (module
            (import "env" "write_output" (func $write_output (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42")
            (func (export "kernel_run")
                (call $write_output (i32.const 0) (i32.const 32)))
        )
    "#;

    const REJECTS_EVERYTHING_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "kernel_run"))
        )
    "#;

    fn write_kernel(dir: &std::path::Path, wat: &str) -> PathBuf {
        let path = dir.join("kernel.wat");
        std::fs::write(&path, wat).unwrap();
        path
    }

    fn test_context(wat: &str) -> (EvmContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kernel_path = write_kernel(dir.path(), wat);
        let rollup_address = RollupAddress::from(Address::repeat_byte(7));
        let (ctx, loaded) = EvmContext::init_in_memory(kernel_path, rollup_address).unwrap();
        assert!(!loaded);
        (ctx, dir)
    }

    #[test]
    fn cold_start_produces_genesis_state() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        assert_eq!(ctx.next_blueprint_number(), Quantity::ZERO);
        assert_eq!(ctx.current_block_hash(), GENESIS_PARENT_HASH);
    }

    #[test]
    fn apply_blueprint_commits_single_block() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let payload = build_payload(vec![], vec![]);
        let outcome = ctx.apply_blueprint(Quantity::ZERO, 1_700_000_000, &payload).unwrap();
        match outcome {
            ApplyOutcome::Applied { block_hash, .. } => {
                assert_eq!(block_hash.as_bytes(), &[0x42u8; 32]);
            }
            ApplyOutcome::Rejected { .. } => panic!("expected Applied"),
        }
        assert_eq!(ctx.next_blueprint_number(), Quantity::ZERO.next());
        assert_eq!(ctx.current_block_hash().as_bytes(), &[0x42u8; 32]);
    }

    #[test]
    fn duplicate_apply_is_idempotent() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let payload = build_payload(vec![], vec![]);
        let first = ctx.apply_blueprint(Quantity::ZERO, 1, &payload).unwrap();
        let second = ctx.apply_blueprint(Quantity::ZERO, 1, &payload).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.next_blueprint_number(), Quantity::ZERO.next());
    }

    #[test]
    fn duplicate_apply_with_different_payload_is_rejected() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let payload = build_payload(vec![], vec![]);
        ctx.apply_blueprint(Quantity::ZERO, 1, &payload).unwrap();

        let other_payload = build_payload(vec![Bytes::from_static(b"tx")], vec![]);
        let err = ctx.apply_blueprint(Quantity::ZERO, 1, &other_payload).unwrap_err();
        assert!(matches!(err, ContextError::NumberMismatch { .. }));
    }

    #[test]
    fn future_number_is_rejected() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let payload = build_payload(vec![], vec![]);
        let err = ctx.apply_blueprint(Quantity::from(5), 1, &payload).unwrap_err();
        assert!(matches!(err, ContextError::NumberMismatch { expected, got } if expected == Quantity::ZERO && got == Quantity::from(5)));
    }

    #[test]
    fn zero_blocks_is_rejected_without_committing() {
        let (ctx, _dir) = test_context(REJECTS_EVERYTHING_WAT);
        let payload = build_payload(vec![], vec![]);
        let outcome = ctx.apply_blueprint(Quantity::ZERO, 1, &payload).unwrap();
        assert_eq!(outcome, ApplyOutcome::Rejected { number: Quantity::ZERO });
        assert_eq!(ctx.next_blueprint_number(), Quantity::ZERO);
    }

    #[test]
    fn rejected_blueprint_keeps_queued_events_for_next_attempt() {
        let (ctx, _dir) = test_context(REJECTS_EVERYTHING_WAT);
        ctx.apply_evm_events(vec![evmnode_kernel::InboxMessage(b"delayed-event".to_vec())]);
        let payload = build_payload(vec![], vec![]);
        ctx.apply_blueprint(Quantity::ZERO, 1, &payload).unwrap();
        // events survive a rejection; a later successful apply will still carry them.
        assert_eq!(ctx.next_blueprint_number(), Quantity::ZERO);
    }

    #[test]
    fn last_produced_blueprint_reflects_committed_payload() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let delayed = vec![DelayedTx {
            hash: evmnode_primitives::TxHash::from(alloy_primitives::B256::repeat_byte(9)),
            raw: Bytes::from_static(b"delayed-tx"),
        }];
        let payload = build_payload(vec![Bytes::from_static(b"raw-tx")], delayed.clone());
        ctx.apply_blueprint(Quantity::ZERO, 42, &payload).unwrap();

        let blueprint = ctx.last_produced_blueprint().unwrap();
        assert_eq!(blueprint.number, Quantity::ZERO);
        assert_eq!(blueprint.timestamp, 42);
        assert_eq!(blueprint.payload, payload);
        assert_eq!(blueprint.parent_hash, GENESIS_PARENT_HASH);
    }

    #[test]
    fn replay_reproduces_the_original_commit() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let payload = build_payload(vec![], vec![]);
        ctx.apply_blueprint(Quantity::ZERO, 1, &payload).unwrap();

        let outcome = ctx.replay(Quantity::ZERO, None).unwrap();
        assert!(matches!(outcome, ReplayOutcome::Success { .. }));
    }

    #[test]
    fn replay_against_altered_state_can_diverge() {
        let (ctx, _dir) = test_context(REJECTS_EVERYTHING_WAT);
        // a blueprint that was never applied has no record: replay must fail closed.
        let err = ctx.replay(Quantity::from(9), None).unwrap_err();
        assert!(matches!(err, ContextError::NotArchive(_)));
    }

    #[test]
    fn apply_and_publish_broadcasts_only_on_success() {
        let (ctx, _dir) = test_context(PRODUCES_ONE_BLOCK_WAT);
        let mut rx = ctx.subscribe_blueprints();
        let payload = build_payload(vec![], vec![]);
        let blueprint = evmnode_primitives::Blueprint {
            number: Quantity::ZERO,
            timestamp: 1,
            payload,
            parent_hash: GENESIS_PARENT_HASH,
        };
        ctx.apply_and_publish_blueprint(blueprint.clone(), vec![]).unwrap();
        let received = rx.try_recv().unwrap();
        assert_eq!(received.blueprint.number, Quantity::ZERO);
    }
}
