//! The WASM kernel host: ABI linking, preimage resolution, and the
//! deterministic `execute`/`execute_and_inspect` entrypoints.
//!
//! The kernel module itself is an opaque black box; this crate only
//! implements the host side of the contract it must uphold.

#![warn(missing_docs)]

mod error;
mod host;
mod module;
mod preimages;
mod runner;

pub use error::KernelError;
pub use module::{KernelModule, ModuleDigest};
pub use preimages::PreimageResolver;
pub use runner::{ExecutionOutcome, InboxMessage, KernelRunner, SimulationInput};

#[cfg(test)]
mod tests {
    use super::*;
    use evmnode_store::StateSnapshot;

    /// A minimal guest exporting the five host imports and a `kernel_run`
    /// that writes one fixed key, read back via `reveal_preimage` and
    /// `store_read`/`store_write` to exercise the whole ABI.
    const DETERMINISM_WAT: &str = r#"
        (module
            (import "env" "store_write" (func $store_write (param i32 i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "/counter")
            (data (i32.const 16) "\01")
            (func (export "kernel_run")
                (call $store_write (i32.const 0) (i32.const 8) (i32.const 16) (i32.const 1)))
        )
    "#;

    /// A guest that additionally reports producing one block by writing
    /// its (fixed, all-`0x42`) hash via `write_output`.
    const PRODUCES_ONE_BLOCK_WAT: &str = r#"
        (module
            (import "env" "store_write" (func $store_write (param i32 i32 i32 i32)))
            (import "env" "write_output" (func $write_output (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "/counter")
            (data (i32.const 16) "\01")
            (data (i32.const 32) "\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42\42")
            (func (export "kernel_run")
                (call $store_write (i32.const 0) (i32.const 8) (i32.const 16) (i32.const 1))
                (call $write_output (i32.const 32) (i32.const 32)))
        )
    "#;

    fn runner_with(wat: &str) -> KernelRunner {
        let dir = tempfile::tempdir().unwrap();
        let module_path = dir.path().join("kernel.wat");
        std::fs::write(&module_path, wat).unwrap();
        let preimages = PreimageResolver::new(dir.path().join("preimages"), None);
        KernelRunner::new(module_path, preimages).unwrap()
    }

    fn runner() -> KernelRunner {
        runner_with(DETERMINISM_WAT)
    }

    #[test]
    fn execute_writes_expected_key() {
        let runner = runner();
        let state = StateSnapshot::new();
        let outcome = runner.execute(&state, &[]).unwrap();
        assert_eq!(outcome.state.get("/counter"), Some(&vec![1]));
        assert!(outcome.produced_blocks.is_empty());
    }

    #[test]
    fn execute_is_deterministic_across_runs() {
        let runner = runner();
        let state = StateSnapshot::new();
        let a = runner.execute(&state, &[]).unwrap();
        let b = runner.execute(&state, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn execute_and_inspect_does_not_require_commit() {
        let runner = runner();
        let state = StateSnapshot::new();
        let insights = runner
            .execute_and_inspect(
                &state,
                SimulationInput { insight_paths: vec!["/counter".to_string()], ..Default::default() },
            )
            .unwrap();
        assert_eq!(insights, vec![Some(vec![1])]);
        // the input snapshot itself is untouched; only a local clone was mutated
        assert!(state.is_empty());
    }

    #[test]
    fn execute_reports_produced_block_hashes() {
        let runner = runner_with(PRODUCES_ONE_BLOCK_WAT);
        let state = StateSnapshot::new();
        let outcome = runner.execute(&state, &[]).unwrap();
        assert_eq!(outcome.produced_blocks.len(), 1);
        assert_eq!(outcome.produced_blocks[0].as_bytes(), &[0x42u8; 32]);
    }
}
