use std::{collections::HashMap, path::PathBuf};

use alloy_primitives::B256;
use evmnode_primitives::{BlockHash, TxHash};
use evmnode_store::StateSnapshot;
use wasmtime::{Engine, Linker, Store};

use crate::{
    error::KernelError,
    host::{link_host_functions, Host},
    module::KernelModule,
    preimages::PreimageResolver,
};

/// An opaque inbox message, tagged `Input`. The kernel decides how to
/// interpret its bytes; the runner only ever forwards them.
#[derive(Debug, Clone)]
pub struct InboxMessage(pub Vec<u8>);

/// A simulation-only invocation: drives the kernel with inbox messages
/// and/or extra reveal pages, then reads back a list of paths from the
/// resulting (never persisted) state.
#[derive(Debug, Clone, Default)]
pub struct SimulationInput {
    /// Entrypoint to call; defaults to `kernel_run` if unset.
    pub entrypoint: Option<String>,
    /// Inbox messages to feed before the entrypoint is invoked.
    pub messages: Vec<InboxMessage>,
    /// Preimages supplied directly, bypassing cache and endpoint lookup.
    pub reveals: Vec<(TxHash, Vec<u8>)>,
    /// Paths to read from the resulting state, in order. A missing path
    /// maps to `None` in the returned vector rather than an error.
    pub insight_paths: Vec<String>,
    /// Optional path to write a per-run debug log to.
    pub debug_log: Option<PathBuf>,
}

/// Runs a loaded kernel module against a [`StateSnapshot`].
///
/// Every method is a pure function of its state and inputs: neither
/// `execute` nor `execute_and_inspect` touches a [`evmnode_store::ContentStore`]
/// themselves. The caller decides whether and how to persist the
/// resulting snapshot, matching a `run`/`commit` split.
pub struct KernelRunner {
    engine: Engine,
    module: KernelModule,
    linker: Linker<Host>,
    preimages: PreimageResolver,
}

impl KernelRunner {
    /// Loads `module_path` and prepares a runner backed by `preimages`.
    ///
    /// Fails with [`KernelError::AbiMismatch`] only lazily, at the first
    /// `execute*` call, since wasmtime only discovers a missing entrypoint
    /// at instantiation/lookup time.
    pub fn new(module_path: impl AsRef<std::path::Path>, preimages: PreimageResolver) -> Result<Self, KernelError> {
        let engine = Engine::default();
        let module = KernelModule::load(&engine, module_path)?;

        let mut linker = Linker::new(&engine);
        link_host_functions(&mut linker)?;

        Ok(Self { engine, module, linker, preimages })
    }

    /// The loaded module's content digest, recorded alongside committed
    /// state so a restart can detect a kernel swap.
    #[must_use]
    pub fn module_digest(&self) -> crate::module::ModuleDigest {
        self.module.digest()
    }

    /// Runs `kernel_run` over `state` with `messages`.
    ///
    /// The guest signals how many blocks it produced by writing one
    /// 32-byte block hash per produced block via `write_output`; the
    /// runner never interprets the state itself. Persisting the
    /// resulting state is the caller's responsibility.
    pub fn execute(&self, state: &StateSnapshot, messages: &[InboxMessage]) -> Result<ExecutionOutcome, KernelError> {
        let outcome = self.invoke("kernel_run", state, messages, &[], None)?;
        let produced_blocks = outcome
            .output
            .chunks_exact(32)
            .map(|chunk| BlockHash::from(B256::from_slice(chunk)))
            .collect();
        Ok(ExecutionOutcome { state: outcome.state, produced_blocks })
    }

    /// Runs a simulation entrypoint and reads back `input.insight_paths`
    /// from the resulting state without ever persisting it.
    pub fn execute_and_inspect(
        &self,
        state: &StateSnapshot,
        input: SimulationInput,
    ) -> Result<Vec<Option<Vec<u8>>>, KernelError> {
        let entrypoint = input.entrypoint.as_deref().unwrap_or("kernel_run");
        let outcome = self.invoke(
            entrypoint,
            state,
            &input.messages,
            &input.reveals,
            input.debug_log.as_deref(),
        )?;
        Ok(input.insight_paths.iter().map(|path| outcome.state.get(path).cloned()).collect())
    }

    fn invoke(
        &self,
        entrypoint: &str,
        state: &StateSnapshot,
        messages: &[InboxMessage],
        reveals: &[(TxHash, Vec<u8>)],
        debug_log: Option<&std::path::Path>,
    ) -> Result<InvokeOutcome, KernelError> {
        let debug_log_file = debug_log.map(std::fs::File::create).transpose()?;
        let reveal_overrides: HashMap<_, _> = reveals.iter().cloned().collect();
        let host = Host::new(
            state.clone(),
            messages.iter().map(|m| m.0.clone()),
            self.preimages.clone(),
            reveal_overrides,
            debug_log_file,
        );

        let mut store = Store::new(&self.engine, host);
        let instance = self
            .linker
            .instantiate(&mut store, &self.module.module)
            .map_err(|err| KernelError::AbiMismatch(err.to_string()))?;
        let entry = instance
            .get_typed_func::<(), ()>(&mut store, entrypoint)
            .map_err(|err| KernelError::AbiMismatch(format!("missing entrypoint {entrypoint}: {err}")))?;
        entry.call(&mut store, ())?;

        let host = store.into_data();
        Ok(InvokeOutcome { state: host.state, output: host.output })
    }
}

struct InvokeOutcome {
    state: StateSnapshot,
    output: Vec<u8>,
}

/// The result of [`KernelRunner::execute`]: the new state plus the block
/// hashes the guest reported having produced, in order.
///
/// `evmnode-context` uses `produced_blocks.len()` to distinguish the
/// zero/one/many-block edge cases `apply_blueprint` must handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// The state after running the kernel.
    pub state: StateSnapshot,
    /// Block hashes the guest reported producing, in order.
    pub produced_blocks: Vec<BlockHash>,
}

impl std::fmt::Debug for KernelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRunner").field("module", &self.module).finish_non_exhaustive()
    }
}
