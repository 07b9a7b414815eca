use evmnode_primitives::TxHash;
use thiserror::Error;

/// Errors raised by [`crate::KernelRunner`] and preimage resolution.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The module file could not be read or failed to validate as WASM.
    #[error("failed to load kernel module: {0}")]
    Load(String),

    /// The module does not export the `kernel_run` entrypoint, or is
    /// missing a host import the runner requires. Fatal at startup: the
    /// node refuses to start against an incompatible kernel.
    #[error("kernel/node protocol mismatch: {0}")]
    AbiMismatch(String),

    /// The guest trapped (panicked, ran out of fuel, accessed memory out
    /// of bounds) during execution.
    #[error("kernel trapped during execution: {0}")]
    Trap(#[from] wasmtime::Error),

    /// A `reveal_preimage` call referenced a hash absent from both the
    /// local cache and the configured remote endpoint.
    #[error("preimage {0} is unavailable")]
    PreimageUnavailable(TxHash),

    /// A local or remote I/O failure while resolving a preimage.
    #[error("preimage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The remote preimage endpoint returned a transient failure.
    #[error("preimage endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl KernelError {
    /// `true` for a protocol mismatch: the node must refuse to start rather
    /// than run against a kernel it cannot safely drive.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::AbiMismatch(_) | Self::Load(_))
    }
}
