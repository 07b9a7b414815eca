use std::{fmt, path::Path};

use crate::error::KernelError;

/// A content-addressed identifier for a loaded WASM kernel module.
///
/// Recorded alongside committed state so a restart can detect a kernel
/// swap; the module digest is part of state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleDigest([u8; 32]);

impl fmt::Debug for ModuleDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleDigest(")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// A compiled kernel module, ready to be instantiated per execution.
pub struct KernelModule {
    pub(crate) module: wasmtime::Module,
    digest: ModuleDigest,
}

impl KernelModule {
    /// Loads and compiles the WASM module at `path`.
    pub fn load(engine: &wasmtime::Engine, path: impl AsRef<Path>) -> Result<Self, KernelError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| KernelError::Load(err.to_string()))?;
        Self::from_bytes(engine, &bytes)
    }

    /// Compiles a module already read into memory, e.g. by a test harness.
    pub fn from_bytes(engine: &wasmtime::Engine, bytes: &[u8]) -> Result<Self, KernelError> {
        let digest = ModuleDigest(*blake3::hash(bytes).as_bytes());
        let module = wasmtime::Module::new(engine, bytes).map_err(|err| KernelError::Load(err.to_string()))?;
        Ok(Self { module, digest })
    }

    /// This module's content digest.
    #[must_use]
    pub const fn digest(&self) -> ModuleDigest {
        self.digest
    }
}

impl fmt::Debug for KernelModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelModule").field("digest", &self.digest).finish_non_exhaustive()
    }
}
