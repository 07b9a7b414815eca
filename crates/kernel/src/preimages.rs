use std::path::{Path, PathBuf};

use evmnode_primitives::TxHash;

use crate::error::KernelError;

/// Resolves preimages (hash → bytes) for `reveal_preimage`, first from a
/// local directory, then from an optional remote endpoint on miss,
/// caching the result back to disk.
///
/// Writes are write-temp-then-rename so a crash mid-fetch never leaves a
/// partially-written preimage file for a later run to trip over.
#[derive(Debug, Clone)]
pub struct PreimageResolver {
    dir: PathBuf,
    endpoint: Option<reqwest::Url>,
    client: reqwest::blocking::Client,
}

impl PreimageResolver {
    /// Creates a resolver rooted at `dir`, optionally falling back to
    /// `endpoint` on a local cache miss.
    #[must_use]
    pub fn new(dir: PathBuf, endpoint: Option<reqwest::Url>) -> Self {
        Self { dir, endpoint, client: reqwest::blocking::Client::new() }
    }

    fn path_for(&self, hash: TxHash) -> PathBuf {
        self.dir.join(format!("{hash:x}", hash = HexDisplay(hash)))
    }

    /// Resolves `hash`, consulting the local cache first and the remote
    /// endpoint (if configured) on miss. A remote hit is written back to
    /// the local cache before returning.
    pub fn resolve(&self, hash: TxHash) -> Result<Vec<u8>, KernelError> {
        let path = self.path_for(hash);
        if let Ok(bytes) = std::fs::read(&path) {
            return Ok(bytes);
        }

        let Some(endpoint) = &self.endpoint else {
            return Err(KernelError::PreimageUnavailable(hash));
        };

        let url = endpoint
            .join(&format!("preimages/{hash:x}", hash = HexDisplay(hash)))
            .map_err(|err| KernelError::Load(err.to_string()))?;
        let response = self.client.get(url).send()?.error_for_status()?;
        let bytes = response.bytes()?.to_vec();

        self.cache(&path, &bytes)?;
        Ok(bytes)
    }

    fn cache(&self, path: &Path, bytes: &[u8]) -> Result<(), KernelError> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

struct HexDisplay(TxHash);

impl std::fmt::LowerHex for HexDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
