use std::{collections::VecDeque, io::Write};

use alloy_primitives::B256;
use evmnode_primitives::TxHash;
use evmnode_store::StateSnapshot;
use wasmtime::{Caller, Linker, Memory};

use crate::{error::KernelError, preimages::PreimageResolver};

/// Per-invocation host context: the working state, pending inbox
/// messages, accumulated output, and preimage resolution. Lives in a
/// `wasmtime::Store<Host>` for the duration of one `kernel_run` call.
pub(crate) struct Host {
    pub(crate) state: StateSnapshot,
    input: VecDeque<Vec<u8>>,
    pub(crate) output: Vec<u8>,
    preimages: PreimageResolver,
    reveal_overrides: std::collections::HashMap<TxHash, Vec<u8>>,
    debug_log: Option<std::fs::File>,
}

impl Host {
    pub(crate) fn new(
        state: StateSnapshot,
        messages: impl IntoIterator<Item = Vec<u8>>,
        preimages: PreimageResolver,
        reveal_overrides: std::collections::HashMap<TxHash, Vec<u8>>,
        debug_log: Option<std::fs::File>,
    ) -> Self {
        Self {
            state,
            input: messages.into_iter().collect(),
            output: Vec::new(),
            preimages,
            reveal_overrides,
            debug_log,
        }
    }

    fn trace(&mut self, line: &str) {
        if let Some(file) = &mut self.debug_log {
            let _ = writeln!(file, "{line}");
        }
    }
}

fn memory(caller: &mut Caller<'_, Host>) -> Result<Memory, wasmtime::Error> {
    caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| wasmtime::Error::msg("guest module does not export linear memory"))
}

fn read_guest(caller: &mut Caller<'_, Host>, ptr: i32, len: i32) -> Result<Vec<u8>, wasmtime::Error> {
    let memory = memory(caller)?;
    let mut buf = vec![0u8; len as usize];
    memory.read(caller, ptr as usize, &mut buf)?;
    Ok(buf)
}

fn write_guest(caller: &mut Caller<'_, Host>, ptr: i32, cap: i32, data: &[u8]) -> Result<i32, wasmtime::Error> {
    if data.len() > cap as usize {
        return Err(wasmtime::Error::msg(format!(
            "guest buffer of {cap} bytes too small for {} byte value",
            data.len()
        )));
    }
    let memory = memory(caller)?;
    memory.write(caller, ptr as usize, data)?;
    Ok(i32::try_from(data.len()).unwrap_or(i32::MAX))
}

/// Registers the host ABI the kernel expects: `read_input`,
/// `write_output`, `store_read`, `store_write`, `reveal_preimage`.
///
/// Each is a direct, synchronous linker function over the guest's
/// exported linear memory; there is no async boundary inside a single
/// `kernel_run` invocation, matching the determinism requirement that no
/// wall-clock or RNG reach the guest.
pub(crate) fn link_host_functions(linker: &mut Linker<Host>) -> Result<(), KernelError> {
    linker
        .func_wrap("env", "read_input", |mut caller: Caller<'_, Host>, out_ptr: i32, out_cap: i32| -> Result<i32, wasmtime::Error> {
            let Some(message) = caller.data_mut().input.pop_front() else {
                return Ok(-1);
            };
            write_guest(&mut caller, out_ptr, out_cap, &message)
        })
        .map_err(|err| KernelError::AbiMismatch(err.to_string()))?;

    linker
        .func_wrap("env", "write_output", |mut caller: Caller<'_, Host>, ptr: i32, len: i32| -> Result<(), wasmtime::Error> {
            let bytes = read_guest(&mut caller, ptr, len)?;
            caller.data_mut().output.extend_from_slice(&bytes);
            Ok(())
        })
        .map_err(|err| KernelError::AbiMismatch(err.to_string()))?;

    linker
        .func_wrap(
            "env",
            "store_read",
            |mut caller: Caller<'_, Host>, path_ptr: i32, path_len: i32, out_ptr: i32, out_cap: i32| -> Result<i32, wasmtime::Error> {
                let path_bytes = read_guest(&mut caller, path_ptr, path_len)?;
                let path = String::from_utf8(path_bytes).map_err(|err| wasmtime::Error::msg(err.to_string()))?;
                let Some(value) = caller.data().state.get(&path).cloned() else {
                    return Ok(-1);
                };
                write_guest(&mut caller, out_ptr, out_cap, &value)
            },
        )
        .map_err(|err| KernelError::AbiMismatch(err.to_string()))?;

    linker
        .func_wrap(
            "env",
            "store_write",
            |mut caller: Caller<'_, Host>, path_ptr: i32, path_len: i32, val_ptr: i32, val_len: i32| -> Result<(), wasmtime::Error> {
                let path_bytes = read_guest(&mut caller, path_ptr, path_len)?;
                let path = String::from_utf8(path_bytes).map_err(|err| wasmtime::Error::msg(err.to_string()))?;
                let value = read_guest(&mut caller, val_ptr, val_len)?;
                caller.data_mut().trace(&format!("store_write {path} ({val_len} bytes)"));
                caller.data_mut().state.insert(path, value);
                Ok(())
            },
        )
        .map_err(|err| KernelError::AbiMismatch(err.to_string()))?;

    linker
        .func_wrap(
            "env",
            "reveal_preimage",
            |mut caller: Caller<'_, Host>, hash_ptr: i32, hash_len: i32, out_ptr: i32, out_cap: i32| -> Result<i32, wasmtime::Error> {
                if hash_len != 32 {
                    return Err(wasmtime::Error::msg("reveal_preimage hash must be 32 bytes"));
                }
                let hash_bytes = read_guest(&mut caller, hash_ptr, hash_len)?;
                let hash = TxHash::from(B256::from_slice(&hash_bytes));

                if let Some(bytes) = caller.data().reveal_overrides.get(&hash).cloned() {
                    return write_guest(&mut caller, out_ptr, out_cap, &bytes);
                }

                let preimages = caller.data().preimages.clone();
                match preimages.resolve(hash) {
                    Ok(bytes) => write_guest(&mut caller, out_ptr, out_cap, &bytes),
                    Err(_) => Ok(-1),
                }
            },
        )
        .map_err(|err| KernelError::AbiMismatch(err.to_string()))?;

    Ok(())
}
