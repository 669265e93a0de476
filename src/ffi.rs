//! The foreign-call collaborator behind the four `OP_FFI_*` opcodes.
//!
//! The VM only marshals stack arguments, the signature string, and the
//! returned number or string; how a call reaches native code is entirely
//! the sink's business. A sink that declines (returns None) makes the VM
//! push 0; with no sink installed at all, the VM does the same and warns
//! once on its own.

use std::sync::Once;

use crate::vm::Value;

pub trait ForeignCallSink {
    /// `OP_FFI_CALL`: call `func` from `dll` with the given arguments.
    fn call(&mut self, dll: &str, func: &str, args: &[Value]) -> Option<Value>;

    /// `OP_FFI_CALL_SIG`: as `call`, with an explicit signature string.
    fn call_sig(&mut self, dll: &str, func: &str, sig: &str, args: &[Value]) -> Option<Value>;

    /// `OP_FFI_PROC`: resolve a procedure address, returned as a number
    /// handle usable with `call_ptr`.
    fn proc_addr(&mut self, dll: &str, func: &str) -> Option<f64>;

    /// `OP_FFI_CALL_PTR`: call a previously resolved handle.
    fn call_ptr(&mut self, handle: f64, sig: &str, args: &[Value]) -> Option<Value>;

    /// Directories from `CB_DLL_PATH`, handed over at startup.
    fn set_search_path(&mut self, _dirs: &[String]) {}
}

static NULL_SINK_WARNING: Once = Once::new();

/// A sink that resolves nothing: every opcode falls back to 0, and the
/// first foreign call warns once for the whole process.
pub struct NullSink;

impl NullSink {
    fn warn_once(&self) {
        NULL_SINK_WARNING.call_once(|| {
            eprintln!("warning: foreign calls are stubbed out; FFI opcodes return 0");
        });
    }
}

impl ForeignCallSink for NullSink {
    fn call(&mut self, _dll: &str, _func: &str, _args: &[Value]) -> Option<Value> {
        self.warn_once();
        None
    }

    fn call_sig(&mut self, _dll: &str, _func: &str, _sig: &str, _args: &[Value]) -> Option<Value> {
        self.warn_once();
        None
    }

    fn proc_addr(&mut self, _dll: &str, _func: &str) -> Option<f64> {
        self.warn_once();
        None
    }

    fn call_ptr(&mut self, _handle: f64, _sig: &str, _args: &[Value]) -> Option<Value> {
        self.warn_once();
        None
    }
}
