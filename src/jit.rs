//! Optional expression JIT seam.
//!
//! An embedder may compile a trivial arithmetic subset of a chunk to
//! native code. The core VM never consults this; hosts that do must fall
//! back to interpretation when `eval` declines.

use crate::bytecode::Chunk;

pub trait NumericJit {
    /// Compile and run the function at `entry` with all-numeric arguments.
    /// Returns None when the code is outside the supported subset.
    fn eval(&self, chunk: &Chunk, entry: u32, args: &[f64]) -> Option<f64>;
}
