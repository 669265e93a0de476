//! Self-host bundling: append a chunk payload to a copy of the host
//! executable so the result runs the embedded program when invoked with
//! no arguments.

use std::fs;
use std::io;
use std::path::Path;

use crate::bytecode::serial;

pub trait Bundler {
    fn bundle(&self, host: &Path, payload: &[u8], out: &Path) -> io::Result<()>;
}

/// The default bundler: copy the host and append
/// `{payload}{size u64 LE}{magic "CBPACK1\0"}`.
pub struct ExeBundler;

impl Bundler for ExeBundler {
    fn bundle(&self, host: &Path, payload: &[u8], out: &Path) -> io::Result<()> {
        let host_bytes = fs::read(host)?;
        fs::write(out, serial::append_footer(&host_bytes, payload))?;
        // Keep the host's permissions so the result stays executable.
        let perms = fs::metadata(host)?.permissions();
        fs::set_permissions(out, perms)?;
        Ok(())
    }
}
