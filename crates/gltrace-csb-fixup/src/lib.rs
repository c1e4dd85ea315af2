#![forbid(unsafe_code)]

//! Client-side buffer lifetime fixup for recorded call-stream traces.
//!
//! Recorded applications keep client-side buffer data referenced until the
//! end of the trace because nothing in the recording ever releases it. This
//! crate repairs that in two passes over the same trace file: pass 1
//! reconstructs, per thread, the last call that references each client-side
//! buffer; pass 2 copies the trace verbatim and appends a synthetic
//! `glDeleteClientSideBuffer` directly after each such call, on the same
//! thread, so replay can release the memory at the recorded point.
//!
//! The passes own independent [`gltrace::TraceReader`] handles; the only
//! state carried between them is the flattened [`LivenessMap`].

mod header;
mod liveness;
mod rewrite;

pub use header::add_conversion_entry;
pub use liveness::{analyze_trace, LivenessEntry, LivenessMap};
pub use rewrite::{inject_deletions, RewriteSummary};

use gltrace::{TraceReadError, TraceWriteError};
use thiserror::Error;

/// Errors from the two-pass fixup pipeline.
///
/// All variants are fatal to the run: there is no retry and no
/// partial-success mode. A failed run leaves whatever output was already
/// written on disk and is simply rerun.
#[derive(Debug, Error)]
pub enum FixupError {
    #[error(transparent)]
    Read(#[from] TraceReadError),

    #[error(transparent)]
    Write(#[from] TraceWriteError),
}
