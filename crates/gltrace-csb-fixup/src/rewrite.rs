use std::io::{Read, Write};

use gltrace::{CallRecord, TraceReader, TraceWriter};

use crate::liveness::LivenessMap;
use crate::FixupError;

/// Totals from the rewrite pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    pub calls_copied: u64,
    pub deletions_injected: u64,
}

/// Pass 2: stream every call from `source` to `sink` unchanged, appending a
/// synthetic `glDeleteClientSideBuffer` directly after each call whose
/// ordinal the liveness map marks as a buffer's final reference.
///
/// The deletion inherits the triggering call's thread id, which keeps the
/// release on the thread whose per-thread ordering the replay engine relies
/// on. No original record is reordered, mutated, or dropped; the output is
/// the input stream with zero or more deletions interleaved.
///
/// `source` must be a fresh reader over the same trace that produced `map`,
/// positioned at the first call; `sink` must already carry its header.
pub fn inject_deletions<R: Read, W: Write>(
    source: &mut TraceReader<R>,
    sink: &mut TraceWriter<W>,
    map: &LivenessMap,
) -> Result<RewriteSummary, FixupError> {
    let mut summary = RewriteSummary::default();
    while let Some(call) = source.next_call()? {
        sink.write_call(&call)?;
        summary.calls_copied += 1;

        if let Some(entry) = map.get(call.ordinal) {
            // The map was built from the same trace, so the triggering
            // call's thread is the thread the last use was recorded on.
            debug_assert_eq!(entry.thread_id, call.thread_id);
            let deletion = CallRecord::client_side_buffer_delete(call.thread_id, entry.buffer_id);
            sink.write_call(&deletion)?;
            summary.deletions_injected += 1;
        }
    }
    Ok(summary)
}
