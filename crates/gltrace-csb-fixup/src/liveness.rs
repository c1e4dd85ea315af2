use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use gltrace::{DecodeMode, TraceReadError, TraceReader};

use crate::FixupError;

/// Which buffer a given call is the final reference to, and on which thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LivenessEntry {
    pub thread_id: u32,
    pub buffer_id: u32,
}

/// Flat map from call ordinal to the buffer whose last use that call is.
///
/// Built by flattening the reader's two-level `thread -> buffer -> ordinal`
/// structure. The flattening is unambiguous because ordinals are globally
/// unique across threads. A call that is the final reference to more than
/// one buffer still gets a single entry: insertion is last-write-wins, and
/// the displaced entry is logged at warn level rather than dropped silently.
#[derive(Debug, Default)]
pub struct LivenessMap {
    by_ordinal: BTreeMap<u64, LivenessEntry>,
}

impl LivenessMap {
    /// Drain `source` to end of stream and flatten its per-thread last-use
    /// tables. Individual call records are discarded; only the tables
    /// harvested by the reader survive the pass.
    pub fn from_source<R: Read>(source: &mut TraceReader<R>) -> Result<Self, TraceReadError> {
        while source.next_call()?.is_some() {}

        let mut map = LivenessMap::default();
        for (&thread_id, buffers) in &source.client_side_last_use {
            tracing::info!(
                "thread {thread_id} has {} client-side buffer last uses",
                buffers.len()
            );
            for (&buffer_id, &ordinal) in buffers {
                let reason = source
                    .client_side_last_use_reason
                    .get(&thread_id)
                    .and_then(|reasons| reasons.get(&buffer_id))
                    .map(String::as_str)
                    .unwrap_or("unknown");
                tracing::debug!("t{thread_id} cs{buffer_id} call {ordinal} endpoint={reason}");
                map.insert(
                    ordinal,
                    LivenessEntry {
                        thread_id,
                        buffer_id,
                    },
                );
            }
        }
        Ok(map)
    }

    pub fn insert(&mut self, ordinal: u64, entry: LivenessEntry) {
        if let Some(prev) = self.by_ordinal.insert(ordinal, entry) {
            let kept = &self.by_ordinal[&ordinal];
            tracing::warn!(
                "call {ordinal} is the last use of more than one client-side buffer; \
                 keeping cs{} (thread {}), dropping cs{} (thread {})",
                kept.buffer_id,
                kept.thread_id,
                prev.buffer_id,
                prev.thread_id
            );
        }
    }

    pub fn get(&self, ordinal: u64) -> Option<&LivenessEntry> {
        self.by_ordinal.get(&ordinal)
    }

    pub fn len(&self) -> usize {
        self.by_ordinal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }
}

/// Pass 1: traverse the trace at `path` once in quick mode, purely to
/// harvest liveness data. Returns the trace's header metadata alongside the
/// flattened map so the caller can augment and re-emit the header.
pub fn analyze_trace(path: &Path) -> Result<(serde_json::Value, LivenessMap), FixupError> {
    let mut source = TraceReader::open(path, DecodeMode::Quick)?;
    let map = LivenessMap::from_source(&mut source)?;
    Ok((source.meta, map))
}
