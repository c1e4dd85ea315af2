#![forbid(unsafe_code)]

//! Call-stream trace container.
//!
//! A trace is a recorded, ordered sequence of graphics-API calls: a fixed
//! little-endian header, a JSON metadata blob, and a sequential stream of
//! call records, replayed later against a real or virtual driver. This crate
//! owns the on-disk format and the call model; trace-to-trace tools build on
//! [`TraceReader`] / [`TraceWriter`] and treat record contents as opaque.

mod call;
mod format;
mod reader;
mod writer;

pub use call::{CallRecord, Value};
pub use format::{
    CALL_RECORD_HEADER_SIZE, CLIENT_SIDE_BUFFER_DELETE, CONTAINER_VERSION, MAX_CALL_RECORD_BYTES,
    TRACE_HEADER_SIZE, TRACE_MAGIC,
};
pub use reader::{DecodeMode, TraceReadError, TraceReader};
pub use writer::{TraceWriteError, TraceWriter};
