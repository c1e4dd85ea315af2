use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use crate::call::{CallRecord, Value};
use crate::format::{CONTAINER_VERSION, MAX_CALL_RECORD_BYTES, TRACE_HEADER_SIZE, TRACE_MAGIC};

#[derive(Debug, Error)]
pub enum TraceWriteError {
    #[error("serialized call record is {len} bytes, exceeding the {max}-byte record limit")]
    RecordTooLarge { len: usize, max: usize },

    #[error("header metadata is {len} bytes, exceeding the {max}-byte limit")]
    MetaTooLarge { len: usize, max: usize },

    #[error("header metadata does not serialize to JSON: {0}")]
    MalformedMeta(#[from] serde_json::Error),

    #[error("call name is {len} bytes, exceeding the u16 length prefix")]
    NameTooLong { len: usize },

    #[error("call has {count} arguments, exceeding the u16 count prefix")]
    TooManyArgs { count: usize },

    #[error("string/blob argument is {len} bytes, exceeding the u32 length prefix")]
    ArgTooLarge { len: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only trace sink.
///
/// The container header (magic, fixed fields, serialized metadata blob) is
/// written once at construction; the format requires the header size to be
/// fixed before record data follows, so the metadata is never rewritten.
pub struct TraceWriter<W: Write> {
    writer: W,
    scratch: Vec<u8>,
    max_record_bytes: usize,
    calls_written: u64,
}

impl TraceWriter<BufWriter<File>> {
    /// Create `path` (truncating any existing file) and write the container
    /// header immediately.
    pub fn create(
        path: impl AsRef<Path>,
        meta: &serde_json::Value,
    ) -> Result<Self, TraceWriteError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), meta)
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(writer: W, meta: &serde_json::Value) -> Result<Self, TraceWriteError> {
        Self::with_max_record_bytes(writer, meta, MAX_CALL_RECORD_BYTES as usize)
    }

    /// Like [`TraceWriter::new`] with a custom bound on the record staging
    /// buffer. The bound must not exceed what a `u32` length prefix can
    /// describe.
    pub fn with_max_record_bytes(
        mut writer: W,
        meta: &serde_json::Value,
        max_record_bytes: usize,
    ) -> Result<Self, TraceWriteError> {
        let meta_json = serde_json::to_vec(meta)?;
        if meta_json.len() > max_record_bytes {
            return Err(TraceWriteError::MetaTooLarge {
                len: meta_json.len(),
                max: max_record_bytes,
            });
        }
        let meta_len = u32::try_from(meta_json.len()).map_err(|_| TraceWriteError::MetaTooLarge {
            len: meta_json.len(),
            max: max_record_bytes,
        })?;

        writer.write_all(&TRACE_MAGIC)?;
        writer.write_all(&TRACE_HEADER_SIZE.to_le_bytes())?;
        writer.write_all(&CONTAINER_VERSION.to_le_bytes())?;
        writer.write_all(&meta_len.to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?; // reserved
        writer.write_all(&meta_json)?;

        Ok(Self {
            writer,
            scratch: Vec::new(),
            max_record_bytes,
            calls_written: 0,
        })
    }

    /// Append one call record.
    ///
    /// The record is staged into a reused buffer before the write. A record
    /// whose serialized payload exceeds the configured bound fails with
    /// [`TraceWriteError::RecordTooLarge`] rather than being truncated; the
    /// sink is left without the partial record.
    pub fn write_call(&mut self, call: &CallRecord) -> Result<(), TraceWriteError> {
        self.scratch.clear();
        encode_call_payload(call, &mut self.scratch)?;
        if self.scratch.len() > self.max_record_bytes {
            return Err(TraceWriteError::RecordTooLarge {
                len: self.scratch.len(),
                max: self.max_record_bytes,
            });
        }
        let payload_len =
            u32::try_from(self.scratch.len()).map_err(|_| TraceWriteError::RecordTooLarge {
                len: self.scratch.len(),
                max: self.max_record_bytes,
            })?;

        self.writer.write_all(&call.thread_id.to_le_bytes())?;
        self.writer.write_all(&payload_len.to_le_bytes())?;
        self.writer.write_all(&self.scratch)?;
        self.calls_written += 1;
        Ok(())
    }

    pub fn calls_written(&self) -> u64 {
        self.calls_written
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W, TraceWriteError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn encode_call_payload(call: &CallRecord, out: &mut Vec<u8>) -> Result<(), TraceWriteError> {
    let name_len = u16::try_from(call.name.len()).map_err(|_| TraceWriteError::NameTooLong {
        len: call.name.len(),
    })?;
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(call.name.as_bytes());

    let arg_count = u16::try_from(call.args.len()).map_err(|_| TraceWriteError::TooManyArgs {
        count: call.args.len(),
    })?;
    out.extend_from_slice(&arg_count.to_le_bytes());
    for arg in &call.args {
        encode_value(arg, out)?;
    }
    Ok(())
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<(), TraceWriteError> {
    out.push(value.tag());
    match value {
        Value::SInt(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::UInt(v) | Value::Handle(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) => push_len_prefixed(out, s.as_bytes())?,
        Value::Blob(b) => push_len_prefixed(out, b)?,
        Value::ClientBuffer(id) => out.extend_from_slice(&id.to_le_bytes()),
    }
    Ok(())
}

fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), TraceWriteError> {
    let len =
        u32::try_from(bytes.len()).map_err(|_| TraceWriteError::ArgTooLarge { len: bytes.len() })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}
