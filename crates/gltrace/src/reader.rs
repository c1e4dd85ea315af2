use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use thiserror::Error;

use crate::call::{tag, CallRecord, Value};
use crate::format::{
    CLIENT_SIDE_BUFFER_DELETE, CONTAINER_VERSION, MAX_CALL_RECORD_BYTES, TRACE_HEADER_SIZE,
    TRACE_MAGIC,
};

#[derive(Debug, Error)]
pub enum TraceReadError {
    #[error("not a gltrace container (bad magic)")]
    InvalidMagic,

    #[error("unsupported header size {0}")]
    UnsupportedHeaderSize(u32),

    #[error("unsupported container version {0}")]
    UnsupportedContainerVersion(u32),

    #[error("header metadata length {len} exceeds the {max}-byte limit")]
    MetaTooLarge { len: u32, max: u32 },

    #[error("header metadata is not valid JSON: {0}")]
    MalformedMeta(#[source] serde_json::Error),

    #[error("call record payload length {len} exceeds the {max}-byte limit")]
    RecordTooLarge { len: u32, max: u32 },

    #[error("trace ends mid-record (truncated call record)")]
    TruncatedRecord,

    #[error("unknown argument value tag {0}")]
    UnknownValueTag(u8),

    #[error("malformed call record: {0}")]
    MalformedCall(&'static str),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// How much of each record to materialize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode every argument in full.
    Full,
    /// Skip blob payload bytes. Analysis passes that never re-serialize what
    /// they read use this to avoid copying per-call bulk data; a record
    /// decoded in quick mode carries empty blobs and must not be written
    /// back out.
    Quick,
}

/// Forward-only trace source.
///
/// Yields call records in file order and assigns each its ordinal (position
/// in the trace, globally unique across threads). Restarting requires a new
/// [`TraceReader::open`]; two readers over the same file are independent.
///
/// While records are pulled, every [`Value::ClientBuffer`] argument updates
/// the per-thread last-use tables, and an explicit
/// `glDeleteClientSideBuffer` retires its buffer from them. After a full
/// traversal the tables therefore hold, per thread, the buffers that are
/// never explicitly released and the ordinal of each one's final reference.
#[derive(Debug)]
pub struct TraceReader<R> {
    reader: R,
    mode: DecodeMode,
    /// Parsed header metadata blob.
    pub meta: serde_json::Value,
    next_ordinal: u64,
    /// thread id -> (client-side buffer id -> ordinal of last referencing call)
    pub client_side_last_use: BTreeMap<u32, BTreeMap<u32, u64>>,
    /// thread id -> (client-side buffer id -> human-readable last-use site)
    pub client_side_last_use_reason: BTreeMap<u32, BTreeMap<u32, String>>,
}

impl TraceReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, mode: DecodeMode) -> Result<Self, TraceReadError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), mode)
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(mut reader: R, mode: DecodeMode) -> Result<Self, TraceReadError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != TRACE_MAGIC {
            return Err(TraceReadError::InvalidMagic);
        }

        let header_size = read_u32(&mut reader)?;
        if header_size != TRACE_HEADER_SIZE {
            return Err(TraceReadError::UnsupportedHeaderSize(header_size));
        }
        let container_version = read_u32(&mut reader)?;
        if container_version != CONTAINER_VERSION {
            return Err(TraceReadError::UnsupportedContainerVersion(
                container_version,
            ));
        }

        // `meta_len` comes from the input bytes and is otherwise used
        // directly for allocation; bound it before trusting it.
        let meta_len = read_u32(&mut reader)?;
        if meta_len > MAX_CALL_RECORD_BYTES {
            return Err(TraceReadError::MetaTooLarge {
                len: meta_len,
                max: MAX_CALL_RECORD_BYTES,
            });
        }
        let _reserved = read_u32(&mut reader)?;

        let mut meta_json = vec![0u8; meta_len as usize];
        reader.read_exact(&mut meta_json)?;
        let meta = serde_json::from_slice(&meta_json).map_err(TraceReadError::MalformedMeta)?;

        Ok(Self {
            reader,
            mode,
            meta,
            next_ordinal: 0,
            client_side_last_use: BTreeMap::new(),
            client_side_last_use_reason: BTreeMap::new(),
        })
    }

    /// Pull the next call record, or `None` at a clean end of stream.
    ///
    /// End of file is only legal at a record boundary; anything else is
    /// [`TraceReadError::TruncatedRecord`].
    pub fn next_call(&mut self) -> Result<Option<CallRecord>, TraceReadError> {
        let mut head = [0u8; 8];
        if !read_exact_or_eof(&mut self.reader, &mut head)? {
            return Ok(None);
        }
        let thread_id = u32::from_le_bytes(head[0..4].try_into().unwrap());
        let payload_len = u32::from_le_bytes(head[4..8].try_into().unwrap());
        if payload_len > MAX_CALL_RECORD_BYTES {
            return Err(TraceReadError::RecordTooLarge {
                len: payload_len,
                max: MAX_CALL_RECORD_BYTES,
            });
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                TraceReadError::TruncatedRecord
            } else {
                TraceReadError::Io(e)
            }
        })?;

        let (name, args) = decode_call_payload(&payload, self.mode)?;
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let call = CallRecord {
            ordinal,
            thread_id,
            name,
            args,
        };
        self.track_client_side_use(&call);
        Ok(Some(call))
    }

    fn track_client_side_use(&mut self, call: &CallRecord) {
        if call.name == CLIENT_SIDE_BUFFER_DELETE {
            // The trace already releases this buffer explicitly; it no
            // longer has a dangling last use.
            if let Some(id) = call.args.first().and_then(Value::as_buffer_id) {
                if let Some(buffers) = self.client_side_last_use.get_mut(&call.thread_id) {
                    buffers.remove(&id);
                }
                if let Some(reasons) = self.client_side_last_use_reason.get_mut(&call.thread_id) {
                    reasons.remove(&id);
                }
            }
            return;
        }
        for (idx, arg) in call.args.iter().enumerate() {
            if let Value::ClientBuffer(id) = *arg {
                self.client_side_last_use
                    .entry(call.thread_id)
                    .or_default()
                    .insert(id, call.ordinal);
                self.client_side_last_use_reason
                    .entry(call.thread_id)
                    .or_default()
                    .insert(id, format!("{} arg {}", call.name, idx));
            }
        }
    }
}

fn decode_call_payload(
    payload: &[u8],
    mode: DecodeMode,
) -> Result<(String, Vec<Value>), TraceReadError> {
    let mut p = Payload {
        buf: payload,
        off: 0,
    };

    let name_len = p.u16()? as usize;
    let name = std::str::from_utf8(p.bytes(name_len)?)
        .map_err(|_| TraceReadError::MalformedCall("call name is not UTF-8"))?
        .to_string();

    let arg_count = p.u16()?;
    let mut args = Vec::with_capacity(arg_count as usize);
    for _ in 0..arg_count {
        let value = match p.u8()? {
            tag::SINT => Value::SInt(i64::from_le_bytes(p.array::<8>()?)),
            tag::UINT => Value::UInt(u64::from_le_bytes(p.array::<8>()?)),
            tag::FLOAT => Value::Float(f32::from_le_bytes(p.array::<4>()?)),
            tag::STRING => {
                let len = p.u32()? as usize;
                let bytes = p.bytes(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| TraceReadError::MalformedCall("string argument is not UTF-8"))?;
                Value::String(s.to_string())
            }
            tag::BLOB => {
                let len = p.u32()? as usize;
                let bytes = p.bytes(len)?;
                match mode {
                    DecodeMode::Full => Value::Blob(bytes.to_vec()),
                    DecodeMode::Quick => Value::Blob(Vec::new()),
                }
            }
            tag::HANDLE => Value::Handle(u64::from_le_bytes(p.array::<8>()?)),
            tag::CLIENT_BUFFER => Value::ClientBuffer(u32::from_le_bytes(p.array::<4>()?)),
            other => return Err(TraceReadError::UnknownValueTag(other)),
        };
        args.push(value);
    }

    if p.off != payload.len() {
        return Err(TraceReadError::MalformedCall(
            "trailing bytes after last argument",
        ));
    }
    Ok((name, args))
}

/// Bounds-checked cursor over one record payload.
struct Payload<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Payload<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], TraceReadError> {
        let end = self
            .off
            .checked_add(len)
            .ok_or(TraceReadError::MalformedCall("field length overflow"))?;
        if end > self.buf.len() {
            return Err(TraceReadError::MalformedCall(
                "field extends past end of record",
            ));
        }
        let out = &self.buf[self.off..end];
        self.off = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TraceReadError> {
        Ok(self.bytes(N)?.try_into().unwrap())
    }

    fn u8(&mut self) -> Result<u8, TraceReadError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TraceReadError> {
        Ok(u16::from_le_bytes(self.array::<2>()?))
    }

    fn u32(&mut self) -> Result<u32, TraceReadError> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, TraceReadError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Fill `buf` completely, or report a clean end of stream.
///
/// Returns `Ok(false)` when the stream was already exhausted (no bytes
/// read); EOF after a partial fill is a truncated record.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, TraceReadError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(TraceReadError::TruncatedRecord);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TraceReadError::Io(e)),
        }
    }
    Ok(true)
}
