use crate::format::CLIENT_SIDE_BUFFER_DELETE;

/// Argument value tags as persisted in the record stream.
pub(crate) mod tag {
    pub const SINT: u8 = 0;
    pub const UINT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const STRING: u8 = 3;
    pub const BLOB: u8 = 4;
    pub const HANDLE: u8 = 5;
    pub const CLIENT_BUFFER: u8 = 6;
}

/// A typed call argument.
///
/// Arguments are opaque to trace tools except for [`Value::ClientBuffer`],
/// which marks a reference to a client-side buffer and feeds the reader's
/// last-use tracking.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    SInt(i64),
    UInt(u64),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
    /// Driver-assigned object handle (buffer, texture, shader, ...).
    Handle(u64),
    /// Reference to a client-side buffer by id.
    ClientBuffer(u32),
}

impl Value {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Value::SInt(_) => tag::SINT,
            Value::UInt(_) => tag::UINT,
            Value::Float(_) => tag::FLOAT,
            Value::String(_) => tag::STRING,
            Value::Blob(_) => tag::BLOB,
            Value::Handle(_) => tag::HANDLE,
            Value::ClientBuffer(_) => tag::CLIENT_BUFFER,
        }
    }

    /// Integer view of a buffer-id argument.
    ///
    /// Explicit delete calls carry the id as a plain integer, so accept the
    /// integer forms as well as a direct buffer reference.
    pub fn as_buffer_id(&self) -> Option<u32> {
        match *self {
            Value::SInt(v) => u32::try_from(v).ok(),
            Value::UInt(v) => u32::try_from(v).ok(),
            Value::ClientBuffer(id) => Some(id),
            _ => None,
        }
    }
}

/// One recorded API invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct CallRecord {
    /// Position of the call in the trace, assigned by the reader from file
    /// order. Globally unique and strictly increasing across all threads;
    /// never persisted (the writer derives positions purely from append
    /// order).
    pub ordinal: u64,
    /// Logical id of the application thread that issued the call.
    pub thread_id: u32,
    /// API entry point name.
    pub name: String,
    pub args: Vec<Value>,
}

impl CallRecord {
    pub fn new(thread_id: u32, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            ordinal: 0,
            thread_id,
            name: name.into(),
            args,
        }
    }

    /// Synthetic explicit release of a client-side buffer.
    ///
    /// Issued on `thread_id` so the release lands on the same logical thread
    /// as the buffer's last use, preserving per-thread ordering at replay.
    pub fn client_side_buffer_delete(thread_id: u32, buffer_id: u32) -> Self {
        Self::new(
            thread_id,
            CLIENT_SIDE_BUFFER_DELETE,
            vec![Value::UInt(u64::from(buffer_id))],
        )
    }
}
