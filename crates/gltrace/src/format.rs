//! On-disk layout constants. See the crate docs for the overall shape.

/// File magic at offset 0.
pub const TRACE_MAGIC: [u8; 8] = *b"GLTRACE\0";

/// Size of the fixed header block (magic through `reserved`), in bytes. The
/// JSON metadata blob follows immediately after.
pub const TRACE_HEADER_SIZE: u32 = 24;

/// Current container version. Bump when the record layout changes.
pub const CONTAINER_VERSION: u32 = 1;

/// Size of the per-record fixed header (`thread_id` + `payload_len`).
pub const CALL_RECORD_HEADER_SIZE: u32 = 8;

/// Upper bound on a single serialized call payload, and on `meta_len`.
///
/// Real traces carry vertex-data blobs of tens of megabytes per call; 256 MiB
/// leaves headroom while keeping a corrupt length field from driving an
/// unbounded allocation.
pub const MAX_CALL_RECORD_BYTES: u32 = 256 * 1024 * 1024;

/// Name of the call that explicitly releases a client-side buffer.
pub const CLIENT_SIDE_BUFFER_DELETE: &str = "glDeleteClientSideBuffer";
