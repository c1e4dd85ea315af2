use gltrace::{
    CallRecord, DecodeMode, TraceReadError, TraceReader, TraceWriter, Value,
    CLIENT_SIDE_BUFFER_DELETE, MAX_CALL_RECORD_BYTES,
};
use serde_json::json;

fn write_trace(calls: &[CallRecord]) -> Vec<u8> {
    let mut writer = TraceWriter::new(Vec::new(), &json!({"app": "stream-test"})).unwrap();
    for call in calls {
        writer.write_call(call).unwrap();
    }
    writer.finish().unwrap()
}

fn read_all(bytes: &[u8], mode: DecodeMode) -> (TraceReader<&[u8]>, Vec<CallRecord>) {
    let mut reader = TraceReader::new(bytes, mode).unwrap();
    let mut calls = Vec::new();
    while let Some(call) = reader.next_call().unwrap() {
        calls.push(call);
    }
    (reader, calls)
}

/// Byte offset of the first record, given the fixture meta used above.
fn first_record_offset(bytes: &[u8]) -> usize {
    let meta_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
    24 + meta_len
}

#[test]
fn writes_and_reads_back_with_sequential_ordinals() {
    let bytes = write_trace(&[
        CallRecord::new(0, "glBindBuffer", vec![Value::UInt(0x8892), Value::Handle(3)]),
        CallRecord::new(
            1,
            "glClientSideBufferData",
            vec![Value::ClientBuffer(5), Value::Blob(vec![1, 2, 3, 4])],
        ),
        CallRecord::new(
            0,
            "glUniform1f",
            vec![Value::SInt(-2), Value::Float(0.5), Value::String("u_time".into())],
        ),
    ]);

    let (reader, calls) = read_all(&bytes, DecodeMode::Full);
    assert_eq!(reader.meta, json!({"app": "stream-test"}));

    assert_eq!(calls.len(), 3);
    // Ordinals are assigned from file position, across threads.
    assert_eq!(
        calls.iter().map(|c| c.ordinal).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(calls[0].thread_id, 0);
    assert_eq!(calls[1].thread_id, 1);
    assert_eq!(calls[1].args[1], Value::Blob(vec![1, 2, 3, 4]));
    assert_eq!(calls[2].args[2], Value::String("u_time".into()));
}

#[test]
fn empty_trace_yields_no_calls() {
    let bytes = write_trace(&[]);
    let (_, calls) = read_all(&bytes, DecodeMode::Full);
    assert!(calls.is_empty());
}

#[test]
fn rejects_bad_magic() {
    let mut bytes = write_trace(&[]);
    bytes[0] = b'X';
    match TraceReader::new(bytes.as_slice(), DecodeMode::Full) {
        Err(TraceReadError::InvalidMagic) => {}
        other => panic!("expected InvalidMagic, got {other:?}"),
    }
}

#[test]
fn rejects_unknown_container_version() {
    let mut bytes = write_trace(&[]);
    bytes[12..16].copy_from_slice(&99u32.to_le_bytes());
    match TraceReader::new(bytes.as_slice(), DecodeMode::Full) {
        Err(TraceReadError::UnsupportedContainerVersion(99)) => {}
        other => panic!("expected UnsupportedContainerVersion, got {other:?}"),
    }
}

#[test]
fn truncated_record_is_detected() {
    let bytes = write_trace(&[CallRecord::new(
        0,
        "glDrawArrays",
        vec![Value::UInt(4), Value::SInt(0), Value::SInt(3)],
    )]);

    let mut reader =
        TraceReader::new(&bytes[..bytes.len() - 3], DecodeMode::Full).unwrap();
    match reader.next_call() {
        Err(TraceReadError::TruncatedRecord) => {}
        other => panic!("expected TruncatedRecord, got {other:?}"),
    }
}

#[test]
fn unknown_value_tag_is_detected() {
    let mut bytes = write_trace(&[CallRecord::new(7, "glFlush", vec![Value::SInt(1)])]);

    // Tag byte of the first argument: record header (8) + name_len prefix (2)
    // + name bytes + arg count (2).
    let tag_off = first_record_offset(&bytes) + 8 + 2 + "glFlush".len() + 2;
    bytes[tag_off] = 0xEE;

    let mut reader = TraceReader::new(bytes.as_slice(), DecodeMode::Full).unwrap();
    match reader.next_call() {
        Err(TraceReadError::UnknownValueTag(0xEE)) => {}
        other => panic!("expected UnknownValueTag, got {other:?}"),
    }
}

#[test]
fn oversized_payload_length_is_rejected_before_allocation() {
    let mut bytes = write_trace(&[]);
    // Append a record header whose payload length exceeds the limit; no
    // payload follows, but the length check must fire first.
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&(MAX_CALL_RECORD_BYTES + 1).to_le_bytes());

    let mut reader = TraceReader::new(bytes.as_slice(), DecodeMode::Full).unwrap();
    match reader.next_call() {
        Err(TraceReadError::RecordTooLarge { len, .. }) => {
            assert_eq!(len, MAX_CALL_RECORD_BYTES + 1);
        }
        other => panic!("expected RecordTooLarge, got {other:?}"),
    }
}

#[test]
fn write_rejects_record_over_staging_limit() {
    let mut writer =
        TraceWriter::with_max_record_bytes(Vec::new(), &json!({}), 64).unwrap();
    let call = CallRecord::new(0, "glClientSideBufferData", vec![Value::Blob(vec![0u8; 128])]);
    match writer.write_call(&call) {
        Err(gltrace::TraceWriteError::RecordTooLarge { len, max: 64 }) => {
            assert!(len > 64);
        }
        other => panic!("expected RecordTooLarge, got {other:?}"),
    }
}

#[test]
fn quick_mode_skips_blob_payloads_but_tracks_buffers() {
    let bytes = write_trace(&[CallRecord::new(
        2,
        "glClientSideBufferData",
        vec![Value::ClientBuffer(9), Value::Blob(vec![0xAB; 1024])],
    )]);

    let (reader, calls) = read_all(&bytes, DecodeMode::Quick);
    assert_eq!(calls[0].args[1], Value::Blob(Vec::new()));
    assert_eq!(reader.client_side_last_use[&2][&9], 0);
}

#[test]
fn last_use_tracking_follows_latest_reference() {
    let bytes = write_trace(&[
        CallRecord::new(0, "glVertexAttribPointer", vec![Value::ClientBuffer(7)]),
        CallRecord::new(0, "glDrawArrays", vec![Value::UInt(4)]),
        CallRecord::new(0, "glDrawElements", vec![Value::UInt(4), Value::ClientBuffer(7)]),
        CallRecord::new(1, "glVertexAttribPointer", vec![Value::ClientBuffer(7)]),
    ]);

    let (reader, _) = read_all(&bytes, DecodeMode::Full);
    // Tracking is per thread: the same buffer id is followed independently
    // on each thread that references it.
    assert_eq!(reader.client_side_last_use[&0][&7], 2);
    assert_eq!(reader.client_side_last_use[&1][&7], 3);
    assert_eq!(
        reader.client_side_last_use_reason[&0][&7],
        "glDrawElements arg 1"
    );
}

#[test]
fn explicit_delete_retires_tracking_on_its_thread() {
    let bytes = write_trace(&[
        CallRecord::new(0, "glVertexAttribPointer", vec![Value::ClientBuffer(5)]),
        CallRecord::new(1, "glVertexAttribPointer", vec![Value::ClientBuffer(5)]),
        CallRecord::new(0, CLIENT_SIDE_BUFFER_DELETE, vec![Value::UInt(5)]),
    ]);

    let (reader, _) = read_all(&bytes, DecodeMode::Full);
    assert!(!reader.client_side_last_use.get(&0).is_some_and(|m| m.contains_key(&5)));
    assert_eq!(reader.client_side_last_use[&1][&5], 1);
}
