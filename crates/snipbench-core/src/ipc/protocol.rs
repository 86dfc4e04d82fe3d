//! IPC protocol messages for snipbench worker processes.
//!
//! Uses length-prefixed JSON messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + UTF-8 JSON body.

use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::model::{BenchmarkResult, Progress, RunRequest};

/// Messages larger than this are rejected (100MB).
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Command sent from host to worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerRequest {
    /// Execute one benchmark run.
    RunBenchmark(RunRequest),

    /// Exit after the current message.
    Shutdown,
}

/// Message sent from worker to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerResponse {
    /// Stage transition; zero or more per run.
    BenchmarkProgress { progress: Progress },

    /// Terminal success.
    BenchmarkComplete { results: Vec<BenchmarkResult> },

    /// Terminal failure of the whole run.
    BenchmarkError { error: String },
}

impl WorkerResponse {
    /// Whether this message ends a run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerResponse::BenchmarkProgress { .. })
    }
}

/// Encode a message as one frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", body.len())));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Serialization(format!("Failed to decode IPC message: {}", e)))
}

fn check_len(len_bytes: [u8; 4]) -> Result<usize> {
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }
    Ok(len)
}

/// Write a message to a writer using length-prefixed JSON encoding.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let frame = encode_frame(message)?;
    writer
        .write_all(&frame)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;
    Ok(())
}

/// Read a message from a reader using length-prefixed JSON encoding.
///
/// Returns `Ok(None)` on a clean end of stream between frames. A body that
/// is not valid JSON for `T` yields [`Error::Serialization`] and leaves the
/// stream positioned at the next frame.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Ipc(format!("Failed to read IPC message length: {}", e))),
    }
    let len = check_len(len_bytes)?;

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode_body(&bytes).map(Some)
}

/// Async counterpart of [`write_message`].
pub async fn write_message_async<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(message)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;
    Ok(())
}

/// Async counterpart of [`read_message`].
pub async fn read_message_async<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Ipc(format!("Failed to read IPC message length: {}", e))),
    }
    let len = check_len(len_bytes)?;

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    decode_body(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestCase;
    use std::io::Cursor;

    #[test]
    fn test_request_wire_shape() {
        let request = WorkerRequest::RunBenchmark(RunRequest {
            test_cases: vec![TestCase::new("1", "For Loop", "let s = 0;")],
            setup_code: "return 1;".into(),
            async_mode: true,
            dependencies: vec![],
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "RUN_BENCHMARK");
        assert_eq!(json["testCases"][0]["name"], "For Loop");
        assert_eq!(json["setupCode"], "return 1;");
        assert_eq!(json["asyncMode"], true);
    }

    #[test]
    fn test_request_optional_fields() {
        let request: WorkerRequest = serde_json::from_str(
            r#"{"type":"RUN_BENCHMARK","testCases":[{"id":"a","name":"A","code":"1"}]}"#,
        )
        .unwrap();
        let WorkerRequest::RunBenchmark(run) = request else {
            panic!("expected a run request");
        };
        assert_eq!(run.setup_code, "");
        assert!(!run.async_mode);
        assert!(run.dependencies.is_empty());
    }

    #[test]
    fn test_response_wire_shape() {
        let progress = WorkerResponse::BenchmarkProgress {
            progress: Progress::new(0, 2, "Validating test cases..."),
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["type"], "BENCHMARK_PROGRESS");
        assert_eq!(json["progress"]["name"], "Validating test cases...");
        assert!(!progress.is_terminal());

        let error = WorkerResponse::BenchmarkError { error: "boom".into() };
        assert_eq!(serde_json::to_value(&error).unwrap()["type"], "BENCHMARK_ERROR");
        assert!(error.is_terminal());
    }

    #[test]
    fn test_frames_in_sequence() {
        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::BenchmarkError { error: "a".into() }).unwrap();
        write_message(&mut buf, &WorkerResponse::BenchmarkComplete { results: vec![] }).unwrap();
        let first_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(&buf[4..4 + first_len], br#"{"type":"BENCHMARK_ERROR","error":"a"}"#);

        let mut cursor = Cursor::new(buf);
        let first: Option<WorkerResponse> = read_message(&mut cursor).unwrap();
        let second: Option<WorkerResponse> = read_message(&mut cursor).unwrap();
        let end: Option<WorkerResponse> = read_message(&mut cursor).unwrap();
        assert_eq!(first, Some(WorkerResponse::BenchmarkError { error: "a".into() }));
        assert_eq!(second, Some(WorkerResponse::BenchmarkComplete { results: vec![] }));
        assert_eq!(end, None);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut cursor = Cursor::new(((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes().to_vec());
        let err = read_message::<_, WorkerResponse>(&mut cursor).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_malformed_body_keeps_stream_aligned() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(b"{x}");
        write_message(&mut buf, &WorkerRequest::Shutdown).unwrap();

        let mut cursor = Cursor::new(buf);
        let bad = read_message::<_, WorkerRequest>(&mut cursor);
        assert!(matches!(bad, Err(Error::Serialization(_))));
        let next: Option<WorkerRequest> = read_message(&mut cursor).unwrap();
        assert_eq!(next, Some(WorkerRequest::Shutdown));
    }

    #[test]
    fn test_truncated_body_is_ipc_error() {
        let mut buf = 10u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let mut cursor = Cursor::new(buf);
        let err = read_message::<_, WorkerRequest>(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = WorkerResponse::BenchmarkProgress {
            progress: Progress::new(1, 1, "Benchmark completed"),
        };
        write_message_async(&mut client, &sent).await.unwrap();
        drop(client);

        let received: Option<WorkerResponse> = read_message_async(&mut server).await.unwrap();
        assert_eq!(received, Some(sent));
        let end: Option<WorkerResponse> = read_message_async(&mut server).await.unwrap();
        assert_eq!(end, None);
    }
}
