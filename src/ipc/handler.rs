// src/ipc/handler.rs
// Per-connection handler for boundary requests

use super::ops::VaultServer;
use super::protocol::{BoundaryRequest, BoundaryResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum size of a single request line (256 KB).
/// Prevents OOM from a malicious or buggy UI process sending unbounded data.
const MAX_LINE_SIZE: usize = 262_144;

/// Per-operation timeout. `build_context` reads and decrypts a snapshot,
/// so it gets more headroom than the simple writes.
fn op_timeout(op: &str) -> Duration {
    match op {
        "build_context" => Duration::from_secs(10),
        _ => Duration::from_secs(5),
    }
}

/// Handle a single connection: loop reading request lines until EOF.
///
/// The UI typically issues a couple of operations per user action
/// (build_context, then reinforce), so multiple requests per connection
/// are supported. Generic over the stream type so any
/// `AsyncRead + AsyncWrite` transport works.
pub async fn handle_connection<S>(stream: S, server: Arc<VaultServer>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut writer = writer;

    loop {
        // Bounded line read: rejects oversized lines BEFORE buffering
        // them. A plain read_line would allocate the whole line first.
        let mut buf = String::new();
        let mut eof = false;
        let mut too_large = false;
        loop {
            let available = match reader.fill_buf().await {
                Ok([]) => {
                    eof = true;
                    break;
                }
                Ok(bytes) => bytes,
                Err(_) => return,
            };
            let newline_pos = available.iter().position(|&b| b == b'\n');
            let end = newline_pos.map(|p| p + 1).unwrap_or(available.len());
            if buf.len() + end > MAX_LINE_SIZE {
                too_large = true;
                reader.consume(end);
                break;
            }
            buf.push_str(&String::from_utf8_lossy(&available[..end]));
            reader.consume(end);
            if newline_pos.is_some() {
                break;
            }
        }
        if eof {
            break;
        }
        if too_large {
            let resp = BoundaryResponse::failure(String::new(), "VALIDATION");
            let _ = write_response(&mut writer, &resp).await;
            break;
        }

        let line = buf.trim();
        if line.is_empty() {
            continue;
        }

        let request: BoundaryRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(_) => {
                let resp = BoundaryResponse::failure(String::new(), "VALIDATION");
                let _ = write_response(&mut writer, &resp).await;
                continue;
            }
        };

        let id = request.id.clone();
        let timeout = op_timeout(&request.op);
        let server = server.clone();

        // The server is synchronous (short transactions on the guarded
        // connection); run it off the async worker thread. A panic or a
        // timeout still produces a tagged response — nothing raw crosses.
        let handled =
            tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || server.handle(request)))
                .await;
        let resp = match handled {
            Ok(Ok(resp)) => resp,
            Ok(Err(_join_error)) => BoundaryResponse::failure(id, "INTERNAL"),
            Err(_elapsed) => BoundaryResponse::failure(id, "INTERNAL"),
        };

        if write_response(&mut writer, &resp).await.is_err() {
            break;
        }
    }
}

async fn write_response<W>(writer: &mut W, resp: &BoundaryResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(resp).unwrap_or_else(|_| {
        // Serialization of our own response type cannot realistically
        // fail; emit a bare internal error if it somehow does.
        r#"{"id":"","ok":false,"error":"INTERNAL"}"#.to_string()
    });
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
