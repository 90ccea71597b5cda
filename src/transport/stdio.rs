//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! One implicit session for the life of the process. Messages are handled in the order
//! they arrive; stdout carries nothing but protocol messages.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::Result;
use crate::server::{JsonRpcResponse, McpServer};

/// Serve on the process's stdin/stdout until EOF or a shutdown signal.
pub async fn serve(server: Arc<McpServer>) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = tokio::io::stdout();

    tokio::select! {
        result = serve_lines(&server, reader, writer) => result,
        _ = super::shutdown_signal() => Ok(()),
    }
}

/// Read messages line by line from `reader`, writing each response to `writer`.
pub async fn serve_lines<R, W>(server: &McpServer, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(response) = server.handle_line(line).await {
            write_response(&mut writer, &response).await?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

async fn write_response<W>(writer: &mut W, response: &JsonRpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    // serde_json never emits raw newlines, so one message is one line
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}
