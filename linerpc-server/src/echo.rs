//! Echo responder: writes the first chunk it reads back to the peer, then
//! closes.

use crate::error::ServerError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serves one echo exchange.
///
/// Returns the number of bytes echoed. A peer that closes before sending
/// anything gets nothing written back.
pub async fn serve<S>(stream: &mut S, read_buffer_size: usize) -> Result<usize, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size.max(1)];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        tracing::debug!("Echo peer closed before sending data");
        return Ok(0);
    }

    tracing::debug!("Echoing {} bytes", n);
    stream.write_all(&buf[..n]).await?;
    stream.shutdown().await?;
    Ok(n)
}
