//! 帧层：4字节大端长度前缀 + 消息体
//!
//! 消息体内容对帧层不透明，编解码在 `WireMessage` 完成。

use grid_core::{GridError, GridResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 读一帧
///
/// 对端在帧边界上干净关闭连接时返回 `Ok(None)`；帧中途断开
/// 或长度超限是错误。
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> GridResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    // 长度前缀逐段读: 边界上的EOF是干净关闭, 中途EOF是截断
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(GridError::Network(format!(
                "帧长度前缀不完整: 只读到 {filled} 字节"
            )));
        }
        filled += n;
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(GridError::Network(format!(
            "帧长度 {len} 超过上限 {max_len}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// 写一帧并冲刷
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> GridResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| GridError::Network(format!("帧过大: {} 字节", payload.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
