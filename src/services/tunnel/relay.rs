// 字节中继
// 在本地 socket 与远程转发通道之间双向搬运数据

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 单次读写缓冲大小
const BUFFER_SIZE: usize = 32 * 1024;

/// 中继错误，区分出错的一端
#[derive(Debug, Error)]
pub enum RelayError {
    /// 本地 socket 读写失败
    #[error("local socket error: {0}")]
    Local(#[source] io::Error),
    /// 远程通道读写失败
    #[error("remote channel error: {0}")]
    Remote(#[source] io::Error),
}

/// 中继正常结束时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// 本地 -> 远程字节数
    pub to_remote: u64,
    /// 远程 -> 本地字节数
    pub to_local: u64,
}

#[derive(Clone, Copy, Debug)]
enum Side {
    Local,
    Remote,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::Local => Side::Remote,
            Side::Remote => Side::Local,
        }
    }

    fn error(self, e: io::Error) -> RelayError {
        match self {
            Side::Local => RelayError::Local(e),
            Side::Remote => RelayError::Remote(e),
        }
    }
}

/// 单向搬运：读到 EOF 后 shutdown 写端（刷新缓冲后发送 EOF）
async fn pump<R, W>(reader: &mut R, writer: &mut W, from: Side) -> Result<u64, RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let to = from.other();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await.map_err(|e| from.error(e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .await
            .map_err(|e| to.error(e))?;
        total += n as u64;
    }

    writer.shutdown().await.map_err(|e| to.error(e))?;
    Ok(total)
}

/// 运行一条中继，直到两个方向都结束或任一端出错
///
/// - 远程 EOF：优雅关闭本地写端，另一方向继续直到本地关闭
/// - 本地 EOF：向远程发送 EOF，另一方向继续
/// - 任一端出错：立即返回，两端随之被丢弃（直接断开）
pub async fn relay<L, R>(local: L, remote: R) -> Result<RelayStats, RelayError>
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_rd, mut local_wr) = tokio::io::split(local);
    let (mut remote_rd, mut remote_wr) = tokio::io::split(remote);

    let upstream = pump(&mut local_rd, &mut remote_wr, Side::Local);
    let downstream = pump(&mut remote_rd, &mut local_wr, Side::Remote);
    tokio::pin!(upstream, downstream);

    let mut to_remote = None;
    let mut to_local = None;
    while to_remote.is_none() || to_local.is_none() {
        tokio::select! {
            res = &mut upstream, if to_remote.is_none() => to_remote = Some(res?),
            res = &mut downstream, if to_local.is_none() => to_local = Some(res?),
        }
    }

    Ok(RelayStats {
        to_remote: to_remote.unwrap_or_default(),
        to_local: to_local.unwrap_or_default(),
    })
}
