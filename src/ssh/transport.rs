// 传输层能力接口
// 会话核心只依赖这些 trait；russh 实现见 client.rs，SFTP 实现见 services/sftp

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::SshConfig;
use super::error::SshError;
use super::event::EventLog;
use crate::models::sftp::RemoteEntry;

/// 可用于端口转发的双向字节流
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// 转发通道（装箱）
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// 建立已认证的传输连接
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &SshConfig,
        log: &EventLog,
    ) -> Result<Arc<dyn Transport>, SshError>;
}

/// 已认证的传输连接，通道在其上复用
#[async_trait]
pub trait Transport: Send + Sync {
    /// 打开 SFTP 子系统
    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>, SshError>;

    /// 打开 direct-tcpip 转发通道
    async fn open_forward(
        &self,
        target_host: &str,
        target_port: u16,
        origin_host: &str,
        origin_port: u16,
    ) -> Result<ForwardStream, SshError>;

    /// 断开连接
    async fn close(&self) -> Result<(), SshError>;
}

/// 远程文件系统（SFTP 子系统）
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// 原始目录列表（可能包含 . 和 ..，未排序）
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError>;

    /// 下载远程文件到本地路径，返回字节数
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, SshError>;

    /// 上传本地文件到远程路径，返回字节数
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, SshError>;

    /// 关闭子系统
    async fn close(&self) -> Result<(), SshError>;
}
