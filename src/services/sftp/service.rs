// SFTP 服务 - 封装 russh-sftp 客户端

use std::path::Path;

use async_trait::async_trait;
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::models::sftp::{EntryKind, RemoteEntry};
use crate::ssh::error::SshError;
use crate::ssh::handler::SshClientHandler;
use crate::ssh::transport::RemoteFs;

/// SFTP 服务
/// 封装 russh-sftp 客户端，提供文件操作接口
pub struct SftpService {
    /// russh-sftp 客户端会话
    sftp: SftpSession,
}

impl SftpService {
    /// 在已认证的连接上打开 SFTP 子系统
    pub async fn open(handle: &Handle<SshClientHandler>) -> Result<Self, SshError> {
        debug!("[SFTP] Opening SFTP subsystem channel");

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::transport(format!("Failed to open channel: {}", e)))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::transport(format!("Failed to request sftp subsystem: {}", e)))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::transport(format!("Failed to create SFTP session: {}", e)))?;

        Ok(Self { sftp })
    }
}

#[async_trait]
impl RemoteFs for SftpService {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError> {
        debug!("[SFTP] Reading directory: {}", path);

        let dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| SshError::transport(format!("Failed to read directory {}: {}", path, e)))?;

        let entries: Vec<RemoteEntry> = dir
            .map(|entry| {
                let file_type = entry.file_type();
                let kind = if file_type.is_dir() {
                    EntryKind::Dir
                } else if file_type.is_file() {
                    EntryKind::File
                } else {
                    EntryKind::Other
                };
                RemoteEntry::new(entry.file_name(), kind)
            })
            .collect();

        debug!("[SFTP] Read {} entries from {}", entries.len(), path);
        Ok(entries)
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, SshError> {
        info!(
            "[SFTP] Downloading {} -> {}",
            remote_path,
            local_path.display()
        );

        let mut remote = self
            .sftp
            .open(remote_path)
            .await
            .map_err(|e| SshError::transport(format!("Failed to open {}: {}", remote_path, e)))?;

        let mut local = tokio::fs::File::create(local_path).await.map_err(|e| {
            SshError::transport(format!(
                "Failed to create local file {}: {}",
                local_path.display(),
                e
            ))
        })?;

        let bytes = tokio::io::copy(&mut remote, &mut local)
            .await
            .map_err(|e| SshError::transport(format!("Failed to download {}: {}", remote_path, e)))?;

        local.flush().await.map_err(|e| {
            SshError::transport(format!("Failed to write {}: {}", local_path.display(), e))
        })?;
        if let Err(e) = remote.shutdown().await {
            warn!("[SFTP] Failed to close remote file {}: {}", remote_path, e);
        }

        debug!("[SFTP] Downloaded {} bytes from {}", bytes, remote_path);
        Ok(bytes)
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, SshError> {
        info!(
            "[SFTP] Uploading {} -> {}",
            local_path.display(),
            remote_path
        );

        let mut local = tokio::fs::File::open(local_path).await.map_err(|e| {
            SshError::transport(format!(
                "Failed to open local file {}: {}",
                local_path.display(),
                e
            ))
        })?;

        let mut remote = self
            .sftp
            .create(remote_path)
            .await
            .map_err(|e| SshError::transport(format!("Failed to create {}: {}", remote_path, e)))?;

        let bytes = tokio::io::copy(&mut local, &mut remote)
            .await
            .map_err(|e| SshError::transport(format!("Failed to upload to {}: {}", remote_path, e)))?;

        // shutdown 会刷新缓冲并关闭远程句柄
        remote
            .shutdown()
            .await
            .map_err(|e| SshError::transport(format!("Failed to finish {}: {}", remote_path, e)))?;

        debug!("[SFTP] Uploaded {} bytes to {}", bytes, remote_path);
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), SshError> {
        self.sftp.close().await.map_err(SshError::from)
    }
}
