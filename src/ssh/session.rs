// SSH 会话管理
// 单个远程会话：连接/断开、SFTP 操作与端口转发

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::config::{ConnectionParams, SshConfig};
use super::error::SshError;
use super::event::EventLog;
use super::transport::{Connector, RemoteFs, Transport};
use crate::models::settings::AppSettings;
use crate::models::sftp::{join_path, remote_base_name, sort_listing, RemoteEntry};
use crate::services::tunnel::{Tunnel, TunnelSpec, TunnelStatus};

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// 会话状态快照
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelStatus>,
}

/// 已连接会话持有的资源
struct ActiveSession {
    id: String,
    host: String,
    username: String,
    transport: Arc<dyn Transport>,
    sftp: Arc<dyn RemoteFs>,
    tunnel: Tunnel,
}

enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(ActiveSession),
}

/// SSH 会话
///
/// 连接、断开与隧道启停通过 `lifecycle` 串行执行；
/// 文件操作持有状态读锁，断开需要写锁，因此会等待进行中的操作结束后再关闭资源。
pub struct SshSession {
    connector: Arc<dyn Connector>,
    log: EventLog,
    settings: AppSettings,
    lifecycle: Mutex<()>,
    state: RwLock<ConnectionState>,
}

impl SshSession {
    pub fn new(connector: Arc<dyn Connector>, log: EventLog, settings: AppSettings) -> Self {
        Self {
            connector,
            log,
            settings,
            lifecycle: Mutex::new(()),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// 会话事件日志
    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// 记录失败并原样返回错误
    fn report(&self, context: &str, err: SshError) -> SshError {
        self.log.error(format!("{}: {}", context, err));
        err
    }

    /// 建立新会话；已有会话会先被完整断开
    pub async fn connect(&self, params: ConnectionParams) -> Result<(), SshError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;

        let config = params
            .resolve(self.settings.connection.default_port)
            .map_err(|e| self.report("[SSH] Connect failed", e))?;

        *self.state.write().await = ConnectionState::Connecting;
        match self.establish(&config).await {
            Ok(active) => {
                self.log.info(format!(
                    "[SSH] Session {} connected to {}@{}:{}",
                    active.id, config.username, config.host, config.port
                ));
                *self.state.write().await = ConnectionState::Connected(active);
                Ok(())
            }
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                let context = if e.is_connect_failure() {
                    format!("[SSH] Connection to {}:{} failed", config.host, config.port)
                } else {
                    "[SFTP] Failed to start SFTP session".to_string()
                };
                Err(self.report(&context, e))
            }
        }
    }

    /// 认证并打开 SFTP 子系统；SFTP 失败时关闭刚建立的连接
    async fn establish(&self, config: &SshConfig) -> Result<ActiveSession, SshError> {
        let transport = self.connector.connect(config, &self.log).await?;

        let sftp = match transport.open_sftp().await {
            Ok(sftp) => sftp,
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    self.log
                        .warn(format!("[SSH] Failed to close connection: {}", close_err));
                }
                return Err(e);
            }
        };
        self.log.info("[SFTP] SFTP subsystem ready");

        let tunnel = Tunnel::new(
            transport.clone(),
            self.log.clone(),
            self.settings.tunnel.max_relays,
        );

        Ok(ActiveSession {
            id: Uuid::new_v4().to_string(),
            host: config.host.clone(),
            username: config.username.clone(),
            transport,
            sftp,
            tunnel,
        })
    }

    /// 断开会话，可重复调用
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    /// 释放会话资源：隧道 -> SFTP -> 传输连接，任何一步失败都继续
    async fn teardown(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        let ConnectionState::Connected(active) = previous else {
            return;
        };

        self.log.info(format!(
            "[SSH] Disconnecting session {} from {}",
            active.id, active.host
        ));
        active.tunnel.stop().await;
        if let Err(e) = active.sftp.close().await {
            self.log
                .warn(format!("[SFTP] Failed to close SFTP session: {}", e));
        }
        if let Err(e) = active.transport.close().await {
            self.log.warn(format!("[SSH] Failed to close connection: {}", e));
        }
        self.log.info("[SSH] Disconnected");
    }

    fn require(state: &ConnectionState) -> Result<&ActiveSession, SshError> {
        match state {
            ConnectionState::Connected(active) => Ok(active),
            _ => Err(SshError::NotConnected),
        }
    }

    /// 列出远程目录（不含 . 和 ..，目录在前，按名称排序）
    pub async fn list_remote(&self, dir: &str) -> Result<Vec<RemoteEntry>, SshError> {
        let context = format!("[SFTP] Failed to list {}", dir);
        let state = self.state.read().await;
        let active = Self::require(&state).map_err(|e| self.report(&context, e))?;

        let entries = active
            .sftp
            .read_dir(dir)
            .await
            .map_err(|e| self.report(&context, e))?;
        Ok(sort_listing(entries))
    }

    /// 依次上传本地文件到远程目录；第一个失败即停止，已上传的文件保留
    pub async fn upload_files(
        &self,
        local_paths: &[PathBuf],
        remote_dir: &str,
    ) -> Result<(), SshError> {
        let state = self.state.read().await;
        let active = Self::require(&state).map_err(|e| self.report("[SFTP] Upload failed", e))?;

        let total = local_paths.len();
        for (index, local_path) in local_paths.iter().enumerate() {
            let name = local_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    SshError::transport(format!(
                        "Invalid local file path: {}",
                        local_path.display()
                    ))
                })
                .map_err(|e| self.report("[SFTP] Upload failed", e))?;
            let remote_path = join_path(remote_dir, name);

            match active.sftp.upload(local_path, &remote_path).await {
                Ok(bytes) => self.log.info(format!(
                    "[SFTP] Uploaded {} -> {} ({} bytes, {}/{})",
                    local_path.display(),
                    remote_path,
                    bytes,
                    index + 1,
                    total
                )),
                Err(e) => {
                    let err = SshError::transport(format!(
                        "Failed to upload {}: {}",
                        local_path.display(),
                        detail(e)
                    ));
                    return Err(self.report("[SFTP] Upload failed", err));
                }
            }
        }
        Ok(())
    }

    /// 下载远程文件到新建的唯一临时目录，返回本地路径
    pub async fn download_to_temp(&self, remote_path: &str) -> Result<PathBuf, SshError> {
        let context = format!("[SFTP] Failed to download {}", remote_path);
        let state = self.state.read().await;
        let active = Self::require(&state).map_err(|e| self.report(&context, e))?;

        let name = remote_base_name(remote_path)
            .ok_or_else(|| SshError::transport(format!("Invalid remote path: {}", remote_path)))
            .map_err(|e| self.report(&context, e))?;

        let dir = self
            .create_download_dir()
            .await
            .map_err(|e| self.report(&context, e))?;
        let local_path = dir.join(name);

        if let Err(e) = active.sftp.download(remote_path, &local_path).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                self.log.warn(format!(
                    "[SFTP] Failed to remove {}: {}",
                    dir.display(),
                    cleanup
                ));
            }
            return Err(self.report(&context, e));
        }

        self.log.info(format!(
            "[SFTP] Downloaded {} to {}",
            remote_path,
            local_path.display()
        ));
        Ok(local_path)
    }

    /// 新建 {download_root}/{uuid}；目录已存在时报错而不是复用
    async fn create_download_dir(&self) -> Result<PathBuf, SshError> {
        let root = self.settings.transfer.download_root();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            SshError::transport(format!("Failed to create {}: {}", root.display(), e))
        })?;

        let dir = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir(&dir).await.map_err(|e| {
            SshError::transport(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    /// 启动本地端口转发，返回实际监听地址
    pub async fn start_tunnel(&self, spec: TunnelSpec) -> Result<SocketAddr, SshError> {
        let _lifecycle = self.lifecycle.lock().await;
        let state = self.state.read().await;
        let active =
            Self::require(&state).map_err(|e| self.report("[Tunnel] Start failed", e))?;

        active
            .tunnel
            .start(spec)
            .await
            .map_err(|e| self.report("[Tunnel] Start failed", e))
    }

    /// 停止端口转发；未连接或未运行时什么也不做
    pub async fn stop_tunnel(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let state = self.state.read().await;
        let ConnectionState::Connected(active) = &*state else {
            return;
        };
        if !active.tunnel.is_running().await {
            self.log.debug("[Tunnel] No tunnel running, nothing to stop");
            return;
        }
        active.tunnel.stop().await;
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.read().await;
        match &*state {
            ConnectionState::Disconnected => SessionStatus::idle(SessionPhase::Disconnected),
            ConnectionState::Connecting => SessionStatus::idle(SessionPhase::Connecting),
            ConnectionState::Connected(active) => SessionStatus {
                state: SessionPhase::Connected,
                session_id: Some(active.id.clone()),
                host: Some(active.host.clone()),
                username: Some(active.username.clone()),
                tunnel: active.tunnel.status().await,
            },
        }
    }
}

impl SessionStatus {
    fn idle(state: SessionPhase) -> Self {
        Self {
            state,
            session_id: None,
            host: None,
            username: None,
            tunnel: None,
        }
    }
}

/// 取错误的描述部分，避免嵌套时重复前缀
fn detail(err: SshError) -> String {
    match err {
        SshError::Transport(message) => message,
        other => other.to_string(),
    }
}
