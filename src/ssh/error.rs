// SSH 错误类型定义

use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误（没有可用的认证方式等）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 网络错误（连接目标主机失败）
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 连接超时（仅在配置了 connect_timeout_secs 时出现）
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// 当前没有活跃会话
    #[error("Not connected")]
    NotConnected,

    /// 连接建立后的传输错误（列目录、传输文件、打开转发通道）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 隧道已在运行
    #[error("Tunnel is already running")]
    AlreadyRunning,

    /// 本地监听端口绑定失败
    #[error("Failed to bind 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl SshError {
    /// 构造传输错误
    pub fn transport(message: impl Into<String>) -> Self {
        SshError::Transport(message.into())
    }

    /// 是否属于建立连接阶段的错误
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            SshError::Network(_)
                | SshError::Auth(_)
                | SshError::Protocol(_)
                | SshError::Key(_)
                | SshError::Timeout(_)
        )
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Key(e.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for SshError {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        SshError::Transport(e.to_string())
    }
}
