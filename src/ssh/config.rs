// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::error::SshError;
use crate::models::settings::ConnectionSettings;

/// Windows 下 OpenSSH agent 的默认命名管道
#[cfg(windows)]
const DEFAULT_AGENT_PIPE: &str = r"\\.\pipe\openssh-ssh-agent";

/// 调用方选择的认证方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Password,
    Key,
    Agent,
}

/// 连接参数（来自 UI，认证方式尚未解析）
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConnectionParams {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    /// 显式选择的认证方式；缺省时要求只填写了一种凭据
    #[serde(default)]
    pub auth: Option<AuthKind>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub agent_socket: Option<PathBuf>,
}

impl ConnectionParams {
    /// 解析出唯一的认证方式，失败时不做任何网络操作
    pub fn resolve(&self, default_port: u16) -> Result<SshConfig, SshError> {
        if self.host.trim().is_empty() {
            return Err(SshError::Config("Host is required".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(SshError::Config("Username is required".to_string()));
        }

        let kind = match self.auth {
            Some(kind) => kind,
            None => self.infer_auth_kind()?,
        };

        let auth = match kind {
            AuthKind::Password => AuthMethod::Password(self.password.clone().ok_or_else(|| {
                SshError::Config("Password authentication selected but no password given".to_string())
            })?),
            AuthKind::Key => {
                let key_path = self
                    .private_key_path
                    .clone()
                    .filter(|p| !p.as_os_str().is_empty())
                    .ok_or_else(|| {
                        SshError::Config(
                            "Key authentication selected but no private key path given".to_string(),
                        )
                    })?;
                AuthMethod::PublicKey {
                    key_path,
                    passphrase: self.passphrase.clone().filter(|p| !p.is_empty()),
                }
            }
            AuthKind::Agent => AuthMethod::Agent {
                socket: resolve_agent_socket(self.agent_socket.clone())?,
            },
        };

        Ok(SshConfig {
            host: self.host.trim().to_string(),
            port: self.port.unwrap_or(default_port),
            username: self.username.clone(),
            auth,
        })
    }

    /// 未显式选择时按已填写的凭据推断；多于一种则拒绝
    fn infer_auth_kind(&self) -> Result<AuthKind, SshError> {
        let mut supplied = Vec::new();
        if self.password.is_some() {
            supplied.push(AuthKind::Password);
        }
        if self
            .private_key_path
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
        {
            supplied.push(AuthKind::Key);
        }
        if self
            .agent_socket
            .as_ref()
            .is_some_and(|p| !p.as_os_str().is_empty())
        {
            supplied.push(AuthKind::Agent);
        }

        match supplied.as_slice() {
            [kind] => Ok(*kind),
            [] => Err(SshError::Config(
                "No authentication method provided".to_string(),
            )),
            _ => Err(SshError::Config(
                "Multiple authentication methods provided; select exactly one".to_string(),
            )),
        }
    }
}

/// SSH 连接配置（认证方式已解析）
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证方式
    pub auth: AuthMethod,
}

/// 认证方式
#[derive(Clone, Debug, PartialEq)]
pub enum AuthMethod {
    /// 密码认证
    Password(String),
    /// 公钥认证
    PublicKey {
        /// 私钥文件路径
        key_path: PathBuf,
        /// 私钥密码（如果有）
        passphrase: Option<String>,
    },
    /// ssh-agent 认证
    Agent {
        /// agent 套接字（Unix）或命名管道（Windows）路径
        socket: PathBuf,
    },
}

impl AuthMethod {
    /// 日志用名称
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::PublicKey { .. } => "public key",
            AuthMethod::Agent { .. } => "agent",
        }
    }
}

/// 解析 agent 地址：显式参数 > SSH_AUTH_SOCK > 平台默认值
pub fn resolve_agent_socket(explicit: Option<PathBuf>) -> Result<PathBuf, SshError> {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path);
    }
    if let Some(sock) = std::env::var_os("SSH_AUTH_SOCK").filter(|s| !s.is_empty()) {
        return Ok(PathBuf::from(sock));
    }
    #[cfg(windows)]
    let fallback = Some(PathBuf::from(DEFAULT_AGENT_PIPE));
    #[cfg(not(windows))]
    let fallback: Option<PathBuf> = None;

    fallback.ok_or_else(|| {
        SshError::Config(
            "Agent authentication requested but no agent socket was given and SSH_AUTH_SOCK is not set"
                .to_string(),
        )
    })
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            max_retries: 3,
        }
    }
}

impl From<&ConnectionSettings> for KeepaliveConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            enabled: settings.keepalive_enabled && settings.keepalive_interval_secs > 0,
            interval: settings.keepalive_interval_secs,
            max_retries: settings.keepalive_max,
        }
    }
}

/// 构建 russh 客户端配置
pub fn to_russh_config(keepalive: &KeepaliveConfig) -> russh::client::Config {
    let mut config = russh::client::Config::default();
    // 不设置 inactivity_timeout：空闲的会话不应被自动断开
    config.inactivity_timeout = None;
    if keepalive.enabled {
        config.keepalive_interval = Some(Duration::from_secs(keepalive.interval));
        config.keepalive_max = keepalive.max_retries as usize;
    }
    config
}
