// SSH 客户端核心实现（基于 russh）

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{AuthResult, Handle};
use russh::keys::HashAlg;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::{to_russh_config, AuthMethod, KeepaliveConfig, SshConfig};
use super::error::SshError;
use super::event::EventLog;
use super::handler::SshClientHandler;
use super::transport::{Connector, ForwardStream, RemoteFs, Transport};
use crate::models::settings::ConnectionSettings;
use crate::services::sftp::SftpService;

/// russh 连接器
pub struct RusshConnector {
    /// 心跳配置
    keepalive: KeepaliveConfig,
    /// 可选的连接超时（秒）
    connect_timeout: Option<u64>,
}

impl RusshConnector {
    pub fn new(settings: &ConnectionSettings) -> Self {
        Self {
            keepalive: KeepaliveConfig::from(settings),
            connect_timeout: settings.connect_timeout_secs,
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        config: &SshConfig,
        log: &EventLog,
    ) -> Result<Arc<dyn Transport>, SshError> {
        let client = SshClient {
            config: config.clone(),
            log: log.clone(),
            keepalive: self.keepalive.clone(),
        };

        // 握手与认证在独立任务中运行，任务只持有自有数据
        let mut task = tokio::spawn(client.connect());
        let joined = match self.connect_timeout {
            Some(secs) => match timeout(Duration::from_secs(secs), &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(SshError::Timeout(secs));
                }
            },
            None => task.await,
        };
        let handle = joined
            .map_err(|e| SshError::Protocol(format!("Connection task failed: {}", e)))??;

        Ok(Arc::new(RusshTransport {
            handle,
            log: log.clone(),
        }))
    }
}

/// SSH 客户端
/// 负责 TCP 连接、握手与认证，返回已认证的 Handle
struct SshClient {
    config: SshConfig,
    log: EventLog,
    keepalive: KeepaliveConfig,
}

impl SshClient {
    async fn connect(self) -> Result<Handle<SshClientHandler>, SshError> {
        let config = &self.config;
        self.log.info(format!(
            "[SSH] Connecting to {}@{}:{}...",
            config.username, config.host, config.port
        ));

        // TCP 连接（tokio 负责异步 DNS 解析）
        let tcp_stream = TcpStream::connect((config.host.clone(), config.port))
            .await
            .map_err(SshError::Network)?;
        tcp_stream.set_nodelay(true).ok();
        self.log.info("[SSH] TCP connection established");

        // SSH 握手
        let handler = SshClientHandler::new(self.log.clone(), config.host.clone());
        let russh_config = Arc::new(to_russh_config(&self.keepalive));
        let mut handle = russh::client::connect_stream(russh_config, tcp_stream, handler)
            .await
            .map_err(SshError::from)?;
        self.log.info("[SSH] SSH handshake completed");

        // 认证
        self.log.info(format!(
            "[SSH] Authenticating as '{}' using {}...",
            config.username,
            config.auth.label()
        ));
        self.authenticate(&mut handle).await?;
        self.log.info("[SSH] Authentication successful");

        Ok(handle)
    }

    /// 执行认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        let username = self.config.username.clone();

        match self.config.auth.clone() {
            AuthMethod::Password(password) => {
                let result = handle
                    .authenticate_password(username, password)
                    .await
                    .map_err(SshError::from)?;
                ensure_success(result, "Password")
            }
            AuthMethod::PublicKey {
                key_path,
                passphrase,
            } => {
                let key = self
                    .load_private_key(&key_path, passphrase.as_deref())
                    .await?;
                let hash_alg = match key.algorithm() {
                    russh::keys::Algorithm::Rsa { .. } => {
                        handle.best_supported_rsa_hash().await.unwrap_or(None).flatten()
                    }
                    _ => None,
                };
                let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

                let result = handle
                    .authenticate_publickey(username, key_with_alg)
                    .await
                    .map_err(SshError::from)?;
                ensure_success(result, "Public key")
            }
            AuthMethod::Agent { socket } => {
                let rsa_hint = handle.best_supported_rsa_hash().await.unwrap_or(None).flatten();
                authenticate_with_agent(handle, username, socket, rsa_hint, self.log.clone()).await
            }
        }
    }

    /// 加载私钥文件
    async fn load_private_key(
        &self,
        key_path: &Path,
        passphrase: Option<&str>,
    ) -> Result<russh::keys::PrivateKey, SshError> {
        self.log.debug(format!(
            "[SSH] Loading private key from {}",
            key_path.display()
        ));

        let key_data = tokio::fs::read(key_path).await.map_err(|e| {
            SshError::Key(format!(
                "Failed to read key file {}: {}",
                key_path.display(),
                e
            ))
        })?;

        Ok(russh::keys::decode_secret_key(
            &String::from_utf8_lossy(&key_data),
            passphrase,
        )?)
    }
}

/// 通过 ssh-agent 依次尝试每个身份
#[cfg(unix)]
async fn authenticate_with_agent(
    handle: &mut Handle<SshClientHandler>,
    username: String,
    socket: PathBuf,
    rsa_hint: Option<HashAlg>,
    log: EventLog,
) -> Result<(), SshError> {
    use russh::keys::agent::client::AgentClient;
    use tokio::net::UnixStream;

    log.debug(format!(
        "[SSH] Connecting to SSH agent at {}",
        socket.display()
    ));
    let stream = UnixStream::connect(&socket)
        .await
        .map_err(|e| SshError::Auth(format!("Failed to connect to SSH agent: {}", e)))?;
    let mut agent = AgentClient::connect(stream);

    let mut identities = agent
        .request_identities()
        .await
        .map_err(|e| SshError::Auth(format!("Failed to list identities from SSH agent: {}", e)))?;
    if identities.is_empty() {
        return Err(SshError::Auth("SSH agent has no loaded keys".to_string()));
    }
    log.debug(format!(
        "[SSH] SSH agent offers {} identities",
        identities.len()
    ));

    for key in identities.drain(..) {
        let hash_alg = match key.algorithm() {
            russh::keys::Algorithm::Rsa { .. } => rsa_hint,
            _ => None,
        };
        match handle
            .authenticate_publickey_with(username.clone(), key.clone(), hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => return Ok(()),
            Ok(_) => continue,
            Err(e) => {
                log.warn(format!("[SSH] Agent authentication attempt failed: {}", e));
            }
        }
    }

    Err(SshError::Auth(
        "Server rejected every identity offered by the SSH agent".to_string(),
    ))
}

/// 通过 ssh-agent 依次尝试每个身份（Windows 命名管道）
#[cfg(windows)]
async fn authenticate_with_agent(
    handle: &mut Handle<SshClientHandler>,
    username: String,
    socket: PathBuf,
    rsa_hint: Option<HashAlg>,
    log: EventLog,
) -> Result<(), SshError> {
    use russh::keys::agent::client::AgentClient;
    use tokio::net::windows::named_pipe::ClientOptions;

    log.debug(format!(
        "[SSH] Connecting to SSH agent at {}",
        socket.display()
    ));
    let pipe = ClientOptions::new()
        .open(&socket)
        .map_err(|e| SshError::Auth(format!("Failed to connect to SSH agent: {}", e)))?;
    let mut agent = AgentClient::connect(pipe);

    let mut identities = agent
        .request_identities()
        .await
        .map_err(|e| SshError::Auth(format!("Failed to list identities from SSH agent: {}", e)))?;
    if identities.is_empty() {
        return Err(SshError::Auth("SSH agent has no loaded keys".to_string()));
    }

    for key in identities.drain(..) {
        let hash_alg = match key.algorithm() {
            russh::keys::Algorithm::Rsa { .. } => rsa_hint,
            _ => None,
        };
        match handle
            .authenticate_publickey_with(username.clone(), key.clone(), hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => return Ok(()),
            Ok(_) => continue,
            Err(e) => {
                log.warn(format!("[SSH] Agent authentication attempt failed: {}", e));
            }
        }
    }

    Err(SshError::Auth(
        "Server rejected every identity offered by the SSH agent".to_string(),
    ))
}

/// 将 russh 认证结果转换为错误
fn ensure_success(result: AuthResult, method: &str) -> Result<(), SshError> {
    match result {
        AuthResult::Success => Ok(()),
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            if partial_success {
                return Err(SshError::Auth(
                    "Partial authentication - additional auth required".to_string(),
                ));
            }
            Err(SshError::Auth(format!(
                "{} authentication failed. Server suggests: {:?}",
                method, remaining_methods
            )))
        }
    }
}

/// 基于 russh Handle 的传输连接
pub struct RusshTransport {
    handle: Handle<SshClientHandler>,
    log: EventLog,
}

#[async_trait]
impl Transport for RusshTransport {
    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>, SshError> {
        let service = SftpService::open(&self.handle).await?;
        Ok(Arc::new(service))
    }

    async fn open_forward(
        &self,
        target_host: &str,
        target_port: u16,
        origin_host: &str,
        origin_port: u16,
    ) -> Result<ForwardStream, SshError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                target_host,
                target_port.into(),
                origin_host,
                origin_port.into(),
            )
            .await
            .map_err(|e| {
                SshError::transport(format!(
                    "Failed to open forwarded channel to {}:{}: {}",
                    target_host, target_port, e
                ))
            })?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn close(&self) -> Result<(), SshError> {
        self.log.debug("[SSH] Sending disconnect to server");
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(SshError::from)
    }
}
