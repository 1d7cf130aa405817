// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use russh::keys::PublicKey;

use super::event::EventLog;

/// SSH 客户端 Handler
/// 处理 SSH 连接过程中的各种回调
pub struct SshClientHandler {
    /// 事件日志
    log: EventLog,
    /// 服务器主机名（用于日志）
    host: String,
}

impl SshClientHandler {
    /// 创建新的 Handler
    pub fn new(log: EventLog, host: String) -> Self {
        Self { log, host }
    }
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256);

        self.log.info(format!(
            "[SSH] Server key fingerprint for {}: {}",
            self.host, fingerprint
        ));
        self.log.debug(format!(
            "[SSH] Server key type: {}",
            server_public_key.algorithm()
        ));

        // TODO: 接入 known_hosts 校验，目前接受所有主机密钥
        Ok(true)
    }

    /// 服务器认证横幅
    async fn auth_banner(
        &mut self,
        banner: &str,
        _session: &mut russh::client::Session,
    ) -> Result<(), Self::Error> {
        for line in banner.lines().filter(|l| !l.trim().is_empty()) {
            self.log.info(format!("[SSH] Banner: {}", line.trim_end()));
        }
        Ok(())
    }
}
