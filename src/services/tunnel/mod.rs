// 本地端口转发（local -> remote）
// 在 127.0.0.1 上监听，每个入站连接通过传输连接打开一条 direct-tcpip 通道

mod relay;

use relay::relay;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::ssh::error::SshError;
use crate::ssh::event::EventLog;
use crate::ssh::transport::Transport;

/// accept 出错后的退避时间（如文件描述符耗尽）
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 隧道参数
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelSpec {
    /// 本地监听端口（0 表示由系统分配）
    pub local_port: u16,
    /// 远程目标主机（由服务器解析）
    pub remote_host: String,
    /// 远程目标端口
    pub remote_port: u16,
}

/// 隧道运行状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    /// 实际监听地址
    pub local_addr: SocketAddr,
    pub remote_host: String,
    pub remote_port: u16,
    /// 仍在转发的连接数
    pub active_relays: usize,
}

/// 正在运行的隧道
struct RunningTunnel {
    spec: TunnelSpec,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    relays: TaskTracker,
}

/// 端口转发隧道
/// 同一时刻最多一个监听；停止只关闭监听，已建立的转发自然结束
pub struct Tunnel {
    transport: Arc<dyn Transport>,
    log: EventLog,
    max_relays: Option<usize>,
    running: Mutex<Option<RunningTunnel>>,
}

impl Tunnel {
    pub fn new(transport: Arc<dyn Transport>, log: EventLog, max_relays: Option<usize>) -> Self {
        Self {
            transport,
            log,
            max_relays,
            running: Mutex::new(None),
        }
    }

    /// 开始监听，返回实际绑定的地址
    pub async fn start(&self, spec: TunnelSpec) -> Result<SocketAddr, SshError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SshError::AlreadyRunning);
        }

        let port = spec.local_port;
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| SshError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SshError::Bind { port, source })?;

        let shutdown = CancellationToken::new();
        let relays = TaskTracker::new();
        let acceptor = Acceptor {
            listener,
            spec: spec.clone(),
            transport: self.transport.clone(),
            log: self.log.clone(),
            max_relays: self.max_relays,
            relays: relays.clone(),
            shutdown: shutdown.clone(),
        };
        let accept_task = tokio::spawn(acceptor.run());

        self.log.info(format!(
            "[Tunnel] Forwarding {} -> {}:{}",
            local_addr, spec.remote_host, spec.remote_port
        ));

        *running = Some(RunningTunnel {
            spec,
            local_addr,
            shutdown,
            accept_task,
            relays,
        });
        Ok(local_addr)
    }

    /// 停止监听；未运行时什么也不做
    /// 返回后监听端口已释放，已建立的转发继续直到自行结束
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(tunnel) = running.take() else {
            return;
        };

        tunnel.shutdown.cancel();
        if let Err(e) = tunnel.accept_task.await {
            self.log
                .warn(format!("[Tunnel] Accept loop ended abnormally: {}", e));
        }
        tunnel.relays.close();

        self.log.info(format!(
            "[Tunnel] Stopped listening on {} ({} relays still open)",
            tunnel.local_addr,
            tunnel.relays.len()
        ));
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// 监听状态快照；active_relays 为当前仍在转发的连接数
    pub async fn status(&self) -> Option<TunnelStatus> {
        self.running.lock().await.as_ref().map(|t| TunnelStatus {
            local_addr: t.local_addr,
            remote_host: t.spec.remote_host.clone(),
            remote_port: t.spec.remote_port,
            active_relays: t.relays.len(),
        })
    }
}

/// accept 循环
struct Acceptor {
    listener: TcpListener,
    spec: TunnelSpec,
    transport: Arc<dyn Transport>,
    log: EventLog,
    max_relays: Option<usize>,
    relays: TaskTracker,
    shutdown: CancellationToken,
}

impl Acceptor {
    async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_relay(stream, peer),
                    Err(e) => {
                        self.log.warn(format!("[Tunnel] Accept failed: {}", e));
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        self.log.debug(format!(
            "[Tunnel] Listener on port {} closed",
            self.spec.local_port
        ));
    }

    fn spawn_relay(&self, stream: TcpStream, peer: SocketAddr) {
        if let Some(max) = self.max_relays {
            if self.relays.len() >= max {
                self.log.warn(format!(
                    "[Tunnel] Relay limit ({}) reached, rejecting connection from {}",
                    max, peer
                ));
                return;
            }
        }

        let transport = self.transport.clone();
        let log = self.log.clone();
        let remote_host = self.spec.remote_host.clone();
        let remote_port = self.spec.remote_port;

        self.relays.spawn(async move {
            stream.set_nodelay(true).ok();

            let channel = match transport
                .open_forward(&remote_host, remote_port, &peer.ip().to_string(), peer.port())
                .await
            {
                Ok(channel) => channel,
                Err(e) => {
                    // 丢弃 stream 即关闭本地连接
                    log.error(format!(
                        "[Tunnel] Closing connection from {}: {}",
                        peer, e
                    ));
                    return;
                }
            };
            log.debug(format!(
                "[Tunnel] Relay {} -> {}:{} opened",
                peer, remote_host, remote_port
            ));

            match relay(stream, channel).await {
                Ok(stats) => log.debug(format!(
                    "[Tunnel] Relay {} closed ({} bytes sent, {} bytes received)",
                    peer, stats.to_remote, stats.to_local
                )),
                Err(e) => log.warn(format!("[Tunnel] Relay {} failed: {}", peer, e)),
            }
        });
    }
}
