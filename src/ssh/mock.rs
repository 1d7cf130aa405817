// 测试用传输层替身
// 连接器统计存活连接数；转发通道直连本机目标端口；文件系统保存在内存中

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::config::SshConfig;
use super::error::SshError;
use super::event::EventLog;
use super::transport::{Connector, ForwardStream, RemoteFs, Transport};
use crate::models::sftp::RemoteEntry;

/// 记录关闭顺序等事件
pub type Journal = Arc<Mutex<Vec<String>>>;

fn record(journal: &Journal, event: impl Into<String>) {
    journal.lock().unwrap().push(event.into());
}

/// 内存文件系统
#[derive(Default)]
pub struct MockFs {
    /// 目录 -> 原始列表
    pub dirs: Mutex<HashMap<String, Vec<RemoteEntry>>>,
    /// 远程路径 -> 内容
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    /// 已成功上传的远程路径（按顺序）
    pub uploads: Mutex<Vec<String>>,
    /// 上传时遇到该本地文件名即失败
    pub fail_upload_named: Mutex<Option<String>>,
    /// 下载前等待的时长
    pub download_delay: Mutex<Option<Duration>>,
    pub journal: Journal,
}

impl MockFs {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn add_dir(&self, path: &str, entries: Vec<RemoteEntry>) {
        self.dirs.lock().unwrap().insert(path.to_string(), entries);
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

/// 单个 SFTP 会话：共享同一份内存文件系统，关闭状态各自独立
pub struct MockSftp {
    fs: Arc<MockFs>,
    closed: AtomicBool,
}

impl MockSftp {
    pub fn open(fs: Arc<MockFs>) -> Self {
        Self {
            fs,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), SshError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SshError::transport("SFTP session closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for MockSftp {
    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>, SshError> {
        self.ensure_open()?;
        self.fs
            .dirs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SshError::transport(format!("No such file: {}", path)))
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, SshError> {
        self.ensure_open()?;
        let delay = *self.fs.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let content = self
            .fs
            .files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| SshError::transport(format!("No such file: {}", remote_path)))?;
        tokio::fs::write(local_path, &content).await?;
        record(&self.fs.journal, format!("download:{}", remote_path));
        Ok(content.len() as u64)
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<u64, SshError> {
        self.ensure_open()?;
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if self.fs.fail_upload_named.lock().unwrap().as_deref() == Some(name.as_str()) {
            return Err(SshError::transport("Permission denied"));
        }
        let content = tokio::fs::read(local_path).await?;
        let bytes = content.len() as u64;
        self.fs
            .files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), content);
        self.fs.uploads.lock().unwrap().push(remote_path.to_string());
        Ok(bytes)
    }

    async fn close(&self) -> Result<(), SshError> {
        self.closed.store(true, Ordering::SeqCst);
        record(&self.fs.journal, "sftp.close");
        Ok(())
    }
}

/// 转发通道直连 target_host:target_port 的传输连接
pub struct MockTransport {
    live: Arc<AtomicUsize>,
    closed: AtomicBool,
    fs: Arc<MockFs>,
    fail_sftp: bool,
    pub fail_forward: AtomicBool,
    journal: Journal,
}

impl MockTransport {
    /// 不经过连接器的独立传输（隧道测试用）
    pub fn standalone() -> Arc<Self> {
        let journal = Journal::default();
        Arc::new(Self {
            live: Arc::new(AtomicUsize::new(1)),
            closed: AtomicBool::new(false),
            fs: Arc::new(MockFs::new(journal.clone())),
            fail_sftp: false,
            fail_forward: AtomicBool::new(false),
            journal,
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>, SshError> {
        if self.fail_sftp {
            return Err(SshError::transport("subsystem request failed"));
        }
        Ok(Arc::new(MockSftp::open(self.fs.clone())))
    }

    async fn open_forward(
        &self,
        target_host: &str,
        target_port: u16,
        _origin_host: &str,
        _origin_port: u16,
    ) -> Result<ForwardStream, SshError> {
        if self.fail_forward.load(Ordering::SeqCst) {
            return Err(SshError::transport("Channel open failure: administratively prohibited"));
        }
        let stream = TcpStream::connect((target_host, target_port))
            .await
            .map_err(|e| SshError::transport(e.to_string()))?;
        Ok(Box::new(stream))
    }

    async fn close(&self) -> Result<(), SshError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            record(&self.journal, "transport.close");
        }
        Ok(())
    }
}

/// 统计连接次数与存活连接数的连接器
pub struct MockConnector {
    pub fs: Arc<MockFs>,
    pub journal: Journal,
    pub live: Arc<AtomicUsize>,
    pub connects: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_sftp: AtomicBool,
    pub connect_delay: Mutex<Option<Duration>>,
    /// 最近一次连接使用的配置
    pub last_config: Mutex<Option<SshConfig>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        let journal = Journal::default();
        Arc::new(Self {
            fs: Arc::new(MockFs::new(journal.clone())),
            journal,
            live: Arc::new(AtomicUsize::new(0)),
            connects: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_sftp: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
            last_config: Mutex::new(None),
        })
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        config: &SshConfig,
        _log: &EventLog,
    ) -> Result<Arc<dyn Transport>, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config.clone());

        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SshError::Auth("Password authentication failed".to_string()));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport {
            live: self.live.clone(),
            closed: AtomicBool::new(false),
            fs: self.fs.clone(),
            fail_sftp: self.fail_sftp.load(Ordering::SeqCst),
            fail_forward: AtomicBool::new(false),
            journal: self.journal.clone(),
        }))
    }
}
