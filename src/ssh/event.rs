// SSH 事件日志
// 会话/隧道产生的日志行：同时写入 tracing，并转发给外部日志接收端

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

/// 日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 日志条目
#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    /// 时间戳
    pub timestamp: DateTime<Local>,
    /// 日志级别
    pub level: LogLevel,
    /// 消息内容
    pub message: String,
}

impl LogEntry {
    /// 创建新的日志条目
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

/// 事件日志
/// 发送端可随意克隆；接收端缺失或已关闭时日志只进入 tracing
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    sender: Option<mpsc::UnboundedSender<LogEntry>>,
}

impl EventLog {
    /// 创建带接收端的事件日志
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogEntry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// 只写 tracing 的事件日志
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    fn emit(&self, entry: LogEntry) {
        if let Some(sender) = &self.sender {
            // 接收端关闭时丢弃即可，日志不能阻塞核心操作
            let _ = sender.send(entry);
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        let entry = LogEntry::new(LogLevel::Debug, message);
        tracing::debug!("{}", entry.message);
        self.emit(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        let entry = LogEntry::new(LogLevel::Info, message);
        tracing::info!("{}", entry.message);
        self.emit(entry);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let entry = LogEntry::new(LogLevel::Warn, message);
        tracing::warn!("{}", entry.message);
        self.emit(entry);
    }

    pub fn error(&self, message: impl Into<String>) {
        let entry = LogEntry::new(LogLevel::Error, message);
        tracing::error!("{}", entry.message);
        self.emit(entry);
    }
}
