// SSH 连接模块
//
// 模块结构:
// - config: 连接参数与认证方式解析 (ConnectionParams, SshConfig, AuthMethod)
// - error: 错误类型 (SshError)
// - event: 日志事件 (EventLog, LogEntry, LogLevel)
// - transport: 传输层能力接口 (Connector, Transport, RemoteFs)
// - handler: russh Handler 实现
// - client: 基于 russh 的连接器与传输
// - session: 单会话管理 (SshSession)

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod mock;

// 公开导出
pub use client::RusshConnector;
pub use event::EventLog;
pub use session::SshSession;
