// ShellPort - 单会话 SSH/SFTP 与端口转发
// 应用入口：stdin 逐行读取 JSON 请求，stdout 输出响应与日志事件

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod models;
mod services;
mod ssh;

use models::AppSettings;
use services::dispatcher::Dispatcher;
use services::storage;
use ssh::{EventLog, RusshConnector, SshSession};

fn main() -> anyhow::Result<()> {
    // 初始化日志系统
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug shellport
    // stdout 只用于协议输出，日志写到 stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = match storage::load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            warn!("[Config] Failed to load settings, using defaults: {:#}", e);
            AppSettings::default()
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("ssh-worker")
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(run(settings))
}

async fn run(settings: AppSettings) -> anyhow::Result<()> {
    let (log, log_rx) = EventLog::channel();
    let connector = Arc::new(RusshConnector::new(&settings.connection));
    let session = Arc::new(SshSession::new(connector, log, settings));
    let dispatcher = Arc::new(Dispatcher::new(session));

    info!("[App] Ready, reading requests from stdin");
    dispatcher
        .serve(tokio::io::stdin(), tokio::io::stdout(), log_rx)
        .await?;
    info!("[App] Input closed, exiting");
    Ok(())
}
