// Settings 配置数据结构

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ======================== 主配置结构 ========================

/// 应用设置（持久化用）
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub connection: ConnectionSettings,
    pub tunnel: TunnelSettings,
    pub transfer: TransferSettings,
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSettings {
    pub default_port: u16,
    pub keepalive_enabled: bool,
    pub keepalive_interval_secs: u64,
    pub keepalive_max: u32,
    /// 连接超时（TCP + 握手 + 认证），None 表示不限时
    pub connect_timeout_secs: Option<u64>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            default_port: 22,
            keepalive_enabled: true,
            keepalive_interval_secs: 60,
            keepalive_max: 3,
            connect_timeout_secs: None,
        }
    }
}

// ======================== 隧道设置 ========================

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunnelSettings {
    /// 单个隧道同时转发的最大连接数，None 表示不限
    pub max_relays: Option<usize>,
}

// ======================== 传输设置 ========================

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferSettings {
    /// 下载暂存的根目录，None 时使用系统临时目录
    pub temp_dir: Option<PathBuf>,
}

impl TransferSettings {
    /// 下载暂存根目录：{temp}/shellport/downloads
    pub fn download_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join("shellport")
            .join("downloads")
    }
}
