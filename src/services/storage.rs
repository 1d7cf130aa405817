// 本地配置读取

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::AppSettings;

/// 覆盖设置文件路径的环境变量
pub const SETTINGS_ENV: &str = "SHELLPORT_SETTINGS";

/// 获取配置目录路径
/// macOS: ~/Library/Application Support/shellport
/// Linux: ~/.config/shellport
/// Windows: C:\Users\<用户名>\AppData\Roaming\shellport
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join("shellport"))
}

/// 获取设置配置文件路径（环境变量优先）
pub fn get_settings_file() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(get_config_dir()?.join("settings.json"))
}

/// 加载应用设置
pub fn load_settings() -> Result<AppSettings> {
    load_settings_from(&get_settings_file()?)
}

/// 从指定文件加载设置，文件不存在时使用默认值
pub fn load_settings_from(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("无法读取设置配置文件 {}", path.display()))?;
    let settings: AppSettings = serde_json::from_str(&content)
        .with_context(|| format!("无法解析设置配置文件 {}", path.display()))?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("shellport-settings-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = scratch_file("absent.json");
        assert_eq!(load_settings_from(&path).unwrap(), AppSettings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let path = scratch_file("settings.json");
        fs::write(
            &path,
            r#"{"connection":{"connect_timeout_secs":15},"tunnel":{"max_relays":8}}"#,
        )
        .unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.connection.connect_timeout_secs, Some(15));
        assert_eq!(settings.connection.keepalive_interval_secs, 60);
        assert_eq!(settings.tunnel.max_relays, Some(8));
        assert!(settings.transfer.temp_dir.is_none());
    }

    #[test]
    fn test_malformed_file_names_path() {
        let path = scratch_file("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = load_settings_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }
}
