// SFTP 基础数据类型

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// 远程条目类型
/// 排序顺序即展示顺序：目录 < 文件 < 其他
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// 目录
    Dir,
    /// 普通文件
    File,
    /// 其他类型（符号链接、设备等）
    Other,
}

/// 远程目录条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// 文件名
    pub name: String,
    /// 条目类型
    pub kind: EntryKind,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// 是否是 . 或 ..
    pub fn is_pseudo(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// 列表排序：先按类型，再按名称
    pub fn listing_order(a: &Self, b: &Self) -> Ordering {
        a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name))
    }
}

/// 过滤伪条目并排序
pub fn sort_listing(entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    let mut entries: Vec<RemoteEntry> = entries.into_iter().filter(|e| !e.is_pseudo()).collect();
    entries.sort_by(RemoteEntry::listing_order);
    entries
}

/// 连接远程路径
/// base 为 "." 或空时只使用文件名（相对 SFTP 根目录）
pub fn join_path(base: &str, name: &str) -> String {
    match base {
        "" | "." => name.to_string(),
        "/" => format!("/{}", name),
        _ => format!("{}/{}", base.trim_end_matches('/'), name),
    }
}

/// 取远程路径的文件名部分
pub fn remote_base_name(path: &str) -> Option<&str> {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}
