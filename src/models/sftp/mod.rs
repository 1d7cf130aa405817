// SFTP 数据模型

pub mod types;

pub use types::{join_path, remote_base_name, sort_listing, EntryKind, RemoteEntry};
