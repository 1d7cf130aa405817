// 服务层

pub mod dispatcher;
pub mod sftp;
pub mod storage;
pub mod tunnel;
