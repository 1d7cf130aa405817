// 请求/响应协议
// 每行一个 JSON 对象：stdin 读取请求，stdout 输出响应与日志事件

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::sftp::RemoteEntry;
use crate::services::tunnel::TunnelSpec;
use crate::ssh::config::ConnectionParams;
use crate::ssh::event::LogEntry;
use crate::ssh::session::SessionStatus;

/// 请求外层：调用方提供的 id 原样回传
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub request: Request,
}

/// 请求命令
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Connect(ConnectionParams),
    Disconnect,
    ListRemote {
        dir: String,
    },
    UploadFiles {
        local_paths: Vec<PathBuf>,
        remote_dir: String,
    },
    DownloadToTemp {
        remote_path: String,
    },
    StartTunnel(TunnelSpec),
    StopTunnel,
    Status,
}

impl Request {
    /// 日志用命令名
    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect(_) => "connect",
            Request::Disconnect => "disconnect",
            Request::ListRemote { .. } => "list_remote",
            Request::UploadFiles { .. } => "upload_files",
            Request::DownloadToTemp { .. } => "download_to_temp",
            Request::StartTunnel(_) => "start_tunnel",
            Request::StopTunnel => "stop_tunnel",
            Request::Status => "status",
        }
    }
}

/// 统一响应结构
#[derive(Debug, Default, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<RemoteEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for Response {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Response::ok(),
            Err(e) => Response::error(e.to_string()),
        }
    }
}

/// stdout 输出的一行
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing {
    Response {
        id: Value,
        #[serde(flatten)]
        response: Response,
    },
    Log(LogEntry),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::config::AuthKind;
    use serde_json::json;

    #[test]
    fn test_parse_connect_request() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"id":7,"cmd":"connect","host":"10.0.0.5","port":2222,"username":"ops","auth":"key","private_key_path":"/home/ops/.ssh/id_ed25519"}"#,
        )
        .unwrap();

        assert_eq!(envelope.id, json!(7));
        match envelope.request {
            Request::Connect(params) => {
                assert_eq!(params.host, "10.0.0.5");
                assert_eq!(params.port, Some(2222));
                assert_eq!(params.auth, Some(AuthKind::Key));
                assert_eq!(
                    params.private_key_path,
                    Some(PathBuf::from("/home/ops/.ssh/id_ed25519"))
                );
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unit_and_struct_requests() {
        let envelope: Envelope = serde_json::from_str(r#"{"id":"a","cmd":"stop_tunnel"}"#).unwrap();
        assert!(matches!(envelope.request, Request::StopTunnel));

        let envelope: Envelope = serde_json::from_str(
            r#"{"cmd":"upload_files","local_paths":["/tmp/a","/tmp/b"],"remote_dir":"."}"#,
        )
        .unwrap();
        assert_eq!(envelope.id, Value::Null);
        match envelope.request {
            Request::UploadFiles {
                local_paths,
                remote_dir,
            } => {
                assert_eq!(local_paths.len(), 2);
                assert_eq!(remote_dir, ".");
            }
            other => panic!("unexpected request: {:?}", other),
        }

        let envelope: Envelope = serde_json::from_str(
            r#"{"id":1,"cmd":"start_tunnel","local_port":15432,"remote_host":"db","remote_port":5432}"#,
        )
        .unwrap();
        assert_eq!(envelope.request.name(), "start_tunnel");
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"id":1,"cmd":"shell"}"#).is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"id":1}"#).is_err());
    }

    #[test]
    fn test_response_line_shape() {
        let line = serde_json::to_value(Outgoing::Response {
            id: json!(3),
            response: Response::error("Not connected"),
        })
        .unwrap();
        assert_eq!(
            line,
            json!({"type": "response", "id": 3, "ok": false, "error": "Not connected"})
        );

        let line = serde_json::to_value(Outgoing::Response {
            id: json!("x"),
            response: Response::ok(),
        })
        .unwrap();
        assert_eq!(line, json!({"type": "response", "id": "x", "ok": true}));
    }
}
