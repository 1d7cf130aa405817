// 请求分发
// 把协议请求翻译为会话操作，并负责 stdin/stdout 的逐行读写

use std::sync::Arc;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::models::command::{Envelope, Outgoing, Request, Response};
use crate::ssh::event::LogEntry;
use crate::ssh::session::SshSession;

/// 请求分发器
pub struct Dispatcher {
    session: Arc<SshSession>,
}

impl Dispatcher {
    pub fn new(session: Arc<SshSession>) -> Self {
        Self { session }
    }

    /// 执行单个请求；错误已由会话记录，这里只转换为响应
    pub async fn dispatch(&self, request: Request) -> Response {
        debug!("[Dispatch] Handling {}", request.name());

        match request {
            Request::Connect(params) => self.session.connect(params).await.into(),
            Request::Disconnect => {
                self.session.disconnect().await;
                Response::ok()
            }
            Request::ListRemote { dir } => match self.session.list_remote(&dir).await {
                Ok(entries) => Response {
                    entries: Some(entries),
                    ..Response::ok()
                },
                Err(e) => Response::error(e.to_string()),
            },
            Request::UploadFiles {
                local_paths,
                remote_dir,
            } => self
                .session
                .upload_files(&local_paths, &remote_dir)
                .await
                .into(),
            Request::DownloadToTemp { remote_path } => {
                match self.session.download_to_temp(&remote_path).await {
                    Ok(path) => Response {
                        local_path: Some(path),
                        ..Response::ok()
                    },
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::StartTunnel(spec) => match self.session.start_tunnel(spec).await {
                Ok(addr) => Response {
                    local_addr: Some(addr.to_string()),
                    ..Response::ok()
                },
                Err(e) => Response::error(e.to_string()),
            },
            Request::StopTunnel => {
                self.session.stop_tunnel().await;
                Response::ok()
            }
            Request::Status => Response {
                status: Some(self.session.status().await),
                ..Response::ok()
            },
        }
    }

    /// 解析并执行一行请求
    pub async fn handle_line(&self, line: &str) -> Outgoing {
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => Outgoing::Response {
                id: envelope.id,
                response: self.dispatch(envelope.request).await,
            },
            Err(e) => {
                self.session
                    .log()
                    .warn(format!("[Dispatch] Invalid request: {}", e));
                // 尽量取回 id，便于调用方对应
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(Value::Null);
                Outgoing::Response {
                    id,
                    response: Response::error(format!("Invalid request: {}", e)),
                }
            }
        }
    }

    /// 逐行读取请求直到 EOF；请求并发执行，响应与日志由单个写任务输出
    /// 输入结束后等待进行中的请求完成，然后断开会话
    pub async fn serve<R, W>(
        self: Arc<Self>,
        input: R,
        output: W,
        logs: mpsc::UnboundedReceiver<LogEntry>,
    ) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let writer = tokio::spawn(write_loop(output, out_rx, logs));

        let mut lines = FramedRead::new(input, LinesCodec::new());
        let inflight = TaskTracker::new();
        while let Some(line) = lines.next().await {
            let line = line.context("Failed to read request")?;
            if line.trim().is_empty() {
                continue;
            }

            let dispatcher = self.clone();
            let out_tx = out_tx.clone();
            inflight.spawn(async move {
                let message = dispatcher.handle_line(&line).await;
                let _ = out_tx.send(message);
            });
        }

        debug!("[Dispatch] Input closed, waiting for pending requests");
        inflight.close();
        inflight.wait().await;
        self.session.disconnect().await;

        drop(out_tx);
        writer.await.context("Output task panicked")?
    }
}

/// 写出响应与日志；响应通道关闭后写完剩余日志再退出
async fn write_loop<W>(
    output: W,
    mut responses: mpsc::UnboundedReceiver<Outgoing>,
    mut logs: mpsc::UnboundedReceiver<LogEntry>,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(output, LinesCodec::new());

    loop {
        // 日志优先，保证操作日志先于其响应输出
        let message = tokio::select! {
            biased;
            Some(entry) = logs.recv() => Outgoing::Log(entry),
            response = responses.recv() => match response {
                Some(response) => response,
                None => break,
            },
        };
        let line = serde_json::to_string(&message).context("Failed to encode output")?;
        sink.send(line).await.context("Failed to write output")?;
    }

    while let Ok(entry) = logs.try_recv() {
        let line = serde_json::to_string(&Outgoing::Log(entry)).context("Failed to encode output")?;
        sink.send(line).await.context("Failed to write output")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::AppSettings;
    use crate::ssh::event::{EventLog, LogLevel};
    use crate::ssh::mock::MockConnector;
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn dispatcher_with(connector: Arc<MockConnector>, log: EventLog) -> Arc<Dispatcher> {
        let session = SshSession::new(connector, log, AppSettings::default());
        Arc::new(Dispatcher::new(Arc::new(session)))
    }

    async fn next_response(
        lines: &mut FramedRead<DuplexStream, LinesCodec>,
    ) -> Value {
        while let Some(line) = lines.next().await {
            let value: Value = serde_json::from_str(&line.unwrap()).unwrap();
            if value["type"] == "response" {
                return value;
            }
        }
        panic!("output closed before a response arrived");
    }

    #[tokio::test]
    async fn test_dispatch_not_connected_errors() {
        let dispatcher = dispatcher_with(MockConnector::new(), EventLog::disabled());

        let response = dispatcher
            .dispatch(Request::ListRemote {
                dir: ".".to_string(),
            })
            .await;
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("Not connected"));

        let response = dispatcher.dispatch(Request::StopTunnel).await;
        assert!(response.ok);
        let response = dispatcher.dispatch(Request::Disconnect).await;
        assert!(response.ok);
    }

    #[tokio::test]
    async fn test_invalid_line_keeps_id() {
        let dispatcher = dispatcher_with(MockConnector::new(), EventLog::disabled());

        let message = dispatcher.handle_line(r#"{"id":42,"cmd":"reboot"}"#).await;
        let value = serde_json::to_value(message).unwrap();
        assert_eq!(value["id"], json!(42));
        assert_eq!(value["ok"], json!(false));

        let message = dispatcher.handle_line("not json").await;
        let value = serde_json::to_value(message).unwrap();
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_line_is_reported_as_log_event() {
        let (log, mut log_rx) = EventLog::channel();
        let dispatcher = dispatcher_with(MockConnector::new(), log);

        dispatcher.handle_line(r#"{"id":7,"cmd":"reboot"}"#).await;

        let entry = log_rx.try_recv().unwrap();
        assert_eq!(entry.level, LogLevel::Warn);
        assert!(entry.message.starts_with("[Dispatch] Invalid request"));
    }

    #[tokio::test]
    async fn test_serve_round_trip_over_lines() {
        let connector = MockConnector::new();
        connector.fs.add_dir(
            "/home/deploy",
            vec![crate::models::sftp::RemoteEntry::new(
                "app",
                crate::models::sftp::EntryKind::Dir,
            )],
        );
        let (log, log_rx) = EventLog::channel();
        let dispatcher = dispatcher_with(connector.clone(), log);

        let (mut client_in, server_in) = duplex(64 * 1024);
        let (server_out, client_out) = duplex(64 * 1024);
        let server = tokio::spawn(dispatcher.serve(server_in, server_out, log_rx));
        let mut lines = FramedRead::new(client_out, LinesCodec::new());

        client_in
            .write_all(b"{\"id\":1,\"cmd\":\"connect\",\"host\":\"h\",\"username\":\"deploy\",\"password\":\"pw\"}\n")
            .await
            .unwrap();
        let response = next_response(&mut lines).await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["ok"], json!(true));

        client_in
            .write_all(b"{\"id\":2,\"cmd\":\"list_remote\",\"dir\":\"/home/deploy\"}\n")
            .await
            .unwrap();
        let response = next_response(&mut lines).await;
        assert_eq!(response["id"], json!(2));
        assert_eq!(response["entries"], json!([{"name": "app", "kind": "dir"}]));

        client_in
            .write_all(b"{\"id\":3,\"cmd\":\"status\"}\n")
            .await
            .unwrap();
        let response = next_response(&mut lines).await;
        assert_eq!(response["status"]["state"], json!("connected"));
        assert_eq!(response["status"]["host"], json!("h"));

        // 输入结束后会话被断开，server 正常退出
        drop(client_in);
        server.await.unwrap().unwrap();
        assert_eq!(connector.live(), 0);

        // 剩余输出里包含断开日志
        let mut saw_disconnect_log = false;
        while let Some(line) = lines.next().await {
            let value: Value = serde_json::from_str(&line.unwrap()).unwrap();
            if value["type"] == "log" && value["message"] == "[SSH] Disconnected" {
                saw_disconnect_log = true;
            }
        }
        assert!(saw_disconnect_log);
    }
}
