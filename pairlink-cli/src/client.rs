/*!
 * pairlink Daemon Client
 * JSON IPC communication with pairlinkd
 */

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use pairlink_daemon::{MethodCall, Response};

pub struct PairlinkClient {
    socket_path: String,
}

impl PairlinkClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    pub async fn send_request(&self, call: &MethodCall) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("cannot reach pairlinkd on {}", self.socket_path))?;
        let (reader, mut writer) = stream.into_split();

        let mut request_json = serde_json::to_vec(call)?;
        request_json.push(b'\n');
        writer.write_all(&request_json).await?;

        // One line back per request; the daemon keeps the connection open.
        let mut line = String::new();
        if BufReader::new(reader).read_line(&mut line).await? == 0 {
            bail!("pairlinkd closed the connection without answering");
        }

        let response: Response = serde_json::from_str(line.trim())?;
        Ok(response)
    }
}
