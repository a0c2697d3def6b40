/*!
 * IPC Server for pairlink Daemon
 * JSON protocol over Unix socket
 */

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};

use crate::channel::{MethodChannel, Response};

/// Longest request line the daemon buffers, newline included.
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

pub struct IpcServer {
    listener: UnixListener,
    channel: Arc<MethodChannel>,
}

impl IpcServer {
    pub fn new(listener: UnixListener, channel: Arc<MethodChannel>) -> Self {
        Self { listener, channel }
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections on channel {}", self.channel.name());

        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    tracing::debug!("New client connected");
                    let channel = self.channel.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, &channel).await {
                            tracing::error!("Client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(stream: UnixStream, channel: &MethodChannel) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_LINE as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            break;
        }

        if line.last() != Some(&b'\n') && read == MAX_REQUEST_LINE {
            tracing::warn!("Discarding request longer than {} bytes", MAX_REQUEST_LINE);
            skip_line(&mut reader).await?;
            let response = Response::Malformed {
                message: format!("request exceeds {} bytes", MAX_REQUEST_LINE),
            };
            send(&mut writer, &response).await?;
            continue;
        }

        let response = match std::str::from_utf8(&line) {
            Ok(request) if request.trim().is_empty() => continue,
            Ok(request) => {
                let request = request.trim();
                tracing::debug!("Received request: {}", request);
                channel.handle_line(request).await
            }
            Err(e) => Response::Malformed {
                message: e.to_string(),
            },
        };
        send(&mut writer, &response).await?;
    }

    tracing::debug!("Client disconnected");
    Ok(())
}

async fn send(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    Ok(())
}

/// Drops input up to and including the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}
