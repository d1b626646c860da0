//! Unix socket client connection

use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::unix::{OwnedReadHalf, OwnedWriteHalf},
    sync::Mutex,
};

use crate::{
    core::types::SessionId,
    protocol::{JsonRpcNotification, JsonRpcResponse},
};

/// Write half of one client connection
///
/// Each connection is its own transport session for the security layer.
#[derive(Debug)]
pub struct UnixSocketSession {
    id: SessionId,
    writer: Mutex<OwnedWriteHalf>,
}

impl UnixSocketSession {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            id: SessionId::new(),
            writer: Mutex::new(writer),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn send_response(&self, response: &JsonRpcResponse) -> std::io::Result<()> {
        self.send_line(response).await
    }

    pub async fn send_notification(
        &self,
        notification: &JsonRpcNotification,
    ) -> std::io::Result<()> {
        self.send_line(notification).await
    }

    async fn send_line(&self, message: &impl Serialize) -> std::io::Result<()> {
        let mut json = serde_json::to_vec(message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        json.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&json).await?;
        writer.flush().await
    }
}

/// Line reader for incoming requests
pub struct SessionReader {
    lines: Lines<BufReader<OwnedReadHalf>>,
}

impl SessionReader {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Read the next line, `None` once the client closed the connection
    ///
    /// Cancel safe, so it can race notifications in a `select!`.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let line = self.lines.next_line().await?;
        Ok(line.map(|mut line| {
            if line.ends_with('\r') {
                line.pop();
            }
            line
        }))
    }
}
