//! Control channel client used by the CLI.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::control::protocol::{ControlRequest, ControlResponse, SET_MAINTENANCE};

/// Error type for control calls.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control connection failed")]
    Io(#[from] io::Error),
    #[error("control call timed out")]
    Timeout,
    #[error("invalid control response")]
    Decode(#[from] serde_json::Error),
    #[error("control connection closed")]
    Closed,
    #[error("control call failed: {0}")]
    Remote(String),
}

/// Connection to a control listener.
#[derive(Debug)]
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    token: Option<String>,
    next_id: u64,
}

impl ControlClient {
    /// Connect to the listener on loopback `port`.
    pub async fn connect(port: u16) -> Result<Self, ControlError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let stream = tokio::time::timeout(Duration::from_secs(5), TcpStream::connect(addr))
            .await
            .map_err(|_| ControlError::Timeout)??;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
            token: None,
            next_id: 1,
        })
    }

    /// Send `token` with every call.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    async fn call(&mut self, method: &str, params: Value) -> Result<String, ControlError> {
        let request = ControlRequest {
            id: self.next_id,
            method: method.to_string(),
            params,
            token: self.token.clone(),
        };
        self.next_id += 1;

        let mut encoded = serde_json::to_vec(&request)?;
        encoded.push(b'\n');
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(10), self.reader.read_line(&mut line))
            .await
            .map_err(|_| ControlError::Timeout)??;
        if n == 0 {
            return Err(ControlError::Closed);
        }
        let response: ControlResponse = serde_json::from_str(&line)?;
        match (response.result, response.error) {
            (_, Some(error)) => Err(ControlError::Remote(error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(ControlError::Remote("empty response".into())),
        }
    }

    /// Switch maintenance mode, returning the server's message.
    pub async fn set_maintenance(&mut self, enabled: bool) -> Result<String, ControlError> {
        self.call(SET_MAINTENANCE, Value::Bool(enabled)).await
    }
}
