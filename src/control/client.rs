use std::{io, path::Path};

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixStream,
    },
};

use super::{
    protocol::{self, Request, Response},
    ControlError,
};

/// A connection to a running [`ControlChannel`](super::ControlChannel).
pub struct ControlClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl ControlClient {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let (reader, writer) = UnixStream::connect(path).await?.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            next_id: 0,
        })
    }

    /// Sends one command and waits for its reply.
    ///
    /// Returns the reply body, or [`ControlError::Remote`] if the command answered with an error.
    pub async fn call(
        &mut self,
        method: &str,
        params: &[&str],
    ) -> Result<Option<String>, ControlError> {
        self.next_id += 1;
        let request = Request {
            method: method.to_owned(),
            params: params.iter().map(|param| param.to_string()).collect(),
            id: Value::from(self.next_id),
        };

        let line = protocol::encode(&request)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(disconnected)?;
        let line = self
            .lines
            .next_line()
            .await
            .map_err(disconnected)?
            .ok_or(ControlError::Closed)?;

        let response: Response = serde_json::from_str(&line)?;
        response.into_result().map_err(ControlError::Remote)
    }
}

/// Sends a single command over a fresh connection.
pub async fn call(
    path: impl AsRef<Path>,
    method: &str,
    params: &[&str],
) -> Result<Option<String>, ControlError> {
    ControlClient::connect(path).await?.call(method, params).await
}

fn disconnected(err: io::Error) -> ControlError {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => ControlError::Closed,
        _ => ControlError::Io(err),
    }
}
