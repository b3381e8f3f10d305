//! Low-level executor client (spec.md §4.5). Grounded on
//! `original_source/fuzz/runner/runner.py`'s `Runner`: `__enter__`/
//! `__exit__` send `START`/`END`, `run()` drives one `SEND`, `_recv_exact`
//! enforces a read deadline. Generic over any `AsyncRead + AsyncWrite`
//! transport so tests can drive it over an in-memory duplex stream
//! instead of a real TCP socket.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::bytes_io::read_u32;
use crate::call::Call;
use crate::error::{Result, TeezzError};
use crate::runner::wire::{frame, RunnerStatus, SessionMetaData, CMD_END, CMD_SEND, CMD_START, CMD_TERMINATE};

pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(10);

pub struct Runner<S> {
    stream: S,
    read_deadline: Duration,
}

impl<S> Runner<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Runner {
            stream,
            read_deadline: DEFAULT_READ_DEADLINE,
        }
    }

    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub async fn start(&mut self, meta: &SessionMetaData) -> Result<()> {
        let frame = frame(CMD_START, &meta.serialize());
        self.send_raw(&frame).await
    }

    pub async fn end(&mut self) -> Result<()> {
        self.send_raw(&frame(CMD_END, &[])).await
    }

    pub async fn terminate(&mut self) -> Result<()> {
        self.send_raw(&frame(CMD_TERMINATE, &[])).await
    }

    /// Sends a `SEND` with the serialized call, returns the resulting
    /// status and, on `SUCCESS`, the raw response bytes.
    pub async fn run(&mut self, call: &dyn Call) -> Result<(RunnerStatus, Option<Vec<u8>>)> {
        let payload = call.serialize();
        self.send_raw(&frame(CMD_SEND, &payload)).await?;

        let mut status_bytes = [0u8; 4];
        if self.recv_exact(&mut status_bytes).await.is_err() {
            return Ok((RunnerStatus::Timeout, None));
        }
        let status_word = u32::from_le_bytes(status_bytes);
        let status = RunnerStatus::from_wire(status_word);
        if status != RunnerStatus::Success {
            return Ok((status, None));
        }

        let mut len_bytes = [0u8; 4];
        self.recv_exact(&mut len_bytes).await.map_err(|_| TeezzError::WireTimeout(self.read_deadline))?;
        let len = read_u32(&len_bytes, 0)? as usize;
        let mut response = vec![0u8; len];
        self.recv_exact(&mut response).await.map_err(|_| TeezzError::WireTimeout(self.read_deadline))?;
        Ok((RunnerStatus::Success, Some(response)))
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|_| TeezzError::PeerReset)
    }

    async fn recv_exact(&mut self, buf: &mut [u8]) -> std::result::Result<(), ()> {
        match tokio::time::timeout(self.read_deadline, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(()),
            Err(_elapsed) => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::triangle::TriangleCall;

    #[tokio::test]
    async fn success_status_reads_the_length_prefixed_response() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut runner = Runner::new(client);

        tokio::spawn(async move {
            // Drain the SEND frame.
            let mut cmd = [0u8; 1];
            server.read_exact(&mut cmd).await.unwrap();
            let mut len = [0u8; 4];
            server.read_exact(&mut len).await.unwrap();
            let n = u32::from_le_bytes(len) as usize;
            let mut payload = vec![0u8; n];
            server.read_exact(&mut payload).await.unwrap();

            server.write_all(&42u32.to_le_bytes()).await.unwrap();
            server.write_all(&4u32.to_le_bytes()).await.unwrap();
            server.write_all(b"resp").await.unwrap();
        });

        let call = TriangleCall::new(1);
        let (status, resp) = runner.run(&call).await.unwrap();
        assert_eq!(status, RunnerStatus::Success);
        assert_eq!(resp.unwrap(), b"resp");
    }

    #[tokio::test]
    async fn stalled_read_becomes_a_timeout() {
        let (client, _server) = tokio::io::duplex(4096);
        let mut runner = Runner::new(client).with_read_deadline(Duration::from_millis(20));
        let call = TriangleCall::new(1);
        let (status, resp) = runner.run(&call).await.unwrap();
        assert_eq!(status, RunnerStatus::Timeout);
        assert!(resp.is_none());
    }
}
