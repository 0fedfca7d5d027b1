use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::TunnelError;

/// Size of the transfer buffer each direction copies through.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// Which half of the tunnel a relay direction serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToDestination,
    DestinationToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToDestination => write!(f, "client -> destination"),
            Direction::DestinationToClient => write!(f, "destination -> client"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    Running,
    ClosedNormally,
    ClosedOnError,
}

impl DirectionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DirectionState::Running)
    }
}

/// Final state of one direction and how many bytes it moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub direction: Direction,
    pub state: DirectionState,
    pub bytes: u64,
}

/// One half of a tunnel: copies everything read from `source` into `sink`.
///
/// The source is only ever read and the sink only ever written. A direction
/// runs once; after [`RelayDirection::run`] returns it is gone.
pub struct RelayDirection<R, W> {
    direction: Direction,
    source: R,
    sink: W,
    buffer: Vec<u8>,
    state: DirectionState,
    bytes: u64,
}

impl<R, W> RelayDirection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(direction: Direction, source: R, sink: W) -> Self {
        Self {
            direction,
            source,
            sink,
            buffer: vec![0u8; RELAY_BUFFER_SIZE],
            state: DirectionState::Running,
            bytes: 0,
        }
    }

    /// Copy until the source ends or an I/O error occurs.
    ///
    /// On end of stream the sink is flushed and half-closed so the peer sees
    /// the end of stream too. Errors are logged and end this direction only;
    /// they never reach the caller.
    pub async fn run(mut self) -> RelayOutcome {
        loop {
            let n = match self.source.read(&mut self.buffer).await {
                Ok(0) => return self.close_normally().await,
                Ok(n) => n,
                Err(e) => return self.close_on_error(e).await,
            };

            if let Err(e) = self.sink.write_all(&self.buffer[..n]).await {
                return self.close_on_error(e).await;
            }
            self.bytes += n as u64;
        }
    }

    async fn close_normally(mut self) -> RelayOutcome {
        if let Err(e) = self.sink.flush().await {
            return self.close_on_error(e).await;
        }
        if let Err(e) = self.sink.shutdown().await {
            debug!("{}: half-close failed: {}", self.direction, e);
        }

        self.state = DirectionState::ClosedNormally;
        debug!("{}: closed after {} bytes", self.direction, self.bytes);
        self.outcome()
    }

    async fn close_on_error(mut self, source: std::io::Error) -> RelayOutcome {
        let err = TunnelError::RelayIo {
            direction: self.direction,
            source,
        };
        warn!(bytes = self.bytes, "{}", err);

        // Best-effort; the sink may already be gone.
        let _ = self.sink.shutdown().await;

        self.state = DirectionState::ClosedOnError;
        self.outcome()
    }

    fn outcome(&self) -> RelayOutcome {
        RelayOutcome {
            direction: self.direction,
            state: self.state,
            bytes: self.bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[tokio::test]
    async fn test_copies_chunks_in_order_then_closes() {
        let source = Builder::new().read(b"hello").read(b" world").build();
        let sink = Builder::new().write(b"hello").write(b" world").build();

        let outcome = RelayDirection::new(Direction::ClientToDestination, source, sink)
            .run()
            .await;

        assert_eq!(outcome.state, DirectionState::ClosedNormally);
        assert_eq!(outcome.bytes, 11);
        assert_eq!(outcome.direction, Direction::ClientToDestination);
    }

    #[tokio::test]
    async fn test_empty_source_closes_normally() {
        let source = Builder::new().build();
        let sink = Builder::new().build();

        let outcome = RelayDirection::new(Direction::DestinationToClient, source, sink)
            .run()
            .await;

        assert_eq!(outcome.state, DirectionState::ClosedNormally);
        assert_eq!(outcome.bytes, 0);
    }

    #[tokio::test]
    async fn test_read_error_closes_on_error() {
        let source = Builder::new()
            .read(b"abc")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))
            .build();
        let sink = Builder::new().write(b"abc").build();

        let outcome = RelayDirection::new(Direction::ClientToDestination, source, sink)
            .run()
            .await;

        assert_eq!(outcome.state, DirectionState::ClosedOnError);
        assert_eq!(outcome.bytes, 3);
    }

    #[tokio::test]
    async fn test_write_error_closes_on_error() {
        let source = Builder::new().read(b"abc").build();
        let sink = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))
            .build();

        let outcome = RelayDirection::new(Direction::DestinationToClient, source, sink)
            .run()
            .await;

        assert_eq!(outcome.state, DirectionState::ClosedOnError);
        assert_eq!(outcome.bytes, 0);
    }

    #[tokio::test]
    async fn test_large_payload_relayed_across_many_chunks() {
        let data = payload(3 * 1024 * 1024 / 2);
        let expected = data.clone();

        let (mut src_writer, src_reader) = tokio::io::duplex(8192);
        let (sink_writer, mut sink_reader) = tokio::io::duplex(8192);

        let write = async move {
            src_writer.write_all(&data).await.unwrap();
            src_writer.shutdown().await.unwrap();
        };
        let read = async move {
            let mut received = Vec::new();
            sink_reader.read_to_end(&mut received).await.unwrap();
            received
        };
        let relay =
            RelayDirection::new(Direction::ClientToDestination, src_reader, sink_writer).run();

        let ((), outcome, received) = tokio::join!(write, relay, read);

        assert_eq!(outcome.state, DirectionState::ClosedNormally);
        assert_eq!(outcome.bytes, expected.len() as u64);
        assert_eq!(received.len(), expected.len());
        assert!(received == expected, "relayed bytes differ from input");
    }

    #[test]
    fn test_direction_states() {
        assert!(!DirectionState::Running.is_terminal());
        assert!(DirectionState::ClosedNormally.is_terminal());
        assert!(DirectionState::ClosedOnError.is_terminal());
    }
}
