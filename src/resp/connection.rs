//! Frames a `TcpStream` into RESP [`Frame`]s, buffering reads and writes.

use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use super::frame::{Frame, Limits};
use crate::error::FrameError;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    limits: Limits,
}

impl Connection {
    pub fn new(stream: TcpStream, limits: Limits) -> Connection {
        Connection {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            limits,
        }
    }

    /// Reads a single top-level frame, buffering more data from the socket
    /// as needed. Returns `Ok(None)` on a clean EOF with no partial frame
    /// pending (normal client close).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| FrameError::Malformed(e.to_string()))?;

            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Malformed("connection reset mid-frame".into()));
            }
        }
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut cursor = Cursor::new(&self.buffer[..]);
        match Frame::check(&mut cursor, &self.limits) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor)?;
                self.buffer.advance(len);
                Ok(Some(frame))
            }
            Err(FrameError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serializes and writes a frame, without flushing. Call [`Self::flush`]
    /// once the reply for a command is complete.
    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let mut buf = Vec::new();
        frame.serialize(&mut buf);
        self.stream.write_all(&buf).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    /// Sets SO_LINGER to zero so the immediate close discards any pending
    /// data instead of lingering, per spec §4.1's "immediate reset" policy
    /// for malformed input.
    pub fn reset_linger(&self) {
        if let Err(e) = self.stream.get_ref().set_linger(Some(std::time::Duration::ZERO)) {
            tracing::warn!(error = %e, "failed to set SO_LINGER(0) on protocol-error close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn round_trip_over_real_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(socket, Limits::default());
            let frame = conn.read_frame().await.unwrap().unwrap();
            conn.write_frame(&frame).await.unwrap();
            conn.flush().await.unwrap();
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let mut conn = Connection::new(client, Limits::default());
        let mut array = Frame::array();
        array.push_bulk(Bytes::from_static(b"PING"));
        conn.write_frame(&array).await.unwrap();
        conn.flush().await.unwrap();

        let echoed = conn.read_frame().await.unwrap().unwrap();
        assert_eq!(format!("{echoed:?}"), format!("{array:?}"));
        server.await.unwrap();
    }
}
