//! Output pumping and byte-at-a-time consumption.
//!
//! A pump thread owns the blocking reader of the process output and forwards
//! chunks over an mpsc channel. The [`ByteStream`] on the other end is the
//! single consumer: it hands out one byte at a time so prompt detection can
//! run on partial lines.

use std::io::Read;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

const PUMP_CHUNK_SIZE: usize = 4096;

/// Result of a single-byte read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One byte of output
    Byte(u8),
    /// The output channel is closed and fully consumed
    EndOfStream,
    /// No byte arrived within the poll timeout
    Pending,
}

/// A readable, liveness-aware source of process output.
pub trait ByteSource {
    /// Read one byte.
    ///
    /// With `timeout == None` this blocks until a byte is available or the
    /// stream closes. With a timeout it may return [`ReadOutcome::Pending`].
    fn read_byte(&mut self, timeout: Option<Duration>) -> ReadOutcome;

    /// Latest known liveness of the producing process.
    fn is_alive(&self) -> bool;
}

/// Consumer side of the output channel.
#[derive(Debug)]
pub struct ByteStream {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl ByteStream {
    /// Wrap the receiving end of a pump channel.
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
            closed: false,
        }
    }

    /// Create a connected sender and stream.
    pub fn channel() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }

    /// Read one byte, see [`ByteSource::read_byte`].
    pub fn read_byte(&mut self, timeout: Option<Duration>) -> ReadOutcome {
        if let Some(byte) = self.next_buffered() {
            return ReadOutcome::Byte(byte);
        }

        if self.closed {
            return ReadOutcome::EndOfStream;
        }

        loop {
            let received = match timeout {
                Some(timeout) => match self.rx.recv_timeout(timeout) {
                    Ok(chunk) => Some(chunk),
                    Err(RecvTimeoutError::Timeout) => return ReadOutcome::Pending,
                    Err(RecvTimeoutError::Disconnected) => None,
                },
                None => self.rx.recv().ok(),
            };

            match received {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                    if let Some(byte) = self.next_buffered() {
                        return ReadOutcome::Byte(byte);
                    }
                }
                None => {
                    debug!("Output stream closed");
                    self.closed = true;
                    return ReadOutcome::EndOfStream;
                }
            }
        }
    }

    /// Number of bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.chunk.len() - self.pos
    }

    /// Whether the producer side has disconnected and been observed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_buffered(&mut self) -> Option<u8> {
        let byte = self.chunk.get(self.pos).copied()?;
        self.pos += 1;
        Some(byte)
    }
}

/// Spawn a thread that forwards everything read from `reader` into `tx`.
///
/// The thread exits on EOF, on a read error (a PTY reports `EIO` once the
/// child is gone), or when the receiving side is dropped.
pub fn spawn_pump<R>(name: &str, mut reader: R, tx: Sender<Vec<u8>>) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let label = name.to_string();
    thread::Builder::new()
        .name(format!("promptctl-pump-{name}"))
        .spawn(move || {
            let mut buffer = vec![0u8; PUMP_CHUNK_SIZE];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        debug!("Pump {} reached EOF", label);
                        break;
                    }
                    Ok(n) => {
                        trace!("Pump {} read {} bytes", label, n);
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            debug!("Pump {} receiver dropped", label);
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("Pump {} stopped: {}", label, e);
                        break;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(stream: &mut ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let ReadOutcome::Byte(b) = stream.read_byte(None) {
            out.push(b);
        }
        out
    }

    #[test]
    fn test_reads_bytes_in_order() {
        let (tx, mut stream) = ByteStream::channel();
        tx.send(b"ab".to_vec()).unwrap();
        tx.send(b"c".to_vec()).unwrap();
        drop(tx);

        assert_eq!(stream.read_byte(None), ReadOutcome::Byte(b'a'));
        assert_eq!(stream.buffered(), 1);
        assert_eq!(stream.read_byte(None), ReadOutcome::Byte(b'b'));
        assert_eq!(stream.read_byte(None), ReadOutcome::Byte(b'c'));
        assert_eq!(stream.read_byte(None), ReadOutcome::EndOfStream);
        assert!(stream.is_closed());
        assert_eq!(stream.read_byte(None), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_pending_on_timeout() {
        let (tx, mut stream) = ByteStream::channel();
        assert_eq!(
            stream.read_byte(Some(Duration::from_millis(10))),
            ReadOutcome::Pending
        );

        tx.send(b"x".to_vec()).unwrap();
        assert_eq!(
            stream.read_byte(Some(Duration::from_millis(10))),
            ReadOutcome::Byte(b'x')
        );
    }

    #[test]
    fn test_empty_chunks_skipped() {
        let (tx, mut stream) = ByteStream::channel();
        tx.send(Vec::new()).unwrap();
        tx.send(b"z".to_vec()).unwrap();
        drop(tx);

        assert_eq!(stream.read_byte(None), ReadOutcome::Byte(b'z'));
        assert_eq!(stream.read_byte(None), ReadOutcome::EndOfStream);
    }

    #[test]
    fn test_buffered_bytes_survive_disconnect() {
        let (tx, mut stream) = ByteStream::channel();
        tx.send(b"(shell) ".to_vec()).unwrap();
        drop(tx);

        assert_eq!(drain(&mut stream), b"(shell) ");
    }

    #[test]
    fn test_pump_forwards_reader() {
        let (tx, mut stream) = ByteStream::channel();
        let handle = spawn_pump("test", std::io::Cursor::new(b"Booting...\n".to_vec()), tx).unwrap();

        assert_eq!(drain(&mut stream), b"Booting...\n");
        handle.join().unwrap();
    }

    #[test]
    fn test_pump_large_input_spans_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let (tx, mut stream) = ByteStream::channel();
        let handle = spawn_pump("large", std::io::Cursor::new(data.clone()), tx).unwrap();

        assert_eq!(drain(&mut stream), data);
        handle.join().unwrap();
    }

    proptest! {
        /// However output is chunked, the consumer sees the same byte sequence.
        #[test]
        fn chunking_preserves_bytes(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..32), 0..16)
        ) {
            let (tx, mut stream) = ByteStream::channel();
            for chunk in &chunks {
                tx.send(chunk.clone()).unwrap();
            }
            drop(tx);

            let expected: Vec<u8> = chunks.concat();
            prop_assert_eq!(drain(&mut stream), expected);
        }
    }
}
