//! Bounded in-memory pipe between a blocking producer and an async consumer.
//!
//! The writer half implements [`std::io::Write`] so a synchronous encoder
//! (the tar builder) can write into it from a blocking thread. The reader
//! half implements [`tokio::io::AsyncRead`] and can be handed straight to an
//! exec channel as stdin. At most `capacity` chunks of at most `chunk_size`
//! bytes are in flight, so memory use does not grow with the archive.
//!
//! Termination is always observable on the other side:
//! - [`BridgeWriter::close`] gives the reader a clean EOF after the buffered
//!   chunks are drained.
//! - [`BridgeWriter::fail`] or dropping the writer without closing gives the
//!   reader a terminal error instead of a short read.
//! - Dropping the reader makes every further write fail with
//!   [`io::ErrorKind::BrokenPipe`], including a write that is blocked waiting
//!   for space.

use std::io::{self, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

enum Frame {
    Data(Bytes),
    Failed(io::Error),
}

#[derive(Debug, Default)]
struct Shared {
    /// Set by the writer right before a clean close.
    finished: AtomicBool,
}

/// Open a bridge holding at most `capacity` chunks of `chunk_size` bytes.
pub fn open(capacity: usize, chunk_size: usize) -> (BridgeWriter, BridgeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());

    let writer = BridgeWriter {
        tx: Some(tx),
        shared: shared.clone(),
        chunk_size: chunk_size.max(1),
    };
    let reader = BridgeReader {
        rx,
        current: Bytes::new(),
        state: ReadState::Open,
        shared,
    };
    (writer, reader)
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "bridge reader is gone")
}

/// Producer half. Must be driven from a blocking context
/// (`spawn_blocking` or a plain thread), never from inside an async task.
pub struct BridgeWriter {
    tx: Option<mpsc::Sender<Frame>>,
    shared: Arc<Shared>,
    chunk_size: usize,
}

impl BridgeWriter {
    /// Signal end of data. The reader sees EOF once buffered chunks drain.
    pub fn close(mut self) {
        self.shared.finished.store(true, Ordering::Release);
        self.tx.take();
    }

    /// Terminate the stream with `err`; the reader gets it as a read error.
    ///
    /// Blocks until there is room for the error frame or the reader is gone.
    pub fn fail(mut self, err: io::Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.blocking_send(Frame::Failed(err));
        }
    }

    /// `true` once the reader has been dropped or closed.
    pub fn is_reader_gone(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Write for BridgeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self.tx.as_ref().ok_or_else(broken_pipe)?;
        let n = buf.len().min(self.chunk_size);
        tx.blocking_send(Frame::Data(Bytes::copy_from_slice(&buf[..n])))
            .map_err(|_| broken_pipe())?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.is_reader_gone() {
            return Err(broken_pipe());
        }
        Ok(())
    }
}

#[derive(Debug)]
enum ReadState {
    Open,
    Finished,
    Failed(io::ErrorKind, String),
}

/// Consumer half.
pub struct BridgeReader {
    rx: mpsc::Receiver<Frame>,
    current: Bytes,
    state: ReadState,
    shared: Arc<Shared>,
}

impl BridgeReader {
    /// Abandon the stream. Pending and future writes fail with a broken pipe.
    pub fn close(&mut self) {
        self.rx.close();
        self.current = Bytes::new();
        if matches!(self.state, ReadState::Open) {
            self.state = ReadState::Failed(io::ErrorKind::BrokenPipe, "bridge reader closed".into());
        }
    }

    fn terminal(&mut self, err: io::Error) -> io::Error {
        self.state = ReadState::Failed(err.kind(), err.to_string());
        self.rx.close();
        err
    }
}

impl AsyncRead for BridgeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match &this.state {
                ReadState::Open => {}
                ReadState::Finished => return Poll::Ready(Ok(())),
                ReadState::Failed(kind, message) => {
                    return Poll::Ready(Err(io::Error::new(*kind, message.clone())));
                }
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(Frame::Data(chunk)) => this.current = chunk,
                Some(Frame::Failed(err)) => return Poll::Ready(Err(this.terminal(err))),
                None if this.shared.finished.load(Ordering::Acquire) => {
                    this.state = ReadState::Finished;
                }
                None => {
                    let err = io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "bridge writer dropped before closing the stream",
                    );
                    return Poll::Ready(Err(this.terminal(err)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_data_then_clean_eof() {
        let (mut writer, mut reader) = open(4, 1024);
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let producer = thread::spawn(move || {
            writer.write_all(&payload).unwrap();
            writer.close();
        });

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        producer.join().unwrap();

        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_writer_blocks_when_buffer_full() {
        let (mut writer, mut reader) = open(2, 4);
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();

        let producer = thread::spawn(move || {
            for _ in 0..16 {
                writer.write_all(&[7u8; 4]).unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
            }
            writer.close();
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 2);

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        producer.join().unwrap();

        assert_eq!(received.len(), 64);
        assert_eq!(completed.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_abandoned_reader_unblocks_writer() {
        let (mut writer, reader) = open(1, 8);

        let producer = thread::spawn(move || loop {
            if let Err(e) = writer.write_all(&[1u8; 8]) {
                return e;
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(reader);

        let err = producer.join().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_write_after_reader_closed_fails() {
        let (mut writer, mut reader) = open(4, 8);
        reader.close();

        assert!(writer.is_reader_gone());
        let err = writer.write(b"late").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_fail_is_terminal_for_reader() {
        let (mut writer, mut reader) = open(4, 16);

        thread::spawn(move || {
            writer.write_all(b"partial").unwrap();
            writer.fail(io::Error::other("disk vanished"));
        })
        .join()
        .unwrap();

        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"partial");

        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("disk vanished"));

        // Still an error on the next read, never a quiet EOF.
        assert!(reader.read(&mut buf).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_writer_is_not_eof() {
        let (mut writer, mut reader) = open(4, 16);

        thread::spawn(move || {
            writer.write_all(b"abc").unwrap();
            drop(writer);
        })
        .join()
        .unwrap();

        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");

        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
