//! Bounded in-memory byte pipe connecting the demux/mux core to the
//! per-program handles.
//!
//! Reads wait until bytes arrive or the write side closes (then end of
//! stream). Writes wait while the buffer is full and fail once either side
//! is closed.

use crate::error::{Result, TsError};
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

struct Shared {
    buf: BytesMut,
    capacity: usize,
    reader_closed: bool,
    writer_closed: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl Shared {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}

/// Creates a pipe holding at most `capacity` unread bytes.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Mutex::new(Shared {
        buf: BytesMut::with_capacity(capacity.min(64 * 1024)),
        capacity,
        reader_closed: false,
        writer_closed: false,
        read_waker: None,
        write_waker: None,
    }));
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// Write side. Clones share the same pipe; closing is explicit.
#[derive(Clone)]
pub struct PipeWriter {
    shared: Arc<Mutex<Shared>>,
}

/// Read side. Dropping it closes the pipe for writers.
pub struct PipeReader {
    shared: Arc<Mutex<Shared>>,
}

impl PipeWriter {
    /// Marks end of stream. Bytes already written stay readable.
    pub fn close(&self) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.writer_closed {
            return Err(TsError::Closed);
        }
        shared.writer_closed = true;
        shared.wake_reader();
        shared.wake_writer();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        let shared = self.shared.lock();
        shared.writer_closed || shared.reader_closed
    }

    pub fn is_connected_to(&self, reader: &PipeReader) -> bool {
        Arc::ptr_eq(&self.shared, &reader.shared)
    }
}

impl PipeReader {
    /// Discards unread bytes; pending and later writes fail.
    pub fn close(&self) {
        let mut shared = self.shared.lock();
        shared.reader_closed = true;
        shared.buf.clear();
        shared.wake_writer();
    }

    /// Unread bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buf.len()
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut shared = self.shared.lock();
        if !shared.buf.is_empty() {
            let n = buf.remaining().min(shared.buf.len());
            buf.put_slice(&shared.buf[..n]);
            shared.buf.advance(n);
            shared.wake_writer();
            return Poll::Ready(Ok(()));
        }
        if shared.writer_closed || shared.reader_closed {
            return Poll::Ready(Ok(()));
        }
        shared.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut shared = self.shared.lock();
        if shared.reader_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe reader closed",
            )));
        }
        if shared.writer_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed pipe",
            )));
        }
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let space = shared.capacity.saturating_sub(shared.buf.len());
        if space == 0 {
            shared.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = space.min(data.len());
        shared.buf.extend_from_slice(&data[..n]);
        shared.wake_reader();
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut shared = self.shared.lock();
        shared.writer_closed = true;
        shared.wake_reader();
        Poll::Ready(Ok(()))
    }
}
