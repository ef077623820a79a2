//! Per-PID handles returned by [`TSDemuxer::register`] and
//! [`TSMuxer::register`].
//!
//! [`TSDemuxer::register`]: super::TSDemuxer::register
//! [`TSMuxer::register`]: super::TSMuxer::register

use super::demuxer::DemuxState;
use super::pipe::{PipeReader, PipeWriter};
use crate::error::{Result, TsError};
use log::debug;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;

/// Payload bytes of every packet the demuxer sees on one PID, in order.
///
/// Reads end when the demuxer stops or drops this PID. Closing or dropping
/// the reader frees the PID for a new registration.
pub struct ProgramReader {
    pid: u16,
    reader: PipeReader,
    demux: Weak<Mutex<DemuxState>>,
}

impl ProgramReader {
    pub(crate) fn new(pid: u16, reader: PipeReader, demux: Weak<Mutex<DemuxState>>) -> Self {
        Self { pid, reader, demux }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn close(self) {}

    fn release(&mut self) {
        self.reader.close();
        let Some(demux) = self.demux.upgrade() else {
            return;
        };
        let mut state = demux.lock();
        let owned = state
            .pipes
            .get(&self.pid)
            .is_some_and(|writer| writer.is_connected_to(&self.reader));
        if owned {
            state.pipes.remove(&self.pid);
            debug!("released demux PID {:#06x}", self.pid);
        }
    }
}

impl Drop for ProgramReader {
    fn drop(&mut self) {
        self.release();
    }
}

impl AsyncRead for ProgramReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Elementary stream bytes for one PID of a [`TSMuxer`](super::TSMuxer).
///
/// Bytes are packetized by a background task. [`close`](Self::close) flushes
/// what was written and waits for that task; dropping the writer ends the
/// stream without waiting.
pub struct ProgramWriter {
    pid: u16,
    writer: PipeWriter,
    task: Option<JoinHandle<()>>,
}

impl ProgramWriter {
    pub(crate) fn new(pid: u16, writer: PipeWriter, task: JoinHandle<()>) -> Self {
        Self {
            pid,
            writer,
            task: Some(task),
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Ends the stream and waits until every written byte is packetized.
    /// The PID can be registered again afterwards.
    pub async fn close(mut self) -> Result<()> {
        let closed = match self.writer.close() {
            Err(TsError::Closed) => Ok(()),
            other => other,
        };
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| TsError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        }
        closed
    }
}

impl Drop for ProgramWriter {
    fn drop(&mut self) {
        if !self.writer.is_closed() {
            let _ = self.writer.close();
        }
    }
}

impl AsyncWrite for ProgramWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
