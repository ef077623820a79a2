use super::adaptation::AdaptationField;
use super::packet::Packet;
use super::pcr::PcrSource;
use super::pes::PESPacket;
use super::pipe::{pipe, PipeReader};
use super::program::ProgramWriter;
use super::section::Table;
use super::types::*;
use crate::config::{self, Config};
use crate::error::{ErrorChannel, Result, TsError};
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Default)]
struct MuxState {
    counters: HashMap<u16, u8>,
    open: HashSet<u16>,
    pending_discontinuity: HashSet<u16>,
}

impl MuxState {
    fn next_counter(&mut self, pid: u16) -> u8 {
        let counter = self.counters.entry(pid).or_insert(0);
        let current = *counter;
        *counter = (current + 1) & 0x0F;
        current
    }
}

struct MuxShared<W> {
    sink: tokio::sync::Mutex<W>,
    pcr: PcrSource,
    state: Mutex<MuxState>,
    config: Config,
    errors: ErrorChannel,
    cancel: CancellationToken,
}

/// MPEG Transport Stream muxer.
///
/// Each registered PID gets a [`ProgramWriter`] and a background task that
/// slices the written bytes into transport packets. All tasks share one
/// sink; continuity counters are assigned while it is held, so each PID's
/// packets reach the sink in counter order and never interleave mid-packet.
pub struct TSMuxer<W> {
    shared: Arc<MuxShared<W>>,
    tracker: TaskTracker,
}

impl<W: AsyncWrite + Unpin + Send + 'static> TSMuxer<W> {
    pub fn new(sink: W) -> Self {
        Self::with_config(sink, config::current())
    }

    pub fn with_config(sink: W, config: Config) -> Self {
        Self {
            shared: Arc::new(MuxShared {
                sink: tokio::sync::Mutex::new(sink),
                pcr: PcrSource::new(),
                state: Mutex::new(MuxState::default()),
                config,
                errors: ErrorChannel::new(),
                cancel: CancellationToken::new(),
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Opens a writer for `pid`. With `is_pes` set every drained chunk is
    /// wrapped in a PES unit before packetization.
    pub fn register(&self, pid: u16, is_pes: bool) -> Result<ProgramWriter> {
        check_pid(pid)?;
        if pid == PID_NULL {
            return Err(TsError::ReservedPid(pid));
        }
        if self.shared.cancel.is_cancelled() {
            return Err(TsError::Closed);
        }

        {
            let mut state = self.shared.state.lock();
            if !state.open.insert(pid) {
                return Err(TsError::AlreadyAssigned(pid));
            }
            state.pending_discontinuity.insert(pid);
        }

        let (writer, reader) = pipe(self.shared.config.pipe_capacity);
        let task = self
            .tracker
            .spawn(packetize(self.shared.clone(), pid, is_pes, reader));
        debug!("registered mux PID {:#06x} (pes: {})", pid, is_pes);
        Ok(ProgramWriter::new(pid, writer, task))
    }

    /// Writes `table` as a section on `pid`, starting a new packet. The
    /// section shares the PID's continuity counter with any program on it.
    pub async fn write_table(&self, pid: u16, table: &Table) -> Result<()> {
        check_pid(pid)?;
        let section = table.marshal(self.shared.config.crc_mode)?;
        let mut payload = BytesMut::with_capacity(1 + section.len());
        payload.put_u8(0);
        payload.put_slice(&section);
        let mut payload = payload.freeze();

        self.shared
            .emit(|| {
                let mut state = self.shared.state.lock();
                let mut packets = Vec::new();
                while !payload.is_empty() {
                    let chunk = payload.split_to(payload.len().min(TS_BODY_SIZE));
                    let mut packet = Packet::new(pid).with_payload(chunk);
                    packet.payload_unit_start = packets.is_empty();
                    packet.continuity_counter = state.next_counter(pid);
                    packets.push(packet.encode()?);
                }
                Ok(packets)
            })
            .await?;
        Ok(())
    }

    /// Flags the next packet of every open program as discontinuous.
    pub fn mark_discontinuity(&self) {
        let mut state = self.shared.state.lock();
        let open: Vec<u16> = state.open.iter().copied().collect();
        state.pending_discontinuity.extend(open);
    }

    /// Takes the receiver for errors hit by packetizer tasks. Returns `None`
    /// after the first call. Errors are only queued from this call on.
    pub fn errors(&self) -> Option<UnboundedReceiver<TsError>> {
        self.shared.errors.subscribe()
    }

    /// Stops every packetizer task and waits for them to finish. Bytes not
    /// yet packetized are dropped, and a write stuck on a stalled sink is
    /// abandoned, possibly mid-packet; close each [`ProgramWriter`] first to
    /// flush them. The final sink flush is bounded by the dispatch timeout.
    pub async fn close(&self) -> Result<()> {
        self.shared.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let flush = async { self.shared.sink.lock().await.flush().await };
        match tokio::time::timeout(self.shared.config.dispatch_timeout(), flush).await {
            Ok(flushed) => Ok(flushed?),
            Err(_) => Err(TsError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "sink flush timed out",
            ))),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> MuxShared<W> {
    fn report(&self, err: TsError) {
        warn!("mux: {}", err);
        self.errors.send(err);
    }

    /// Splits one chunk into packets. The first carries the random access
    /// flag and a fresh PCR.
    fn packetize_chunk(&self, pid: u16, mut data: Bytes) -> Result<Vec<Bytes>> {
        let mut state = self.state.lock();
        let discontinuity = state.pending_discontinuity.remove(&pid);

        let mut packets = Vec::with_capacity(data.len() / TS_BODY_SIZE + 1);
        while !data.is_empty() {
            let first = packets.is_empty();
            let field = first.then(|| AdaptationField {
                discontinuity,
                random_access: true,
                pcr: Some(self.pcr.now()),
                ..Default::default()
            });
            let room = TS_BODY_SIZE - field.as_ref().map_or(0, |f| f.encoded_len());
            let payload = data.split_to(data.len().min(room));

            let packet = Packet {
                payload_unit_start: first,
                pid,
                continuity_counter: state.next_counter(pid),
                adaptation_field: AdaptationField::fit(field, payload.len())?,
                payload: Some(payload),
                ..Default::default()
            };
            packets.push(packet.encode()?);
        }
        Ok(packets)
    }

    /// Takes the sink, builds packets with `build` and writes them before
    /// releasing it. Returns the number of packets written, or `Closed` if
    /// the muxer is cancelled first.
    async fn emit<F>(&self, build: F) -> Result<usize>
    where
        F: FnOnce() -> Result<Vec<Bytes>>,
    {
        let write = async {
            let mut sink = self.sink.lock().await;
            let packets = build()?;
            for packet in &packets {
                sink.write_all(packet).await?;
            }
            sink.flush().await?;
            Ok::<_, TsError>(packets.len())
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TsError::Closed),
            written = write => written,
        }
    }

    async fn write_chunk(&self, pid: u16, is_pes: bool, chunk: &[u8]) -> Result<()> {
        let data = if is_pes {
            PESPacket::new(self.config.pes_stream_id, Bytes::copy_from_slice(chunk)).encode()?
        } else {
            Bytes::copy_from_slice(chunk)
        };
        let written = self.emit(|| self.packetize_chunk(pid, data)).await?;
        trace!("PID {:#06x}: {} packets", pid, written);
        Ok(())
    }
}

/// Drains one program until its writer closes or the muxer is cancelled.
async fn packetize<W: AsyncWrite + Unpin + Send + 'static>(
    shared: Arc<MuxShared<W>>,
    pid: u16,
    is_pes: bool,
    mut reader: PipeReader,
) {
    let mut buf = vec![0u8; shared.config.effective_chunk_size(is_pes)];
    loop {
        let n = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    shared.report(e.into());
                    break;
                }
            },
        };

        if let Err(e) = shared.write_chunk(pid, is_pes, &buf[..n]).await {
            if shared.cancel.is_cancelled() {
                break;
            }
            let fatal = !e.is_recoverable();
            shared.report(e);
            if fatal {
                shared.cancel.cancel();
                break;
            }
        }
    }

    reader.close();
    let mut state = shared.state.lock();
    state.open.remove(&pid);
    state.pending_discontinuity.remove(&pid);
    debug!("released mux PID {:#06x}", pid);
}
