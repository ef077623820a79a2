use super::packet::Packet;
use super::pat::Pat;
use super::pipe::{pipe, PipeWriter};
use super::program::ProgramReader;
use super::section::{skip_pointer_field, Table};
use super::types::*;
use crate::config::{self, Config};
use crate::error::{ErrorChannel, Result, TsError};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

pub(crate) struct DemuxState {
    pub(crate) pipes: HashMap<u16, PipeWriter>,
    pat: Option<Pat>,
}

/// MPEG Transport Stream demuxer.
///
/// Splits a packet stream into per-PID byte streams. Callers
/// [`register`](Self::register) the PIDs they want, then drive
/// [`run`](Self::run) with the source; packets on other PIDs are dropped.
/// The latest PAT seen on PID 0 is kept and available from
/// [`pat`](Self::pat).
///
/// Clones share state, so one clone can run while others register.
#[derive(Clone)]
pub struct TSDemuxer {
    state: Arc<Mutex<DemuxState>>,
    config: Config,
    errors: Arc<ErrorChannel>,
}

impl Default for TSDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl TSDemuxer {
    pub fn new() -> Self {
        Self::with_config(config::current())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            state: Arc::new(Mutex::new(DemuxState {
                pipes: HashMap::new(),
                pat: None,
            })),
            config,
            errors: Arc::new(ErrorChannel::new()),
        }
    }

    /// Opens a reader for `pid`. Fails while another reader holds the PID.
    pub fn register(&self, pid: u16) -> Result<ProgramReader> {
        check_pid(pid)?;
        if pid == PID_NULL {
            return Err(TsError::ReservedPid(pid));
        }

        let mut state = self.state.lock();
        if state.pipes.contains_key(&pid) {
            return Err(TsError::AlreadyAssigned(pid));
        }
        let (writer, reader) = pipe(self.config.pipe_capacity);
        state.pipes.insert(pid, writer);
        debug!("registered demux PID {:#06x}", pid);
        Ok(ProgramReader::new(pid, reader, Arc::downgrade(&self.state)))
    }

    /// Most recent PAT decoded from the stream.
    ///
    /// Updated as packets go by. A program may show up here before or after
    /// its PIDs are registered; nothing orders the two.
    pub fn pat(&self) -> Option<Pat> {
        self.state.lock().pat.clone()
    }

    /// Takes the receiver for errors hit while demuxing. Returns `None` after
    /// the first call.
    ///
    /// Errors are only queued from this call on; until then they are logged
    /// and dropped.
    pub fn errors(&self) -> Option<UnboundedReceiver<TsError>> {
        self.errors.subscribe()
    }

    fn report(&self, err: TsError) {
        warn!("demux: {}", err);
        self.errors.send(err);
    }

    /// Reads packets from `reader` until end of stream, a read error or
    /// cancellation, then closes every registered reader.
    ///
    /// Malformed packets and tables are reported on [`errors`](Self::errors)
    /// and skipped. Only a failing source ends the loop with an error.
    pub async fn run<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut buf = [0u8; TS_PACKET_SIZE];
        let result = loop {
            let filled = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                filled = read_packet(&mut reader, &mut buf) => filled,
            };
            match filled {
                Ok(0) => break Ok(()),
                Ok(TS_PACKET_SIZE) => {}
                Ok(n) => {
                    self.report(TsError::Framing(format!(
                        "stream ended {} bytes into a packet",
                        n
                    )));
                    break Ok(());
                }
                Err(e) => break Err(e),
            }

            match Packet::decode(&buf) {
                Ok(packet) => self.dispatch(packet).await,
                Err(e) => self.report(e),
            }
        };

        self.close_all();
        result
    }

    async fn dispatch(&self, packet: Packet) {
        let Some(payload) = packet.payload else {
            return;
        };
        trace!(
            "packet PID {:#06x} cc {} ({} bytes)",
            packet.pid,
            packet.continuity_counter,
            payload.len()
        );

        let pat = if packet.pid == PID_PAT && packet.payload_unit_start {
            match decode_pat(&payload) {
                Ok(pat) => pat,
                Err(e) => {
                    self.report(e);
                    None
                }
            }
        } else {
            None
        };

        let writer = {
            let mut state = self.state.lock();
            if let Some(pat) = pat {
                if state.pat.as_ref() != Some(&pat) {
                    debug!("PAT updated: {:?}", pat.programs());
                }
                state.pat = Some(pat);
            }
            state.pipes.get(&packet.pid).cloned()
        };
        let Some(mut writer) = writer else {
            return;
        };

        let written = tokio::time::timeout(
            self.config.dispatch_timeout(),
            writer.write_all(&payload),
        )
        .await;
        let err = match written {
            Ok(Ok(())) => return,
            Ok(Err(e)) => TsError::Io(e),
            Err(_) => TsError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("reader for PID {:#06x} stalled", packet.pid),
            )),
        };

        warn!("dropping PID {:#06x}: {}", packet.pid, err);
        let _ = writer.close();
        let mut state = self.state.lock();
        if state
            .pipes
            .get(&packet.pid)
            .is_some_and(|current| current.is_closed())
        {
            state.pipes.remove(&packet.pid);
        }
    }

    fn close_all(&self) {
        let pipes: Vec<_> = self.state.lock().pipes.drain().collect();
        for (pid, writer) in pipes {
            debug!("closing demux PID {:#06x}", pid);
            if let Err(e) = writer.close() {
                self.report(e);
            }
        }
    }
}

/// Fills `buf` unless the stream ends first; returns the bytes read.
async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn decode_pat(payload: &[u8]) -> Result<Option<Pat>> {
    let section = skip_pointer_field(payload)?;
    if section.first() == Some(&STUFFING_BYTE) {
        return Ok(None);
    }
    match Table::unmarshal(section)? {
        (Table::Pat(pat), _) => Ok(Some(pat)),
        (other, _) => Err(TsError::ProtocolViolation(format!(
            "table id {:#04x} on the PAT PID",
            other.table_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrcMode;
    use bytes::{BufMut, BytesMut};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn packet(pid: u16, cc: u8, payload: &[u8]) -> Vec<u8> {
        let mut packet = Packet::new(pid).with_payload(payload.to_vec());
        packet.continuity_counter = cc;
        packet.stuffed().unwrap().encode().unwrap().to_vec()
    }

    fn pat_packet(pat: &Pat) -> Vec<u8> {
        let mut payload = BytesMut::new();
        payload.put_u8(0);
        payload.put_slice(&pat.marshal(CrcMode::Computed).unwrap());
        let mut packet = Packet::new(PID_PAT).with_payload(payload.freeze());
        packet.payload_unit_start = true;
        packet.encode().unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_delivery_and_pat_snapshot() {
        let demux = TSDemuxer::with_config(Config::default());
        let mut video = demux.register(0x100).unwrap();

        let mut input = pat_packet(&Pat::new(1).with_program(1, 0x1000));
        input.extend(packet(0x100, 0, b"first "));
        input.extend(packet(0x200, 0, b"ignored"));
        input.extend(packet(0x100, 1, b"second"));

        demux
            .run(&input[..], CancellationToken::new())
            .await
            .unwrap();

        let mut out = Vec::new();
        video.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"first second");
        assert_eq!(
            demux.pat().unwrap().programs(),
            BTreeMap::from([(1, 0x1000)])
        );
    }

    #[tokio::test]
    async fn test_bad_packets_are_reported_and_skipped() {
        let demux = TSDemuxer::with_config(Config::default());
        let mut errors = demux.errors().unwrap();
        assert!(demux.errors().is_none());
        let mut video = demux.register(0x100).unwrap();

        let mut input = vec![0u8; TS_PACKET_SIZE];
        input.extend(packet(0x100, 0, b"ok"));
        input.extend_from_slice(&[SYNC_BYTE; 10]);

        demux
            .run(&input[..], CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(errors.recv().await, Some(TsError::Framing(_))));
        assert!(matches!(errors.recv().await, Some(TsError::Framing(_))));
        let mut out = Vec::new();
        video.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"ok");
    }

    #[tokio::test]
    async fn test_errors_not_queued_without_receiver() {
        let demux = TSDemuxer::with_config(Config::default());
        let mut input = Vec::new();
        for _ in 0..10_000 {
            input.extend_from_slice(&[0u8; TS_PACKET_SIZE]);
        }
        demux
            .run(&input[..], CancellationToken::new())
            .await
            .unwrap();

        let mut errors = demux.errors().unwrap();
        assert!(errors.try_recv().is_err());

        demux
            .run(&input[..TS_PACKET_SIZE], CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(errors.try_recv(), Ok(TsError::Framing(_))));
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn test_registration_rules() {
        let demux = TSDemuxer::with_config(Config::default());
        assert!(matches!(
            demux.register(PID_NULL),
            Err(TsError::ReservedPid(PID_NULL))
        ));
        assert!(matches!(demux.register(0x2000), Err(TsError::FieldRange(_))));

        let reader = demux.register(0x100).unwrap();
        assert!(matches!(
            demux.register(0x100),
            Err(TsError::AlreadyAssigned(0x100))
        ));
        reader.close();
        assert!(demux.register(0x100).is_ok());
    }

    #[tokio::test]
    async fn test_stalled_reader_is_dropped() {
        let config = Config {
            pipe_capacity: 200,
            dispatch_timeout_ms: 10,
            ..Config::default()
        };
        let demux = TSDemuxer::with_config(config);
        let stalled = demux.register(0x100).unwrap();
        let mut other = demux.register(0x101).unwrap();

        let mut input = Vec::new();
        for cc in 0..3 {
            input.extend(packet(0x100, cc, &[0xAB; 184]));
        }
        input.extend(packet(0x101, 0, b"still flowing"));

        tokio::time::timeout(
            Duration::from_secs(5),
            demux.run(&input[..], CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        let mut out = Vec::new();
        other.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"still flowing");
        drop(stalled);
    }

    #[tokio::test]
    async fn test_cancel_closes_readers() {
        let demux = TSDemuxer::with_config(Config::default());
        let mut video = demux.register(0x100).unwrap();
        let (_source_tx, source_rx) = tokio::io::duplex(TS_PACKET_SIZE);
        let cancel = CancellationToken::new();

        let run = tokio::spawn({
            let demux = demux.clone();
            let cancel = cancel.clone();
            async move { demux.run(source_rx, cancel).await }
        });
        cancel.cancel();
        run.await.unwrap().unwrap();

        let mut out = Vec::new();
        assert_eq!(video.read_to_end(&mut out).await.unwrap(), 0);
    }
}
