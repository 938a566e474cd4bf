//! Shared fixtures and helpers for multiplexer tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use p2pd_config::MuxConfig;
use p2pd_types::{CallId, MalformedCallId, ProtocolId, Request, Response};
use rstest::fixture;

use crate::{
    CloseReason, DispatchObserver, FrameReader, Multiplexer, RejectReason, encode_message,
};

/// Largest frame accepted by test readers.
const TEST_FRAME_LIMIT: usize = 1 << 20;

/// Read half fed with byte chunks by the test; reports end of stream once the
/// feeding [`DaemonFeed`] is dropped.
pub struct ChannelReader {
    chunks: Receiver<Vec<u8>>,
    current: Cursor<Vec<u8>>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = self.current.read(buf)?;
            if read > 0 || buf.is_empty() {
                return Ok(read);
            }
            match self.chunks.recv() {
                Ok(chunk) => self.current = Cursor::new(chunk),
                Err(_) => return Ok(0),
            }
        }
    }
}

/// Test-side handle playing the daemon's outbound direction.
pub struct DaemonFeed {
    chunks: Sender<Vec<u8>>,
}

impl DaemonFeed {
    /// Sends one framed message to the multiplexer.
    pub fn send(&self, message: &Response) {
        self.send_raw(encode_message(message).expect("encode test message"));
    }

    /// Sends raw bytes, framed or not.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        self.chunks.send(bytes).expect("reader still attached");
    }
}

/// Write half recording everything the multiplexer writes.
#[derive(Clone, Default)]
pub struct RecordingWriter {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl RecordingWriter {
    /// Decodes every complete request written so far.
    pub fn requests(&self) -> Vec<Request> {
        let snapshot = self
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut reader = FrameReader::new(Cursor::new(snapshot), TEST_FRAME_LIMIT);
        let mut requests = Vec::new();
        while let Some(request) = reader.read_message::<Request>().expect("decode written frame") {
            requests.push(request);
        }
        requests
    }
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routing event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    RequestRouted(ProtocolId),
    RequestRejected(ProtocolId, RejectReason),
    ResponseRouted(CallId),
    ResponseDiscarded(CallId),
    MalformedCallId(usize),
    Unrecognised,
    Closed(CloseReason),
}

/// Observer that records every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&Observed) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    fn record(&self, event: Observed) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl DispatchObserver for RecordingObserver {
    fn request_routed(&self, protocol: &ProtocolId) {
        self.record(Observed::RequestRouted(protocol.clone()));
    }

    fn request_rejected(&self, protocol: &ProtocolId, reason: RejectReason) {
        self.record(Observed::RequestRejected(protocol.clone(), reason));
    }

    fn response_routed(&self, call_id: CallId) {
        self.record(Observed::ResponseRouted(call_id));
    }

    fn response_discarded(&self, call_id: CallId) {
        self.record(Observed::ResponseDiscarded(call_id));
    }

    fn malformed_call_id(&self, error: &MalformedCallId) {
        self.record(Observed::MalformedCallId(error.length()));
    }

    fn unrecognised_message(&self, _message: &Response) {
        self.record(Observed::Unrecognised);
    }

    fn connection_closed(&self, reason: &CloseReason) {
        self.record(Observed::Closed(reason.clone()));
    }
}

/// A multiplexer wired to in-memory halves.
pub struct Harness {
    pub mux: Multiplexer,
    pub daemon: DaemonFeed,
    pub written: RecordingWriter,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    /// Starts a multiplexer using `config` and a recording observer.
    pub fn start(config: MuxConfig) -> Self {
        let observer = Arc::new(RecordingObserver::default());
        let (mux, daemon, written) = start_with_observer(config, Arc::clone(&observer));
        Self {
            mux,
            daemon,
            written,
            observer,
        }
    }
}

/// Starts a multiplexer reporting to `observer`.
pub fn start_with_observer(
    config: MuxConfig,
    observer: impl DispatchObserver + 'static,
) -> (Multiplexer, DaemonFeed, RecordingWriter) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let reader = ChannelReader {
        chunks: receiver,
        current: Cursor::new(Vec::new()),
    };
    let written = RecordingWriter::default();
    let mux = Multiplexer::builder(config)
        .with_observer(observer)
        .from_halves(reader, written.clone())
        .expect("start multiplexer");
    (mux, DaemonFeed { chunks: sender }, written)
}

#[fixture]
pub fn harness() -> Harness {
    Harness::start(MuxConfig::default())
}

/// A forwarded call for `protocol`.
pub fn forwarded(protocol: &str, call_id: CallId, data: &[u8]) -> Response {
    Response::request_handling(ProtocolId::from(protocol), call_id.to_bytes(), data.to_vec())
}

/// A successful answer to `call_id`.
pub fn answer(call_id: CallId, result: &[u8]) -> Response {
    Response::call_unary_response(call_id.to_bytes(), Ok(result.to_vec()))
}

/// Polls `condition` until it holds or two seconds pass.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
