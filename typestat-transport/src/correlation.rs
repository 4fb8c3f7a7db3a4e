//! Call correlation
//!
//! One physical channel carries many outstanding requests plus an
//! unsolicited notification stream. Every inbound report is reassembled
//! into a [`Response`] keyed by `(cmd, call_id)` and then routed:
//!
//! ```text
//! [HidTransport reader thread] ── 32-byte reports ──> pump task
//!                                                      |
//!                                                 [Correlator]
//!                                     /                |                \
//!                        notification fan-out   pending call reply   warn + drop
//! ```
//!
//! All reassembly state lives in one [`Correlator`] behind a single mutex;
//! the pump task is the only writer of reassembly buffers for a device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::command::{HidCommand, HidResponse};
use crate::error::TransportError;
use crate::framing::{self, Command, Message, REPORT_SIZE};
use crate::protocol::{cmd, timing};
use crate::{ReportReceiver, Transport};

/// Completed, reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub cmd: u8,
    pub call_id: u16,
    /// Payload of every packet concatenated in packet order (zero padded)
    pub payload: Vec<u8>,
}

type Callback = oneshot::Sender<Result<Response, TransportError>>;

/// Incomplete messages kept at once; the oldest is evicted beyond this
pub const MAX_PARTIAL_MESSAGES: usize = 32;

/// Packets received so far for one `(cmd, call_id)`
struct Partial {
    messages: Vec<Message>,
    /// Arrival order of the first packet, for eviction
    seq: u64,
}

/// Reassembly buffers, reply callbacks and notification subscribers.
///
/// Synchronous and I/O free; [`CorrelationManager`] drives it from the
/// report pump.
#[derive(Default)]
pub struct Correlator {
    pending: HashMap<(u8, u16), Partial>,
    next_seq: u64,
    callbacks: HashMap<u16, Callback>,
    subscribers: Vec<mpsc::UnboundedSender<Response>>,
    disconnected: bool,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the reply callback for a call.
    ///
    /// Fails once the device has disconnected so callers never wait on a
    /// channel nothing will read from.
    pub fn register(&mut self, call_id: u16) -> Result<oneshot::Receiver<Result<Response, TransportError>>, TransportError> {
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }
        let (tx, rx) = oneshot::channel();
        if self.callbacks.insert(call_id, tx).is_some() {
            warn!(call_id, "Call id reused while a previous call was outstanding");
        }
        Ok(rx)
    }

    /// Drop a registration whose caller is no longer waiting, along with
    /// any partial reply for it
    pub fn unregister(&mut self, call_id: u16) {
        self.callbacks.remove(&call_id);
        self.pending
            .retain(|&(command, id), _| id != call_id || cmd::is_notification(command));
    }

    /// Add a notification subscriber
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        // after disconnect the sender is dropped immediately and the
        // receiver observes a closed stream
        if !self.disconnected {
            self.subscribers.push(tx);
        }
        rx
    }

    /// Number of calls waiting for a reply
    pub fn outstanding(&self) -> usize {
        self.callbacks.len()
    }

    /// Number of partially reassembled messages
    pub fn partial(&self) -> usize {
        self.pending.len()
    }

    /// Process one raw report from the device.
    ///
    /// Never fails: every problem is logged and the report dropped.
    pub fn ingest(&mut self, bytes: &[u8; REPORT_SIZE]) {
        let message = match framing::parse(bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!("Dropping corrupt report: {}", e);
                return;
            }
        };
        trace!(
            cmd = message.cmd,
            call_id = message.call_id,
            packet = message.packet_number,
            total = message.total_packets,
            "Report received"
        );

        let message = match self.check(message) {
            Ok(message) => message,
            Err((message, e)) => {
                warn!("{}", e);
                // the stale call is discarded; this packet starts over
                self.pending.remove(&(message.cmd, message.call_id));
                self.fail(message.cmd, message.call_id, e);
                message
            }
        };
        if let Some(response) = self.accept(message) {
            self.dispatch(response);
        }
    }

    /// Reject a packet that conflicts with the partial message it belongs to
    fn check(&self, message: Message) -> Result<Message, (Message, TransportError)> {
        let Some(partial) = self.pending.get(&(message.cmd, message.call_id)) else {
            return Ok(message);
        };
        let messages = &partial.messages;

        if let Some(first) = messages.first() {
            let violation = if first.total_packets != message.total_packets {
                Some(format!(
                    "{} call {} announced {} packets, then {}",
                    cmd::name(message.cmd),
                    message.call_id,
                    first.total_packets,
                    message.total_packets
                ))
            } else if messages
                .iter()
                .any(|m| m.packet_number == message.packet_number)
            {
                Some(format!(
                    "{} call {} repeated packet {} before completing",
                    cmd::name(message.cmd),
                    message.call_id,
                    message.packet_number
                ))
            } else {
                None
            };

            if let Some(reason) = violation {
                return Err((message, TransportError::ProtocolViolation(reason)));
            }
        }
        Ok(message)
    }

    /// Append a message to its partial call, returning the response once
    /// all packets are present.
    fn accept(&mut self, message: Message) -> Option<Response> {
        let key = (message.cmd, message.call_id);
        let total = message.total_packets as usize;

        if total > 1 && !self.pending.contains_key(&key) {
            self.make_room();
        }
        let seq = self.next_seq;
        let partial = self.pending.entry(key).or_insert_with(|| Partial {
            messages: Vec::with_capacity(total),
            seq,
        });
        self.next_seq += 1;

        partial.messages.push(message);
        if partial.messages.len() < total {
            return None;
        }

        let mut messages = self.pending.remove(&key)?.messages;
        messages.sort_by_key(|m| m.packet_number);
        Some(Response {
            cmd: key.0,
            call_id: key.1,
            payload: messages.into_iter().flat_map(|m| m.payload).collect(),
        })
    }

    /// Evict the oldest partial message once the limit is reached
    fn make_room(&mut self) {
        if self.pending.len() < MAX_PARTIAL_MESSAGES {
            return;
        }
        let Some(&(command, call_id)) = self
            .pending
            .iter()
            .min_by_key(|(_, partial)| partial.seq)
            .map(|(key, _)| key)
        else {
            return;
        };
        self.pending.remove(&(command, call_id));
        let e = TransportError::ProtocolViolation(format!(
            "{} call {} evicted before completing",
            cmd::name(command),
            call_id
        ));
        warn!("{}", e);
        self.fail(command, call_id, e);
    }

    /// Fail the caller waiting on a reply; notifications have none
    fn fail(&mut self, command: u8, call_id: u16, e: TransportError) {
        if cmd::is_notification(command) {
            return;
        }
        if let Some(callback) = self.callbacks.remove(&call_id) {
            let _ = callback.send(Err(e));
        }
    }

    fn dispatch(&mut self, response: Response) {
        if cmd::is_notification(response.cmd) {
            self.subscribers
                .retain(|tx| tx.send(response.clone()).is_ok());
            return;
        }

        if !cmd::is_known(response.cmd) {
            warn!(
                "Dropping response with unknown cmd 0x{:02X} (call {})",
                response.cmd, response.call_id
            );
            return;
        }

        match self.callbacks.remove(&response.call_id) {
            Some(callback) => {
                debug!(
                    call_id = response.call_id,
                    "{} reply ({} bytes)",
                    cmd::name(response.cmd),
                    response.payload.len()
                );
                // the caller may have given up on the call
                let _ = callback.send(Ok(response));
            }
            None => warn!(
                "Dropping {} reply for unregistered call {}",
                cmd::name(response.cmd),
                response.call_id
            ),
        }
    }

    /// Fail every outstanding call and close the notification stream
    pub fn fail_all(&mut self) {
        let outstanding = self.callbacks.len();
        for (_, callback) in self.callbacks.drain() {
            let _ = callback.send(Err(TransportError::Disconnected));
        }
        self.pending.clear();
        self.subscribers.clear();
        self.disconnected = true;
        if outstanding > 0 {
            debug!("Failed {} outstanding calls on disconnect", outstanding);
        }
    }
}

/// Multiplexes calls and notifications over one [`Transport`].
///
/// Created with [`CorrelationManager::start`], which spawns the pump task
/// that drains inbound reports independently of any outstanding `send`.
pub struct CorrelationManager {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<Correlator>>,
    next_call_id: AtomicU16,
    /// Serializes chunk sequences so two commands never interleave
    write_lock: tokio::sync::Mutex<()>,
    packet_delay: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CorrelationManager {
    /// Start correlating reports read from `reports`; writes go to `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, reports: ReportReceiver) -> Arc<Self> {
        Self::start_with_delay(
            transport,
            reports,
            Duration::from_millis(timing::PACKET_DELAY_MS),
        )
    }

    /// Like [`start`](Self::start) with a custom inter-packet delay
    pub fn start_with_delay(
        transport: Arc<dyn Transport>,
        mut reports: ReportReceiver,
        packet_delay: Duration,
    ) -> Arc<Self> {
        let state = Arc::new(Mutex::new(Correlator::new()));
        let pump_state = state.clone();
        let device = transport.device_info().device_path.clone();

        let pump = tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                pump_state.lock().ingest(&report);
            }
            debug!("Report stream for {} closed", device);
            pump_state.lock().fail_all();
        });

        Arc::new(Self {
            transport,
            state,
            next_call_id: AtomicU16::new(0),
            write_lock: tokio::sync::Mutex::new(()),
            packet_delay,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// The underlying transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Allocate the next call id (wraps from 0xFFFF to 0)
    pub fn next_call_id(&self) -> u16 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Subscribe to notifications; the stream ends when the device disconnects
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Response> {
        self.state.lock().subscribe()
    }

    /// Number of calls waiting for a reply
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding()
    }

    /// Send a command and wait for its reply.
    ///
    /// There is no timeout: a command the device never answers only
    /// completes when the device disconnects. Wrap in
    /// `tokio::time::timeout` for bounded latency; dropping the future
    /// removes the registration.
    pub async fn send(&self, cmd: u8, payload: Vec<u8>) -> Result<Response, TransportError> {
        let call_id = self.next_call_id();
        let reports = framing::serialize(&Command::new(cmd, call_id, payload))?;

        // registered before the first write so a fast reply cannot be missed
        let reply = self.state.lock().register(call_id)?;
        let _registration = Registration {
            state: &self.state,
            call_id,
        };

        {
            let _guard = self.write_lock.lock().await;
            for report in &reports {
                tokio::time::sleep(self.packet_delay).await;
                self.transport.write_report(&report.to_wire()).await?;
                tokio::time::sleep(self.packet_delay).await;
            }
        }
        debug!(
            call_id,
            "Sent {} in {} report(s)",
            crate::protocol::cmd::name(cmd),
            reports.len()
        );

        reply.await.map_err(|_| TransportError::Disconnected)?
    }

    /// Send a typed command and decode the typed reply
    pub async fn query<C, R>(&self, command: &C) -> Result<R, TransportError>
    where
        C: HidCommand,
        R: HidResponse,
    {
        let response = self.send(C::CMD, command.to_payload()).await?;
        Ok(R::parse(&response)?)
    }

    /// Stop the pump, fail outstanding calls and close the transport
    pub async fn close(&self) -> Result<(), TransportError> {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.state.lock().fail_all();
        self.transport.close().await
    }
}

/// Unregisters a call when its `send` returns or is dropped
struct Registration<'a> {
    state: &'a Mutex<Correlator>,
    call_id: u16,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.state.lock().unregister(self.call_id);
    }
}

impl Drop for CorrelationManager {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{GetLayerMetadata, LayerMetadata};
    use crate::framing::RawReport;
    use crate::types::TransportDeviceInfo;
    use async_trait::async_trait;

    fn reports(cmd: u8, call_id: u16, payload: &[u8]) -> Vec<[u8; REPORT_SIZE]> {
        framing::serialize(&Command::new(cmd, call_id, payload.to_vec()))
            .unwrap()
            .iter()
            .map(RawReport::to_bytes)
            .collect()
    }

    #[test]
    fn test_reply_resolves_registered_call() {
        let mut c = Correlator::new();
        let mut rx = c.register(5).unwrap();
        for r in reports(cmd::GET_LAYER_METADATA, 5, &[1, 2, 3]) {
            c.ingest(&r);
        }
        let response = rx.try_recv().unwrap().unwrap();
        assert_eq!(response.cmd, cmd::GET_LAYER_METADATA);
        assert_eq!(response.call_id, 5);
        assert_eq!(&response.payload[..3], &[1, 2, 3]);
        assert_eq!(c.outstanding(), 0);
        assert_eq!(c.partial(), 0);
    }

    #[test]
    fn test_reordered_packets_match_in_order() {
        let payload: Vec<u8> = (0..70u8).collect(); // 3 packets
        let chunks = reports(cmd::GET_LAYERS, 9, &payload);
        assert_eq!(chunks.len(), 3);

        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut results = Vec::new();
        for order in orders {
            let mut c = Correlator::new();
            let mut rx = c.register(9).unwrap();
            for i in order {
                c.ingest(&chunks[i]);
            }
            results.push(rx.try_recv().unwrap().unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(&results[0].payload[..70], &payload[..]);
    }

    #[test]
    fn test_incomplete_call_stays_pending() {
        let mut c = Correlator::new();
        let mut rx = c.register(1).unwrap();
        let chunks = reports(cmd::GET_LAYERS, 1, &[7; 40]);
        c.ingest(&chunks[1]);
        assert_eq!(c.partial(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notifications_fan_out() {
        let mut c = Correlator::new();
        let mut a = c.subscribe();
        let mut b = c.subscribe();
        let mut call = c.register(0).unwrap();

        for r in reports(cmd::KEY_EVENT, 0, &[0, 4, 1, 2, 1, 0, 0]) {
            c.ingest(&r);
        }
        assert_eq!(a.try_recv().unwrap().cmd, cmd::KEY_EVENT);
        assert_eq!(b.try_recv().unwrap().cmd, cmd::KEY_EVENT);
        // notifications never consume a call id
        assert!(call.try_recv().is_err());
        assert_eq!(c.outstanding(), 1);
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let mut c = Correlator::new();
        let dropped = c.subscribe();
        let mut kept = c.subscribe();
        drop(dropped);
        for r in reports(cmd::KEY_EVENT, 0, &[0; 7]) {
            c.ingest(&r);
        }
        assert!(kept.try_recv().is_ok());
        assert_eq!(c.subscribers.len(), 1);
    }

    #[test]
    fn test_unknown_cmd_is_dropped() {
        let mut c = Correlator::new();
        let mut rx = c.register(3).unwrap();
        for r in reports(0x7F, 3, &[1]) {
            c.ingest(&r);
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(c.outstanding(), 1);
        assert_eq!(c.partial(), 0);
    }

    #[test]
    fn test_unregistered_reply_is_dropped() {
        let mut c = Correlator::new();
        for r in reports(cmd::GET_LAYER_METADATA, 44, &[1, 1, 1]) {
            c.ingest(&r);
        }
        assert_eq!(c.partial(), 0);
    }

    #[test]
    fn test_corrupt_report_is_dropped() {
        let mut c = Correlator::new();
        let mut bytes = [0u8; REPORT_SIZE];
        bytes[1] = cmd::GET_LAYERS;
        bytes[4] = 3;
        bytes[5] = 2;
        c.ingest(&bytes);
        assert_eq!(c.partial(), 0);
    }

    #[test]
    fn test_duplicate_packet_is_protocol_violation() {
        let mut c = Correlator::new();
        let mut rx = c.register(2).unwrap();
        let chunks = reports(cmd::GET_LAYERS, 2, &[1; 30]);
        c.ingest(&chunks[0]);
        c.ingest(&chunks[0]);

        match rx.try_recv().unwrap() {
            Err(TransportError::ProtocolViolation(_)) => {}
            other => panic!("expected protocol violation, got {:?}", other),
        }
        // the repeated packet starts a fresh pending call
        assert_eq!(c.pending[&(cmd::GET_LAYERS, 2)].messages.len(), 1);
    }

    #[test]
    fn test_complete_reply_after_violation_is_dispatched() {
        let mut c = Correlator::new();
        let mut first = c.register(1).unwrap();
        // stale half of a 2-packet reply, then a complete 1-packet reply
        c.ingest(&reports(cmd::GET_LAYERS, 1, &[1; 30])[0]);
        c.ingest(&reports(cmd::GET_LAYERS, 1, &[2; 4])[0]);
        assert!(matches!(
            first.try_recv().unwrap(),
            Err(TransportError::ProtocolViolation(_))
        ));
        assert_eq!(c.partial(), 0);

        let mut next = c.register(1).unwrap();
        c.ingest(&reports(cmd::GET_LAYERS, 1, &[3; 4])[0]);
        let response = next.try_recv().unwrap().unwrap();
        assert_eq!(&response.payload[..4], &[3; 4]);
        assert_eq!(c.partial(), 0);
    }

    #[test]
    fn test_notification_violation_keeps_call() {
        let mut c = Correlator::new();
        let mut call = c.register(1).unwrap();
        let chunks = reports(cmd::KEY_EVENT, 1, &[0; 30]);
        c.ingest(&chunks[0]);
        c.ingest(&chunks[0]);
        assert!(call.try_recv().is_err());
        assert_eq!(c.outstanding(), 1);
    }

    #[test]
    fn test_partial_messages_are_bounded() {
        let mut c = Correlator::new();
        let mut oldest = c.register(0).unwrap();
        for call_id in 0..=MAX_PARTIAL_MESSAGES as u16 {
            c.ingest(&reports(cmd::GET_LAYERS, call_id, &[0; 30])[0]);
        }
        assert_eq!(c.partial(), MAX_PARTIAL_MESSAGES);
        assert!(!c.pending.contains_key(&(cmd::GET_LAYERS, 0)));
        assert!(matches!(
            oldest.try_recv().unwrap(),
            Err(TransportError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_unregister_drops_partial_reply() {
        let mut c = Correlator::new();
        let _rx = c.register(6).unwrap();
        c.ingest(&reports(cmd::GET_LAYERS, 6, &[0; 30])[0]);
        c.ingest(&reports(cmd::KEY_EVENT, 6, &[0; 30])[0]);
        c.unregister(6);
        assert_eq!(c.outstanding(), 0);
        assert_eq!(c.partial(), 1);
        assert!(c.pending.contains_key(&(cmd::KEY_EVENT, 6)));
    }

    #[test]
    fn test_total_packets_mismatch_is_protocol_violation() {
        let mut c = Correlator::new();
        let mut rx = c.register(4).unwrap();
        c.ingest(&reports(cmd::GET_LAYERS, 4, &[1; 60])[0]);
        c.ingest(&reports(cmd::GET_LAYERS, 4, &[1; 30])[1]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(TransportError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_fail_all_on_disconnect() {
        let mut c = Correlator::new();
        let mut a = c.register(1).unwrap();
        let mut b = c.register(2).unwrap();
        let mut events = c.subscribe();
        c.ingest(&reports(cmd::GET_LAYERS, 1, &[0; 40])[0]);

        c.fail_all();
        assert!(matches!(a.try_recv().unwrap(), Err(TransportError::Disconnected)));
        assert!(matches!(b.try_recv().unwrap(), Err(TransportError::Disconnected)));
        assert!(events.try_recv().is_err());
        assert_eq!(c.partial(), 0);
        assert!(matches!(c.register(3), Err(TransportError::Disconnected)));
    }

    /// Answers every completed command with a canned payload
    struct Responder {
        info: TransportDeviceInfo,
        replies: mpsc::Sender<[u8; REPORT_SIZE]>,
        written: Mutex<Vec<Vec<u8>>>,
        reply_payload: Vec<u8>,
        fail_writes: bool,
    }

    impl Responder {
        fn new(
            reply_payload: Vec<u8>,
            fail_writes: bool,
        ) -> (Arc<Self>, ReportReceiver) {
            let (tx, rx) = mpsc::channel(64);
            let responder = Arc::new(Self {
                info: TransportDeviceInfo {
                    vid: 0xFEED,
                    pid: 0x0001,
                    device_path: "test".into(),
                    serial: None,
                    product_name: None,
                },
                replies: tx,
                written: Mutex::new(Vec::new()),
                reply_payload,
                fail_writes,
            });
            (responder, rx)
        }
    }

    #[async_trait]
    impl Transport for Responder {
        async fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::HidError("write failed".into()));
            }
            self.written.lock().push(report.to_vec());
            let mut bytes = [0u8; REPORT_SIZE];
            bytes.copy_from_slice(&report[..REPORT_SIZE]);
            let msg = framing::parse(&bytes).unwrap();
            if msg.packet_number + 1 == msg.total_packets {
                for r in reports(msg.cmd, msg.call_id, &self.reply_payload) {
                    self.replies.send(r).await.unwrap();
                }
            }
            Ok(())
        }

        fn device_info(&self) -> &TransportDeviceInfo {
            &self.info
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_round_trip() {
        let (responder, rx) = Responder::new(vec![2, 4, 12], false);
        let manager = CorrelationManager::start(responder.clone(), rx);

        let meta: LayerMetadata = manager.query(&GetLayerMetadata).await.unwrap();
        assert_eq!(meta.number_of_layers, 2);
        assert_eq!(meta.matrix_rows, 4);
        assert_eq!(meta.matrix_cols, 12);

        let written = responder.written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].len(), framing::WRITE_REPORT_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_ids_increment() {
        let (responder, rx) = Responder::new(vec![1, 1, 1], false);
        let manager = CorrelationManager::start(responder.clone(), rx);
        let a = manager.send(cmd::GET_LAYER_METADATA, Vec::new()).await.unwrap();
        let b = manager.send(cmd::GET_LAYER_METADATA, Vec::new()).await.unwrap();
        assert_eq!(a.call_id, 0);
        assert_eq!(b.call_id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_id_wraps() {
        let (responder, rx) = Responder::new(Vec::new(), false);
        let manager = CorrelationManager::start(responder, rx);
        manager.next_call_id.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(manager.next_call_id(), u16::MAX);
        assert_eq!(manager.next_call_id(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_error_fails_send() {
        let (responder, rx) = Responder::new(Vec::new(), true);
        let manager = CorrelationManager::start(responder, rx);
        let err = manager
            .send(cmd::GET_LAYER_METADATA, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::HidError(_)));
        assert_eq!(manager.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_delays() {
        let (responder, rx) = Responder::new(vec![0], false);
        let manager = CorrelationManager::start(responder.clone(), rx);
        let start = tokio::time::Instant::now();
        // 30 bytes -> 2 chunks, each wrapped in two 10 ms delays
        manager.send(cmd::GET_LAYERS, vec![0; 30]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(responder.written.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_send_unregisters() {
        let (responder, _unused) = Responder::new(Vec::new(), false);
        let (_tx, rx) = mpsc::channel(1);
        let manager = CorrelationManager::start_with_delay(responder, rx, Duration::ZERO);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            manager.send(cmd::GET_LAYERS, Vec::new()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(manager.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_send() {
        let (responder, _unused) = Responder::new(Vec::new(), false);
        let (tx, rx) = mpsc::channel(1);
        let manager = CorrelationManager::start_with_delay(responder, rx, Duration::ZERO);
        let mut events = manager.subscribe();

        // the responder answers on a channel nobody reads; only the
        // disconnect can complete this call
        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send(cmd::GET_LAYERS, Vec::new()).await })
        };
        while manager.outstanding() == 0 {
            tokio::task::yield_now().await;
        }
        drop(tx);

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert!(events.recv().await.is_none());
        assert!(matches!(
            manager.send(cmd::GET_LAYERS, Vec::new()).await,
            Err(TransportError::Disconnected)
        ));
    }
}
