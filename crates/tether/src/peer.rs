//! # Symmetric Peer with Async Pump
//!
//! Both the host and the page own a `Peer`. Each can issue calls and each can serve them.
//! A background pump reads the transport and demultiplexes frames: replies are routed to the
//! completion registered under their sequence number, calls are handed to a `Dispatcher`.
//!
//! `call` and `notify` are synchronous and may be used from any thread. The actual send is
//! spawned onto the I/O runtime, and completions run on that runtime's thread, so a completion
//! must never block.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tetherpack::WireValue;
use tetherrpc::Args;
use tetherrpc::CallFrame;
use tetherrpc::ErrorPayload;
use tetherrpc::Frame;
use tetherrpc::NOTIFY_SEQ;
use tetherrpc::ReplyFrame;
use tetherrpc::decode_seq;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::correlator::Outcome;
use crate::error::Error;
use crate::transport;
use crate::transport::Transport;

/// Invoked exactly once with the outcome of a call.
pub type Completion = Box<dyn FnOnce(Outcome) + Send + Sync + 'static>;

/// Serves inbound calls.
///
/// `dispatch` runs on the I/O thread; long work must be moved elsewhere and answered through
/// the `Responder` later.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, call: CallFrame, responder: Responder);
}

#[derive(Clone)]
struct ReplySink {
    transport: Arc<dyn Transport>,
    runtime: Handle,
}

impl ReplySink {
    fn send(self, seq: u64, status: std::result::Result<WireValue, ErrorPayload>) {
        if seq == NOTIFY_SEQ {
            return;
        }
        let bytes = match (Frame::Reply(ReplyFrame { seq, status })).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(seq, error = %e, "reply could not be encoded");
                let fallback = ErrorPayload::new("ProtocolError", e.to_string());
                match (Frame::Reply(ReplyFrame { seq, status: Err(fallback) })).encode() {
                    Ok(bytes) => bytes,
                    Err(_) => return,
                }
            }
        };
        let transport = self.transport;
        self.runtime.spawn(async move {
            if let Err(e) = transport.send(&bytes).await {
                debug!(seq, error = %e, "reply not delivered");
            }
        });
    }
}

/// The obligation to answer one inbound call.
///
/// Answering consumes the responder. Dropping it unanswered sends a `ResponderDropped` error,
/// so every call receives exactly one reply.
pub struct Responder {
    seq: u64,
    sink: Option<ReplySink>,
}

impl Responder {
    fn new(seq: u64, sink: ReplySink) -> Self {
        Self { seq, sink: Some(sink) }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// False for notifications, whose replies are discarded.
    pub fn expects_reply(&self) -> bool {
        self.seq != NOTIFY_SEQ
    }

    pub fn reply(mut self, status: std::result::Result<WireValue, ErrorPayload>) {
        if let Some(sink) = self.sink.take() {
            sink.send(self.seq, status);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            let payload = ErrorPayload::new("ResponderDropped", "call was dropped without a reply");
            sink.send(self.seq, Err(payload));
        }
    }
}

/// One end of a host/page connection.
///
/// Each Peer owns its transport exclusively, so sequence numbers are scoped to one
/// connection. Peers are shared behind `Arc`.
pub struct Peer {
    peer_name: String,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    pending: Arc<DashMap<u64, Completion>>,
    seq_gen: AtomicU64,
    closed: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl Peer {
    /// Creates a new peer and spawns the pump task on `runtime`.
    ///
    /// Without a dispatcher every inbound call is answered with a `NoDispatcher` error.
    pub fn new(
        peer_name: impl Into<String>,
        transport: Box<dyn Transport>,
        runtime: Handle,
        dispatcher: Option<Arc<dyn Dispatcher>>,
    ) -> Self {
        let peer_name = peer_name.into();
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let pending: Arc<DashMap<u64, Completion>> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump_name = peer_name.clone();
        let pump_transport = transport.clone();
        let pump_pending = pending.clone();
        let pump_closed = closed.clone();
        let sink = ReplySink { transport: transport.clone(), runtime: runtime.clone() };

        let pump = runtime.spawn(async move {
            let error = loop {
                match pump_transport.recv().await {
                    Ok(Some(msg)) => {
                        Self::handle_message(
                            &pump_name,
                            &msg,
                            &pump_pending,
                            dispatcher.as_deref(),
                            &sink,
                        );
                    }
                    Ok(None) => {
                        break transport::Error::Closed("stream ended".into());
                    }
                    Err(e) => {
                        warn!(peer = %pump_name, error = %e, "transport error in pump");
                        break e;
                    }
                }
            };

            pump_closed.store(true, Ordering::Release);
            debug!(peer = %pump_name, %error, "pump stopped");
            Self::notify_all_pending(&pump_pending, Error::Transport(error));
        });

        Self {
            peer_name,
            transport,
            runtime,
            pending,
            seq_gen: AtomicU64::new(1),
            closed,
            pump,
        }
    }

    /// Returns the peer name used in diagnostics.
    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// True once the transport has closed. A closed peer never reopens.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fail every pending call with the given error.
    fn notify_all_pending(pending: &DashMap<u64, Completion>, error: Error) {
        let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, completion)) = pending.remove(&key) {
                completion(Err(error.clone()));
            }
        }
    }

    /// Handle an incoming message from the transport.
    fn handle_message(
        peer_name: &str,
        msg: &[u8],
        pending: &DashMap<u64, Completion>,
        dispatcher: Option<&dyn Dispatcher>,
        sink: &ReplySink,
    ) {
        match Frame::decode(msg) {
            Ok(Frame::Reply(reply)) => {
                let Some((_, completion)) = pending.remove(&reply.seq) else {
                    // Duplicate or very late reply.
                    debug!(peer = %peer_name, seq = reply.seq, "discarding unmatched reply");
                    return;
                };
                completion(reply.status.map_err(Error::Remote));
            }
            Ok(Frame::Call(call)) => {
                let responder = Responder::new(call.seq, sink.clone());
                match dispatcher {
                    Some(dispatcher) => dispatcher.dispatch(call, responder),
                    None => {
                        let message = format!("{} does not serve {}", peer_name, call.op);
                        responder.reply(Err(ErrorPayload::new("NoDispatcher", message)));
                    }
                }
            }
            Err(e) => {
                warn!(peer = %peer_name, error = %e, "malformed frame");
                if let Ok(seq) = decode_seq(msg) {
                    if let Some((_, completion)) = pending.remove(&seq) {
                        completion(Err(Error::from(e)));
                    }
                }
            }
        }
    }

    /// Sends a call. `completion` runs exactly once: with the reply, or with a transport error
    /// if the call cannot be sent or the connection closes first.
    pub fn call(&self, op: &str, args: Args, completion: Completion) -> u64 {
        let seq = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::Call(CallFrame { seq, op: op.to_owned(), args });
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                completion(Err(e.into()));
                return seq;
            }
        };

        self.pending.insert(seq, completion);
        if self.is_closed() {
            // The pump may already have drained the table.
            if let Some((_, completion)) = self.pending.remove(&seq) {
                completion(Err(Error::Transport(transport::Error::Closed(
                    format!("{} is closed", self.peer_name),
                ))));
            }
            return seq;
        }

        let transport = self.transport.clone();
        let pending = self.pending.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport.send(&bytes).await {
                if let Some((_, completion)) = pending.remove(&seq) {
                    completion(Err(e.into()));
                }
            }
        });
        seq
    }

    /// Sends a call that expects no reply.
    pub fn notify(&self, op: &str, args: Args) {
        if self.is_closed() {
            return;
        }
        let frame = Frame::Call(CallFrame { seq: NOTIFY_SEQ, op: op.to_owned(), args });
        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %self.peer_name, op, error = %e, "notification could not be encoded");
                return;
            }
        };
        let transport = self.transport.clone();
        let peer_name = self.peer_name.clone();
        self.runtime.spawn(async move {
            if let Err(e) = transport.send(&bytes).await {
                debug!(peer = %peer_name, error = %e, "notification not delivered");
            }
        });
    }
}

impl Drop for Peer {
    /// Stops the pump so the transport is released and the other side observes the close.
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::channel::ChannelEnd;

    struct Echo;

    impl Dispatcher for Echo {
        fn dispatch(&self, call: CallFrame, responder: Responder) {
            match call.op.as_str() {
                "echo" => {
                    let value = call.args.get("value").cloned().unwrap_or(WireValue::Undefined);
                    responder.reply(Ok(value));
                }
                "fail" => responder.reply(Err(ErrorPayload::new("TypeError", "asked to fail"))),
                // Dropped unanswered.
                _ => {}
            }
        }
    }

    fn pair(dispatcher: Option<Arc<dyn Dispatcher>>) -> (Peer, Peer) {
        let (a, b) = ChannelEnd::pair();
        let runtime = Handle::current();
        let client = Peer::new("client", Box::new(a), runtime.clone(), None);
        let server = Peer::new("server", Box::new(b), runtime, dispatcher);
        (client, server)
    }

    fn call(peer: &Peer, op: &str, args: Args) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        peer.call(op, args, Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }));
        rx
    }

    #[tokio::test]
    async fn test_reply_routed_by_seq() {
        let (client, _server) = pair(Some(Arc::new(Echo)));
        let first = call(&client, "echo", Args::new().with("value", 1));
        let second = call(&client, "echo", Args::new().with("value", "two"));

        assert_eq!(second.await.unwrap().unwrap(), WireValue::from("two"));
        assert_eq!(first.await.unwrap().unwrap(), WireValue::from(1));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_surfaces() {
        let (client, _server) = pair(Some(Arc::new(Echo)));
        match call(&client, "fail", Args::new()).await.unwrap() {
            Err(Error::Remote(e)) => assert_eq!(e.name, "TypeError"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_responder_still_replies() {
        let (client, _server) = pair(Some(Arc::new(Echo)));
        match call(&client, "ignored", Args::new()).await.unwrap() {
            Err(Error::Remote(e)) => assert_eq!(e.name, "ResponderDropped"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_dispatcher() {
        let (client, _server) = pair(None);
        match call(&client, "echo", Args::new()).await.unwrap() {
            Err(Error::Remote(e)) => assert_eq!(e.name, "NoDispatcher"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (a, b) = ChannelEnd::pair();
        let client = Peer::new("client", Box::new(a), Handle::current(), None);
        let pending = call(&client, "echo", Args::new());

        // Nobody serves the call; hang up after it has been sent.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(b);

        match pending.await.unwrap() {
            Err(Error::Transport(transport::Error::Closed(_))) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(client.is_closed());

        let late = call(&client, "echo", Args::new());
        assert!(matches!(late.await.unwrap(), Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_dropping_peer_closes_connection() {
        let (client, server) = pair(Some(Arc::new(Echo)));
        let pending = call(&client, "ignored", Args::new());
        // The dropped responder answers before the server goes away.
        assert!(pending.await.unwrap().is_err());

        drop(server);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_notify_gets_no_reply() {
        struct Counter(tokio::sync::mpsc::UnboundedSender<u64>);
        impl Dispatcher for Counter {
            fn dispatch(&self, call: CallFrame, responder: Responder) {
                let _ = self.0.send(call.seq);
                assert!(!responder.expects_reply());
                responder.reply(Ok(WireValue::Null));
            }
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (client, _server) = pair(Some(Arc::new(Counter(tx))));
        client.notify("release", Args::new());
        assert_eq!(rx.recv().await, Some(NOTIFY_SEQ));
        assert_eq!(client.pending_count(), 0);
    }
}
