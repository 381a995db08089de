use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use transport::{FrameSink, Transport};
use transport_codecs::{encode_envelope, Envelope, Message, Payload, PayloadKind, TypeRegistry};

use crate::notify::Notification;
use crate::pending::{DoneCallback, PendingCall, PendingSummary, PendingTable, Reply};
use crate::worker::{self, FollowUpQueue, Job};
use crate::{identity, recv_loop, CallStarter, ClientConfig, RpcError, RpcResult};

const FIRST_SEQ: u64 = 1;

/// State shared by the client, its receive thread and outstanding starters.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) recv_identity: String,
    next_seq: AtomicU64,
    // Serializes writers so frames of different messages never interleave.
    sink: Mutex<Option<Box<dyn FrameSink>>>,
    pub(crate) pending: PendingTable,
    followups: FollowUpQueue,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn encode(&self, seq: u64, session: Option<&str>, payload: &Payload) -> RpcResult<(Vec<u8>, Vec<u8>)> {
        let envelope = Envelope::new(seq, payload.type_name(), self.recv_identity.as_str())
            .with_session(session)
            .with_library(self.config.library);
        Ok((encode_envelope(&envelope)?, payload.encode()?))
    }

    pub(crate) fn send(
        &self,
        seq: u64,
        type_name: &str,
        envelope: &[u8],
        body: &[u8],
    ) -> RpcResult<()> {
        let mut guard = self.sink.lock();
        let Some(sink) = guard.as_mut() else {
            debug!(seq, type_name, "send rejected: client shut down");
            return Err(RpcError::Shutdown);
        };
        let frames: [&[u8]; 3] = [&[], envelope, body];
        match sink.send_multipart(&frames) {
            Ok(()) => {
                debug!(seq, type_name, "sent");
                Ok(())
            }
            Err(err) => {
                error!(seq, type_name, "send failed: {err}");
                Err(err.into())
            }
        }
    }

    fn make_starter(
        self: &Arc<Self>,
        seq: u64,
        session: Option<&str>,
        request: &Payload,
        call: Option<PendingCall>,
    ) -> RpcResult<CallStarter> {
        if self.sink.lock().is_none() {
            debug!(seq, "call rejected: client shut down");
            return Err(RpcError::Shutdown);
        }
        let (envelope, body) = self.encode(seq, session, request)?;
        if let Some(call) = call.filter(|call| !call.is_empty()) {
            self.pending.insert(seq, call);
        }
        Ok(CallStarter::new(
            Arc::clone(self),
            seq,
            request.type_name(),
            envelope,
            body,
        ))
    }

    fn start_call(self: &Arc<Self>, session: Option<&str>, request: Payload) -> RpcResult<CallStarter> {
        let seq = self.next_seq();
        self.make_starter(seq, session, &request, None)
    }

    fn call_raw(
        self: &Arc<Self>,
        session: Option<&str>,
        request: Payload,
        reply: Option<PayloadKind>,
        done: DoneCallback,
    ) -> RpcResult<CallStarter> {
        let seq = self.next_seq();
        self.make_starter(seq, session, &request, Some(PendingCall::terminal(reply, done)))
    }

    fn call_async<R, F>(
        self: &Arc<Self>,
        session: Option<&str>,
        request: Payload,
        done: F,
    ) -> RpcResult<CallStarter>
    where
        R: Message,
        F: FnOnce(RpcResult<R>) + Send + 'static,
    {
        let seq = self.next_seq();
        let done: DoneCallback = Box::new(move |result: RpcResult<Reply>| {
            done(result.and_then(|reply| into_message::<R>(seq, reply)))
        });
        self.make_starter(
            seq,
            session,
            &request,
            Some(PendingCall::terminal(Some(R::KIND), done)),
        )
    }

    fn send_correlated(&self, seq: u64, session: Option<&str>, payload: &Payload) -> RpcResult<()> {
        let (envelope, body) = self.encode(seq, session, payload)?;
        self.send(seq, payload.type_name(), &envelope, &body)
    }

    fn dump_pending(&self) -> Vec<PendingSummary> {
        let entries = self.pending.snapshot();
        info!(identity = %self.recv_identity, count = entries.len(), "pending calls");
        for entry in &entries {
            info!("  {entry}");
        }
        entries
    }

    pub(crate) fn trace_pending(&self) {
        let entries = self.pending.snapshot();
        trace!(count = entries.len(), "pending calls before receive");
        for entry in &entries {
            trace!("  {entry}");
        }
    }
}

/// Converts a decoded reply into the body type a caller asked for.
pub(crate) fn into_message<M: Message>(seq: u64, reply: Reply) -> RpcResult<M> {
    match reply {
        Some(payload) => M::try_from(payload).map_err(|other| RpcError::UnexpectedReply {
            expected: M::type_name(),
            actual: other.type_name(),
        }),
        None => Err(RpcError::NoBody {
            seq,
            type_name: M::type_name().to_owned(),
        }),
    }
}

struct Threads {
    recv: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

/// Asynchronous RPC client for one executor.
///
/// Owns a send path, a receive thread that dispatches replies and pushes by
/// sequence number, and a follow-up worker for calls issued in response to
/// pushes. Dropping the client shuts it down.
pub struct RpcClient {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    threads: Mutex<Threads>,
    recv_thread: ThreadId,
    worker_thread: ThreadId,
    closed: AtomicBool,
}

impl RpcClient {
    pub fn connect<T: Transport>(config: ClientConfig, transport: T) -> RpcResult<Self> {
        Self::connect_with_registry(config, transport, TypeRegistry::builtin())
    }

    /// Connects over ZeroMQ to `config.executor_addr`.
    #[cfg(feature = "zmq")]
    pub fn connect_zmq(config: ClientConfig) -> RpcResult<Self> {
        let transport = transport::ZmqTransport::new(config.executor_addr.clone());
        Self::connect(config, transport)
    }

    /// Connects with a caller-supplied type registry for inbound messages.
    pub fn connect_with_registry<T: Transport>(
        config: ClientConfig,
        transport: T,
        registry: TypeRegistry,
    ) -> RpcResult<Self> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let recv_identity = identity::generate(&config.identity_prefix);
        // The source is registered before any call can go out so that no
        // reply races its route.
        let source = transport.open_source(recv_identity.as_bytes())?;
        let sink = transport.open_sink()?;
        let (followups, worker) = worker::spawn(config.worker_queue)?;

        let shared = Arc::new(Shared {
            config,
            recv_identity,
            next_seq: AtomicU64::new(FIRST_SEQ),
            sink: Mutex::new(Some(sink)),
            pending: PendingTable::default(),
            followups,
        });

        let recv_shared = Arc::clone(&shared);
        let recv = match thread::Builder::new()
            .name("rpc-recv".into())
            .spawn(move || recv_loop::run(recv_shared, source, registry))
        {
            Ok(handle) => handle,
            Err(err) => {
                shared.followups.close();
                let _ = worker.join();
                return Err(err.into());
            }
        };

        info!(
            identity = %shared.recv_identity,
            addr = %shared.config.executor_addr,
            "executor client connected"
        );
        Ok(Self {
            recv_thread: recv.thread().id(),
            worker_thread: worker.thread().id(),
            shared,
            transport,
            threads: Mutex::new(Threads {
                recv: Some(recv),
                worker: Some(worker),
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn recv_identity(&self) -> &str {
        &self.shared.recv_identity
    }

    /// A weak handle for callbacks and follow-up jobs.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Prepares `request` with no callbacks. Attach typed callbacks with
    /// [`CallStarter::add`] before starting it.
    pub fn start_call(&self, session: Option<&str>, request: impl Into<Payload>) -> RpcResult<CallStarter> {
        self.shared.start_call(session, request.into())
    }

    /// Prepares `request` whose reply retires the call through `done`.
    pub fn call_async<R, F>(
        &self,
        session: Option<&str>,
        request: impl Into<Payload>,
        done: F,
    ) -> RpcResult<CallStarter>
    where
        R: Message,
        F: FnOnce(RpcResult<R>) + Send + 'static,
    {
        self.shared.call_async::<R, F>(session, request.into(), done)
    }

    /// Untyped form of [`RpcClient::call_async`]. With `reply == None` the
    /// call retires on any message and `done` receives `Ok(None)`.
    pub fn call_raw(
        &self,
        session: Option<&str>,
        request: impl Into<Payload>,
        reply: Option<PayloadKind>,
        done: DoneCallback,
    ) -> RpcResult<CallStarter> {
        self.shared.call_raw(session, request.into(), reply, done)
    }

    /// Sends `request` and blocks until the reply arrives or the call is cancelled.
    ///
    /// Must not be called from a callback running on the receive thread.
    pub fn call_sync<R: Message>(&self, session: Option<&str>, request: impl Into<Payload>) -> RpcResult<R> {
        self.call_sync_inner(session, request.into(), None)
    }

    /// Like [`RpcClient::call_sync`] but gives up after `timeout`. The call
    /// stays pending and is retired or cancelled later.
    pub fn call_sync_timeout<R: Message>(
        &self,
        session: Option<&str>,
        request: impl Into<Payload>,
        timeout: Duration,
    ) -> RpcResult<R> {
        self.call_sync_inner(session, request.into(), Some(timeout))
    }

    fn call_sync_inner<R: Message>(
        &self,
        session: Option<&str>,
        request: Payload,
        timeout: Option<Duration>,
    ) -> RpcResult<R> {
        if self.on_receive_thread() {
            return Err(RpcError::internal(
                "synchronous call from the receive thread would never complete",
            ));
        }
        let note = Arc::new(Notification::new());
        let signal = Arc::clone(&note);
        let mut starter = self
            .shared
            .call_async::<R, _>(session, request, move |result| {
                signal.notify(result);
            })?;
        starter.start()?;
        drop(starter);
        let outcome = match timeout {
            None => note.wait(),
            Some(timeout) => note.wait_timeout(timeout),
        };
        outcome.unwrap_or(Err(RpcError::Timeout))
    }

    /// Sends `payload` under an existing sequence number without registering
    /// a pending entry. Used to answer executor pushes.
    pub fn send_correlated(&self, seq: u64, session: Option<&str>, payload: impl Into<Payload>) -> RpcResult<()> {
        self.shared.send_correlated(seq, session, &payload.into())
    }

    pub fn submit_followup(&self, job: impl FnOnce() + Send + 'static) -> RpcResult<()> {
        self.shared.followups.submit(Box::new(job))
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn is_pending(&self, seq: u64) -> bool {
        self.shared.pending.contains(seq)
    }

    /// Logs every pending entry at `info` and returns the same view.
    pub fn dump_pending(&self) -> Vec<PendingSummary> {
        self.shared.dump_pending()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops the client: refuses new sends, closes the transport, joins the
    /// receive thread, cancels every pending call and drains the follow-up queue.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(identity = %self.shared.recv_identity, "shutting down executor client");
        self.shared.sink.lock().take();
        self.transport.shutdown();

        let (recv, worker) = {
            let mut threads = self.threads.lock();
            (threads.recv.take(), threads.worker.take())
        };
        let current = thread::current().id();
        if let Some(handle) = recv {
            if current == self.recv_thread {
                debug!("shutdown requested from the receive thread; not joining it");
            } else if handle.join().is_err() {
                error!("receive thread panicked");
            }
        }
        // Cancel before joining the worker: a follow-up job may be blocked
        // on one of these calls. Anything it sends afterwards fails on the
        // missing sink and erases its own entry.
        let cancelled = self.shared.pending.drain_with_cancellation();
        if cancelled > 0 {
            info!(cancelled, "cancelled pending calls at shutdown");
        }

        self.shared.followups.close();
        if let Some(handle) = worker {
            if current == self.worker_thread {
                debug!("shutdown requested from the follow-up worker; not joining it");
            } else if handle.join().is_err() {
                error!("follow-up worker panicked");
            }
        }
        let late = self.shared.pending.drain_with_cancellation();
        if late > 0 {
            debug!(late, "cancelled calls registered during shutdown");
        }
    }

    /// True when called from the receive thread, where blocking on a reply
    /// would never complete.
    pub fn on_receive_thread(&self) -> bool {
        thread::current().id() == self.recv_thread
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Non-owning client handle. Every operation fails with
/// [`RpcError::Shutdown`] once the client is gone.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Weak<Shared>,
}

impl ClientHandle {
    fn shared(&self) -> RpcResult<Arc<Shared>> {
        self.shared.upgrade().ok_or(RpcError::Shutdown)
    }

    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    pub fn start_call(&self, session: Option<&str>, request: impl Into<Payload>) -> RpcResult<CallStarter> {
        self.shared()?.start_call(session, request.into())
    }

    pub fn call_async<R, F>(
        &self,
        session: Option<&str>,
        request: impl Into<Payload>,
        done: F,
    ) -> RpcResult<CallStarter>
    where
        R: Message,
        F: FnOnce(RpcResult<R>) + Send + 'static,
    {
        self.shared()?.call_async::<R, F>(session, request.into(), done)
    }

    pub fn send_correlated(&self, seq: u64, session: Option<&str>, payload: impl Into<Payload>) -> RpcResult<()> {
        self.shared()?.send_correlated(seq, session, &payload.into())
    }

    pub fn submit_followup(&self, job: impl FnOnce() + Send + 'static) -> RpcResult<()> {
        let job: Job = Box::new(job);
        self.shared()?.followups.submit(job)
    }
}
