use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use smallvec::smallvec;
use tracing::{debug, info, warn};

use transport::{MemRouter, MemTransport, Multipart, RoutedMessage};
use transport_codecs::{
    decode_envelope, encode_envelope, AllocResponse, CloseSessionResponse, ContextDef,
    CreateSessionResponse, CustomResponse, DeallocResponse, Envelope, FetchResponse, Payload,
    PayloadKind, PushResponse, RendezRecvRequest, RendezRecvUpdate, RunResponse, TensorBlob,
    TypeRegistry,
};

use crate::Script;

const POLL: Duration = Duration::from_millis(10);
const EXECUTOR_IDENTITY: &str = "mock-executor";
const CORRUPT_BODY: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

/// One message as the executor saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub peer: u64,
    pub envelope: Envelope,
    /// `None` when the body was absent or did not decode.
    pub payload: Option<Payload>,
}

impl Received {
    pub fn kind(&self) -> Option<PayloadKind> {
        self.payload.as_ref().map(Payload::kind)
    }
}

struct DeferredRun {
    identity: Vec<u8>,
    session: Option<String>,
    context: ContextDef,
}

struct State {
    script: Script,
    received: Vec<Received>,
    next_handle: u64,
    next_session: u64,
    sessions: Vec<String>,
    tensors: HashMap<u64, TensorBlob>,
    deferred: HashMap<u64, DeferredRun>,
}

/// In-process executor speaking the wire protocol over a [`MemRouter`].
pub struct MockExecutor {
    router: Arc<MemRouter>,
    state: Arc<Mutex<State>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MockExecutor {
    /// Creates a transport for the client and an executor serving its router end.
    pub fn pair(script: Script) -> Result<(MemTransport, MockExecutor)> {
        let (transport, router) = MemTransport::pair();
        let executor = MockExecutor::spawn(router, script)?;
        Ok((transport, executor))
    }

    pub fn spawn(router: MemRouter, script: Script) -> Result<Self> {
        let router = Arc::new(router);
        let state = Arc::new(Mutex::new(State {
            next_handle: script.alloc_base,
            script,
            received: Vec::new(),
            next_session: 1,
            sessions: Vec::new(),
            tensors: HashMap::new(),
            deferred: HashMap::new(),
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let router = Arc::clone(&router);
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("mock-executor".into())
                .spawn(move || serve(&router, &state, &stop))
                .context("spawn mock executor thread")?
        };
        Ok(Self {
            router,
            state,
            stop,
            thread: Some(thread),
        })
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().received.clone()
    }

    pub fn received_kinds(&self) -> Vec<PayloadKind> {
        self.state
            .lock()
            .received
            .iter()
            .filter_map(Received::kind)
            .collect()
    }

    /// Sessions created and not yet closed.
    pub fn open_sessions(&self) -> Vec<String> {
        self.state.lock().sessions.clone()
    }

    pub fn stored_tensor(&self, handle: u64) -> Option<TensorBlob> {
        self.state.lock().tensors.get(&handle).cloned()
    }

    /// Polls until `pred` holds over the received log or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[Received]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&self.state.lock().received) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL);
        }
    }

    /// Sends `payload` to `identity` under `seq`, as an unsolicited push.
    pub fn push(&self, identity: &str, seq: u64, payload: impl Into<Payload>) -> Result<()> {
        let payload = payload.into();
        let frames = reply_frames(seq, None, &payload, BodyMode::Normal)?;
        self.router
            .send_to(identity.as_bytes(), frames)
            .map_err(|err| anyhow!("push to {identity}: {err}"))
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("mock executor thread panicked");
            }
        }
    }
}

impl Drop for MockExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(router: &MemRouter, state: &Mutex<State>, stop: &AtomicBool) {
    info!("mock executor serving");
    let registry = TypeRegistry::builtin();
    while !stop.load(Ordering::Acquire) {
        match router.recv_timeout(POLL) {
            Ok(Some(message)) => {
                if let Err(err) = handle(router, state, &registry, message) {
                    warn!("mock executor: {err:#}");
                }
            }
            Ok(None) => {}
            Err(err) => {
                debug!("mock executor router closed: {err}");
                break;
            }
        }
    }
    info!("mock executor stopped");
}

#[derive(Clone, Copy)]
enum BodyMode {
    Normal,
    Omit,
    Corrupt,
}

fn reply_frames(seq: u64, session: Option<&str>, payload: &Payload, mode: BodyMode) -> Result<Multipart> {
    let envelope = Envelope::new(seq, payload.type_name(), EXECUTOR_IDENTITY).with_session(session);
    let mut frames: Multipart = smallvec![vec![], encode_envelope(&envelope)?];
    match mode {
        BodyMode::Normal => frames.push(payload.encode()?),
        BodyMode::Omit => {}
        BodyMode::Corrupt => frames.push(CORRUPT_BODY.to_vec()),
    }
    Ok(frames)
}

fn handle(
    router: &MemRouter,
    state: &Mutex<State>,
    registry: &TypeRegistry,
    message: RoutedMessage,
) -> Result<()> {
    let mut frames = message.frames.into_iter();
    frames
        .by_ref()
        .find(|frame| frame.is_empty())
        .context("no delimiter frame")?;
    let envelope = decode_envelope(&frames.next().context("no envelope frame")?)?;
    let payload = frames
        .next()
        .and_then(|body| registry.decode(&envelope.type_name, &body).ok());
    debug!(seq = envelope.seq, type_name = %envelope.type_name, "mock executor received");

    let identity = envelope.recv_identity.as_bytes().to_vec();
    let seq = envelope.seq;
    let session = envelope.session_id.clone();

    // Build every outbound message under the lock, send after releasing it.
    let outbound: Vec<(Vec<u8>, Multipart)> = {
        let mut state = state.lock();
        state.received.push(Received {
            peer: message.peer,
            envelope,
            payload: payload.clone(),
        });
        let Some(payload) = payload else {
            return Ok(());
        };
        let kind = payload.kind();
        if state.script.silent.contains(&kind) {
            return Ok(());
        }
        let mode = if state.script.omit_body.contains(&kind) {
            BodyMode::Omit
        } else if state.script.corrupt_body.contains(&kind) {
            BodyMode::Corrupt
        } else {
            BodyMode::Normal
        };
        respond(&mut state, &identity, seq, session.as_deref(), payload)?
            .into_iter()
            .map(|(to, reply_seq, reply, push)| {
                let mode = if push { BodyMode::Normal } else { mode };
                reply_frames(reply_seq, session.as_deref(), &reply, mode).map(|frames| (to, frames))
            })
            .collect::<Result<_>>()?
    };

    for (to, frames) in outbound {
        router
            .send_to(&to, frames)
            .map_err(|err| anyhow!("reply to seq {seq}: {err}"))?;
    }
    Ok(())
}

/// (destination, seq, payload, is_push)
type Outgoing = (Vec<u8>, u64, Payload, bool);

fn respond(
    state: &mut State,
    identity: &[u8],
    seq: u64,
    session: Option<&str>,
    payload: Payload,
) -> Result<Vec<Outgoing>> {
    let result = state.script.result_for(payload.kind());
    let reply = |body: Payload| vec![(identity.to_vec(), seq, body, false)];
    let out = match payload {
        Payload::AllocRequest(_) => {
            let addr_handle = state.next_handle;
            state.next_handle += 1;
            reply(AllocResponse { result, addr_handle }.into())
        }
        Payload::DeallocRequest(request) => {
            state.tensors.remove(&request.addr_handle);
            reply(DeallocResponse { result }.into())
        }
        Payload::CreateSessionRequest(_) => {
            let session_id = format!("session-{}", state.next_session);
            state.next_session += 1;
            if result.is_ok() {
                state.sessions.push(session_id.clone());
            }
            reply(CreateSessionResponse { result, session_id }.into())
        }
        Payload::CloseSessionRequest(request) => {
            state.sessions.retain(|open| *open != request.session_id);
            reply(CloseSessionResponse { result }.into())
        }
        Payload::FetchRequest(request) => {
            let tensors = request
                .tensors
                .into_iter()
                .map(|wanted| state.tensors.get(&wanted.handle).cloned().unwrap_or(wanted))
                .collect();
            reply(FetchResponse { result, tensors }.into())
        }
        Payload::PushRequest(request) => {
            for (target, data) in request.targets.iter().zip(request.data) {
                state.tensors.insert(
                    target.handle,
                    TensorBlob {
                        handle: target.handle,
                        ..data
                    },
                );
            }
            reply(PushResponse { result }.into())
        }
        Payload::CustomRequest(request) => reply(
            CustomResponse {
                result,
                type_name: request.type_name,
                extra: request.extra,
            }
            .into(),
        ),
        Payload::RunRequest(request) => {
            if state.script.rendez_keys.is_empty() {
                reply(
                    RunResponse {
                        result,
                        context: request.context,
                        rendez_sends: state.script.rendez_sends.clone(),
                    }
                    .into(),
                )
            } else {
                state.deferred.insert(
                    seq,
                    DeferredRun {
                        identity: identity.to_vec(),
                        session: session.map(str::to_owned),
                        context: request.context,
                    },
                );
                let push = RendezRecvRequest {
                    keys: state.script.rendez_keys.clone(),
                };
                vec![(identity.to_vec(), seq, push.into(), true)]
            }
        }
        Payload::RendezRecvUpdate(update) => finish_deferred(state, update),
        other => {
            warn!(type_name = other.type_name(), "mock executor ignoring message");
            Vec::new()
        }
    };
    Ok(out)
}

/// Completes a run that was waiting on host tensors. The returned context is
/// the original one followed by the data of every resolved tensor.
fn finish_deferred(state: &mut State, update: RendezRecvUpdate) -> Vec<Outgoing> {
    let Some(run) = state.deferred.remove(&update.forseq) else {
        warn!(forseq = update.forseq, "rendezvous update for unknown run");
        return Vec::new();
    };
    let mut context = run.context;
    for item in &update.items {
        context.extra.extend_from_slice(&item.tensor.data);
    }
    let result = state.script.result_for(PayloadKind::RunRequest);
    debug!(
        forseq = update.forseq,
        session = ?run.session,
        items = update.items.len(),
        "deferred run completed"
    );
    let response = RunResponse {
        result,
        context,
        rendez_sends: state.script.rendez_sends.clone(),
    };
    vec![(run.identity, update.forseq, response.into(), false)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::{read_multipart, Transport};
    use transport_codecs::{AllocRequest, RunRequest};

    fn exchange(transport: &MemTransport, identity: &str, seq: u64, request: Payload) -> Multipart {
        let mut source = transport.open_source(identity.as_bytes()).unwrap();
        let mut sink = transport.open_sink().unwrap();
        let envelope = encode_envelope(&Envelope::new(seq, request.type_name(), identity)).unwrap();
        let body = request.encode().unwrap();
        sink.send_multipart(&[&[], &envelope, &body]).unwrap();
        read_multipart(source.as_mut()).unwrap()
    }

    #[test]
    fn allocations_count_up_from_base() {
        let (transport, executor) = MockExecutor::pair(Script::new().alloc_base(0x100)).unwrap();
        for expected in [0x100, 0x101] {
            let frames = exchange(&transport, "alloc-peer", 3, AllocRequest { alignment: 8, num_bytes: 64 }.into());
            assert_eq!(frames.len(), 3);
            let envelope = decode_envelope(&frames[1]).unwrap();
            assert_eq!(envelope.seq, 3);
            let reply = TypeRegistry::builtin()
                .decode(&envelope.type_name, &frames[2])
                .unwrap();
            let Payload::AllocResponse(response) = reply else {
                panic!("unexpected reply {reply:?}");
            };
            assert_eq!(response.addr_handle, expected);
        }
        assert_eq!(
            executor.received_kinds(),
            vec![PayloadKind::AllocRequest, PayloadKind::AllocRequest]
        );
    }

    #[test]
    fn run_with_keys_pushes_request_under_same_seq() {
        let script = Script::new().rendez_keys(["a", "b"]);
        let (transport, _executor) = MockExecutor::pair(script).unwrap();
        let frames = exchange(&transport, "run-peer", 9, RunRequest::default().into());
        let envelope = decode_envelope(&frames[1]).unwrap();
        assert_eq!(envelope.seq, 9);
        assert_eq!(envelope.type_name, PayloadKind::RendezRecvRequest.type_name());
        let push = Payload::decode(PayloadKind::RendezRecvRequest, &frames[2]).unwrap();
        assert_eq!(
            push,
            Payload::RendezRecvRequest(RendezRecvRequest {
                keys: vec!["a".into(), "b".into()],
            })
        );
    }

    #[test]
    fn omitted_body_sends_header_only() {
        let script = Script::new().omit_body(PayloadKind::AllocRequest);
        let (transport, _executor) = MockExecutor::pair(script).unwrap();
        let frames = exchange(&transport, "bare-peer", 1, AllocRequest { alignment: 8, num_bytes: 64 }.into());
        assert_eq!(frames.len(), 2);
    }
}
