//! Remote kernel execution with rendezvous push handling.
//!
//! While a kernel runs, the executor may push `RendezRecvRequest`s under the
//! run's sequence number. The push handler runs on the receive thread, so it
//! only enqueues work: the follow-up worker resolves the keys against the
//! local rendezvous, and once every key has resolved the answer is enqueued
//! again and sent as a `RendezRecvUpdate` under the same sequence number.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use rpc_dispatch::{ClientHandle, RpcClient, RpcError, RpcResult};
use transport_codecs::{
    RendezItem, RendezRecvRequest, RendezRecvUpdate, ResultCode, RunRequest, RunResponse,
    TensorBlob,
};

use crate::{KernelSerializer, RendezValue, Rendezvous};

/// Result code reported for a key the local rendezvous failed to produce.
const RENDEZ_FAILED: i32 = -1;

pub(crate) fn start<K, F>(
    rpc: &RpcClient,
    session: Option<&str>,
    kernel: K,
    rendezvous: Arc<dyn Rendezvous>,
    done: F,
) -> RpcResult<()>
where
    K: KernelSerializer,
    F: FnOnce(K, RpcResult<()>) + Send + 'static,
{
    let request = match serialize(&kernel) {
        Ok(request) => request,
        Err(err) => {
            done(kernel, Err(err.clone()));
            return Err(err);
        }
    };

    // Shared with the reply callback so a failed registration can still
    // hand the kernel back.
    let slot = Arc::new(Mutex::new(Some((kernel, done))));
    let reply_slot = Arc::clone(&slot);
    let reply_rendezvous = Arc::clone(&rendezvous);
    let registered = rpc.call_async::<RunResponse, _>(session, request, move |result| {
        let taken = reply_slot.lock().take();
        if let Some((mut kernel, done)) = taken {
            let outcome = result
                .and_then(|response| finish(&mut kernel, reply_rendezvous.as_ref(), response));
            done(kernel, outcome);
        }
    });
    let mut starter = match registered {
        Ok(starter) => starter,
        Err(err) => {
            let taken = slot.lock().take();
            if let Some((kernel, done)) = taken {
                done(kernel, Err(err.clone()));
            }
            return Err(err);
        }
    };

    let context = PushContext {
        handle: rpc.handle(),
        rendezvous,
        seq: starter.seq(),
        session: session.map(str::to_owned),
    };
    starter.on::<RendezRecvRequest, _>(move |push| context.on_push(push))?;
    starter.start()
}

fn serialize<K: KernelSerializer>(kernel: &K) -> RpcResult<RunRequest> {
    Ok(RunRequest {
        kernel: kernel.serialize_kernel()?,
        context: kernel.serialize_context()?,
    })
}

/// Delivers kernel outputs and applies the returned context.
fn finish<K: KernelSerializer>(
    kernel: &mut K,
    rendezvous: &dyn Rendezvous,
    response: RunResponse,
) -> RpcResult<()> {
    RpcError::check(&response.result)?;
    for item in response.rendez_sends {
        RpcError::check(&item.result)?;
        rendezvous.send(
            &item.key,
            RendezValue {
                tensor: item.tensor,
                is_dead: item.is_dead,
            },
        )?;
    }
    kernel.apply_response(&response.context)
}

struct PushContext {
    handle: ClientHandle,
    rendezvous: Arc<dyn Rendezvous>,
    seq: u64,
    session: Option<String>,
}

impl PushContext {
    fn on_push(&self, push: RpcResult<RendezRecvRequest>) {
        let request = match push {
            Ok(request) => request,
            Err(err) if err.is_cancelled() => {
                debug!(seq = self.seq, "rendezvous handler retired");
                return;
            }
            Err(err) => {
                error!(seq = self.seq, "bad rendezvous request: {err}");
                return;
            }
        };
        debug!(seq = self.seq, keys = request.keys.len(), "rendezvous request");
        let gather = Gather::new(
            self.handle.clone(),
            self.seq,
            self.session.clone(),
            request.keys.len(),
        );
        let rendezvous = Arc::clone(&self.rendezvous);
        let job = move || gather.resolve(rendezvous.as_ref(), request.keys);
        if let Err(err) = self.handle.submit_followup(job) {
            error!(seq = self.seq, "dropping rendezvous request: {err}");
        }
    }
}

/// Collects the values for one push and answers once all have arrived.
struct Gather {
    handle: ClientHandle,
    seq: u64,
    session: Option<String>,
    items: Mutex<Vec<Option<RendezItem>>>,
    remaining: AtomicUsize,
}

impl Gather {
    fn new(handle: ClientHandle, seq: u64, session: Option<String>, count: usize) -> Arc<Self> {
        Arc::new(Self {
            handle,
            seq,
            session,
            items: Mutex::new(vec![None; count]),
            remaining: AtomicUsize::new(count),
        })
    }

    fn resolve(self: Arc<Self>, rendezvous: &dyn Rendezvous, keys: Vec<String>) {
        if keys.is_empty() {
            self.reply();
            return;
        }
        for (index, key) in keys.into_iter().enumerate() {
            let gather = Arc::clone(&self);
            let lookup = key.clone();
            rendezvous.recv_async(
                &lookup,
                Box::new(move |value: RpcResult<RendezValue>| {
                    gather.complete(index, key, value)
                }),
            );
        }
    }

    fn complete(&self, index: usize, key: String, value: RpcResult<RendezValue>) {
        let item = match value {
            Ok(value) => RendezItem {
                key,
                tensor: value.tensor,
                is_dead: value.is_dead,
                result: ResultCode::ok(),
            },
            Err(err) => {
                warn!(seq = self.seq, key = %key, "rendezvous receive failed: {err}");
                RendezItem {
                    key,
                    tensor: TensorBlob::default(),
                    is_dead: false,
                    result: ResultCode::error(RENDEZ_FAILED, err.to_string()),
                }
            }
        };
        if let Some(slot) = self.items.lock().get_mut(index) {
            *slot = Some(item);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.reply();
        }
    }

    /// Enqueues the answer. Resolution may finish on any thread, so the send
    /// itself always happens on the follow-up worker.
    fn reply(&self) {
        let items: Vec<RendezItem> = self.items.lock().drain(..).flatten().collect();
        let update = RendezRecvUpdate {
            forseq: self.seq,
            items,
        };
        let handle = self.handle.clone();
        let seq = self.seq;
        let session = self.session.clone();
        let job = move || {
            if let Err(err) = handle.send_correlated(seq, session.as_deref(), update) {
                error!(seq, "failed to answer rendezvous request: {err}");
            }
        };
        if let Err(err) = self.handle.submit_followup(job) {
            error!(seq = self.seq, "dropping rendezvous answer: {err}");
        }
    }
}
