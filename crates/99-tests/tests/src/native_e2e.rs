use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use mock_executor::Script;
use parking_lot::Mutex;

use rpc_device::{KernelSerializer, LocalRendezvous, RendezValue, Rendezvous};
use rpc_dispatch::{RpcError, RpcResult};
use transport_codecs::{
    AllocRequest, AllocResponse, ContextDef, KernelDef, Payload, PayloadKind, TensorBlob,
};

use crate::support::world;

const WAIT: Duration = Duration::from_secs(5);

struct RecordingKernel {
    context: Vec<u8>,
    applied: Arc<Mutex<Option<Vec<u8>>>>,
}

impl KernelSerializer for RecordingKernel {
    fn serialize_kernel(&self) -> RpcResult<KernelDef> {
        Ok(KernelDef {
            id: "matmul".into(),
            ..KernelDef::default()
        })
    }

    fn serialize_context(&self) -> RpcResult<ContextDef> {
        Ok(ContextDef {
            extra: self.context.clone(),
        })
    }

    fn apply_response(&mut self, context: &ContextDef) -> RpcResult<()> {
        *self.applied.lock() = Some(context.extra.clone());
        Ok(())
    }
}

#[test]
fn allocation_returns_executor_handle() {
    let world = world(Script::new());
    let handle = world.client.allocate(64, 4096).expect("allocate");
    assert_eq!(handle, 0xABCD);
    assert_eq!(world.client.rpc().pending_len(), 0);

    let received = world.executor.received();
    assert_eq!(received.len(), 1);
    let identity = &received[0].envelope.recv_identity;
    assert!(identity.starts_with("e2e::recv::"));
    assert_eq!(identity.len(), "e2e::recv::".len() + 6);
    assert_eq!(
        received[0].payload,
        Some(Payload::AllocRequest(AllocRequest {
            alignment: 64,
            num_bytes: 4096
        }))
    );
}

#[test]
fn run_with_rendezvous_push_answers_once_then_retires() {
    let world = world(Script::new().rendez_keys(["weights"]));
    let local = Arc::new(LocalRendezvous::new());
    local
        .send(
            "weights",
            RendezValue {
                tensor: TensorBlob {
                    data: vec![0xAA, 0xBB],
                    ..TensorBlob::default()
                },
                is_dead: false,
            },
        )
        .expect("publish");

    let applied = Arc::new(Mutex::new(None));
    let kernel = RecordingKernel {
        context: b"ctx".to_vec(),
        applied: Arc::clone(&applied),
    };
    let (tx, rx) = bounded(1);
    world
        .client
        .run_async(None, kernel, local, move |_kernel, outcome| {
            let _ = tx.send(outcome);
        })
        .expect("start run");

    rx.recv_timeout(WAIT).expect("run completes").expect("run succeeds");
    assert_eq!(
        applied.lock().as_deref(),
        Some(&[b'c', b't', b'x', 0xAA, 0xBB][..])
    );

    let received = world.executor.received();
    let kinds: Vec<_> = received.iter().filter_map(|message| message.kind()).collect();
    assert_eq!(kinds, vec![PayloadKind::RunRequest, PayloadKind::RendezRecvUpdate]);
    assert_eq!(received[0].envelope.seq, received[1].envelope.seq);
    assert_eq!(world.client.rpc().pending_len(), 0);
}

#[test]
fn executor_failure_surfaces_code_and_message() {
    let world = world(Script::new().fail(PayloadKind::AllocRequest, 12, "allocator exhausted"));
    match world.client.allocate(8, 8) {
        Err(RpcError::Aborted { code, message }) => {
            assert_eq!(code, 12);
            assert_eq!(message, "allocator exhausted");
        }
        other => panic!("expected an aborted call, got {other:?}"),
    }
}

#[test]
fn concurrent_callers_receive_their_own_replies() {
    let world = world(Script::new());
    let rpc = world.client.rpc();
    let handles: Vec<u64> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    rpc.call_sync::<AllocResponse>(
                        None,
                        AllocRequest {
                            alignment: 8,
                            num_bytes: 8,
                        },
                    )
                    .expect("alloc")
                    .addr_handle
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("caller thread"))
            .collect()
    });
    let unique: HashSet<_> = handles.iter().copied().collect();
    assert_eq!(unique.len(), handles.len());

    let seqs: HashSet<_> = world
        .executor
        .received()
        .iter()
        .map(|message| message.envelope.seq)
        .collect();
    assert_eq!(seqs.len(), 8);
}

#[test]
fn header_only_reply_is_reported_as_missing_body() {
    let world = world(Script::new().omit_body(PayloadKind::AllocRequest));
    let err = world.client.allocate(8, 8).unwrap_err();
    assert!(matches!(err, RpcError::NoBody { .. }), "{err:?}");
}

#[test]
fn corrupt_reply_is_reported_as_malformed() {
    let world = world(Script::new().corrupt_body(PayloadKind::DeallocRequest));
    let err = world.client.deallocate(1).unwrap_err();
    assert!(matches!(err, RpcError::MalformedBody { .. }), "{err:?}");
    assert_eq!(world.client.rpc().pending_len(), 0);
}
