use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use mock_executor::Script;

use rpc_device::RpcDevice;
use rpc_dispatch::{RpcError, RpcResult};
use transport::{Transport, TransportError};
use transport_codecs::{AllocRequest, AllocResponse, CreateSessionRequest, PayloadKind};

use crate::support::world;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn shutdown_cancels_blocked_callers() {
    let world = world(Script::new().silent(PayloadKind::AllocRequest));
    let client = Arc::clone(&world.client);
    let caller = thread::spawn(move || client.allocate(8, 8));

    assert!(world
        .executor
        .wait_for(WAIT, |received| !received.is_empty()));
    world.client.shutdown();

    let outcome = caller.join().expect("caller thread");
    assert_eq!(outcome, Err(RpcError::Cancelled));
    assert_eq!(world.client.rpc().pending_len(), 0);
    assert!(world.client.rpc().is_shut_down());
}

#[test]
fn calls_after_shutdown_are_refused() {
    let world = world(Script::new());
    world.client.shutdown();
    assert!(world.client.allocate(8, 8).is_err());
    assert!(world.executor.received().is_empty());
}

#[test]
fn transport_closed_underneath_fails_the_send() {
    let world = world(Script::new());
    world.transport.shutdown();

    let (tx, rx) = bounded(1);
    let result = world
        .client
        .rpc()
        .call_async::<AllocResponse, _>(
            None,
            AllocRequest {
                alignment: 8,
                num_bytes: 8,
            },
            move |result: RpcResult<AllocResponse>| {
                let _ = tx.send(result);
            },
        )
        .and_then(|mut starter| starter.start());

    assert_eq!(
        result,
        Err(RpcError::Transport(TransportError::Closed))
    );
    assert_eq!(rx.recv_timeout(WAIT).expect("callback"), Err(RpcError::Cancelled));
    assert_eq!(world.client.rpc().pending_len(), 0);
}

#[test]
fn timed_out_call_is_cancelled_at_shutdown() {
    let world = world(Script::new().silent(PayloadKind::AllocRequest));
    let rpc = world.client.rpc();
    let outcome = rpc.call_sync_timeout::<AllocResponse>(
        None,
        AllocRequest {
            alignment: 8,
            num_bytes: 8,
        },
        Duration::from_millis(50),
    );
    assert_eq!(outcome, Err(RpcError::Timeout));
    assert_eq!(rpc.pending_len(), 1);
    assert_eq!(rpc.dump_pending().len(), 1);

    world.client.shutdown();
    assert_eq!(rpc.pending_len(), 0);
}

#[test]
fn device_lifecycle_opens_and_closes_session() {
    let world = world(Script::new());
    let device = RpcDevice::new("rpc:1", Arc::clone(&world.client), CreateSessionRequest::default())
        .expect("device");
    assert_eq!(world.executor.open_sessions(), vec![device.session_id().to_string()]);
    drop(device);
    assert!(world.executor.open_sessions().is_empty());
    let kinds = world.executor.received_kinds();
    assert_eq!(
        kinds,
        vec![
            PayloadKind::CreateSessionRequest,
            PayloadKind::CloseSessionRequest
        ]
    );
}
