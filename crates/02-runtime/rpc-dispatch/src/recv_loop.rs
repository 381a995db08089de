//! Receive loop: one thread reads whole multipart messages and dispatches
//! them to pending calls by sequence number.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use transport::{read_multipart, FrameSource, Multipart, TransportError};
use transport_codecs::{decode_envelope, Envelope, Payload, PayloadKind, TypeRegistry};

use crate::client::Shared;
use crate::pending::Dispatch;
use crate::{RpcError, RpcResult};

/// Envelope and optional body left after routing frames are stripped.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Inbound {
    pub(crate) envelope: Vec<u8>,
    pub(crate) body: Option<Vec<u8>>,
}

/// Drops frames up to and including the first empty delimiter. The next
/// frame is the envelope and the one after it, if any, the body.
pub(crate) fn split_frames(frames: Multipart) -> Option<Inbound> {
    let mut frames = frames.into_iter();
    frames.by_ref().find(|frame| frame.is_empty())?;
    let envelope = frames.next()?;
    let body = frames.next();
    let extra = frames.count();
    if extra > 0 {
        warn!(extra, "ignoring trailing frames");
    }
    Some(Inbound { envelope, body })
}

pub(crate) fn run(shared: Arc<Shared>, mut source: Box<dyn FrameSource>, registry: TypeRegistry) {
    info!(identity = %shared.recv_identity, "receive loop started");
    loop {
        if shared.config.trace_pending {
            shared.trace_pending();
        }
        let frames = match read_multipart(source.as_mut()) {
            Ok(frames) => frames,
            Err(TransportError::Closed) => break,
            Err(err) => {
                error!("receive failed: {err}");
                continue;
            }
        };
        dispatch(&shared, &registry, frames);
    }
    info!(identity = %shared.recv_identity, "receive loop exited");
}

fn dispatch(shared: &Shared, registry: &TypeRegistry, frames: Multipart) {
    let Some(inbound) = split_frames(frames) else {
        error!("dropping message with no envelope after routing frames");
        return;
    };
    let envelope = match decode_envelope(&inbound.envelope) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!("dropping message with unreadable envelope: {err}");
            return;
        }
    };
    let seq = envelope.seq;
    debug!(seq, type_name = %envelope.type_name, "received");

    match shared.pending.take_for(seq, &envelope.type_name) {
        Dispatch::NotFound => {
            error!(seq, type_name = %envelope.type_name, "no pending call for sequence");
        }
        Dispatch::NoCallback => {
            warn!(seq, type_name = %envelope.type_name, "pending call has no callback for message");
        }
        Dispatch::Typed(callback) => {
            let result = match registry.lookup(&envelope.type_name) {
                Some(kind) => decode_body(&envelope, kind, inbound.body.as_deref()).map(Some),
                None => Err(RpcError::UnknownType(envelope.type_name.clone())),
            };
            invoke(seq, move || callback(result));
        }
        Dispatch::Terminal {
            done,
            reply,
            retired,
        } => {
            let result = match reply {
                Some(kind) => decode_body(&envelope, kind, inbound.body.as_deref()).map(Some),
                None => Ok(None),
            };
            invoke(seq, move || done(result));
            invoke(seq, move || drop(retired));
        }
    }
}

fn decode_body(envelope: &Envelope, kind: PayloadKind, body: Option<&[u8]>) -> RpcResult<Payload> {
    let body = body.ok_or_else(|| RpcError::NoBody {
        seq: envelope.seq,
        type_name: envelope.type_name.clone(),
    })?;
    Payload::decode(kind, body).map_err(|err| RpcError::MalformedBody {
        seq: envelope.seq,
        type_name: kind.type_name().to_owned(),
        reason: err.to_string(),
    })
}

fn invoke(seq: u64, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!(seq, "callback panicked");
    }
}
