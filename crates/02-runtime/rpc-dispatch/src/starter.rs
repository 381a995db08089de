use std::sync::Arc;

use tracing::{debug, warn};

use transport_codecs::Message;

use crate::client::{into_message, Shared};
use crate::pending::{Reply, TypedCallback};
use crate::{RpcError, RpcResult};

/// A prepared call that has not been sent yet.
///
/// Typed callbacks can be attached with [`CallStarter::add`] before the call
/// goes out, so a push that races the send still finds its handler. The call
/// is sent by [`CallStarter::start`], or when the starter is dropped.
pub struct CallStarter {
    shared: Arc<Shared>,
    seq: u64,
    type_name: &'static str,
    envelope: Vec<u8>,
    body: Vec<u8>,
    started: bool,
}

impl CallStarter {
    pub(crate) fn new(
        shared: Arc<Shared>,
        seq: u64,
        type_name: &'static str,
        envelope: Vec<u8>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            shared,
            seq,
            type_name,
            envelope,
            body,
            started: false,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Registers `callback` for inbound messages named `type_name` under this
    /// call's sequence number. Creates the pending entry if the call had none.
    pub fn add(&mut self, type_name: impl Into<String>, callback: TypedCallback) -> RpcResult<()> {
        if self.started {
            return Err(RpcError::internal(format!(
                "seq {} already started; typed callbacks must be added first",
                self.seq
            )));
        }
        self.shared
            .pending
            .add_typed(self.seq, type_name.into(), callback);
        Ok(())
    }

    /// Typed form of [`CallStarter::add`] for a known message type.
    pub fn on<M, F>(&mut self, handler: F) -> RpcResult<()>
    where
        M: Message,
        F: Fn(RpcResult<M>) + Send + Sync + 'static,
    {
        let seq = self.seq;
        let callback: TypedCallback = Arc::new(move |result: RpcResult<Reply>| {
            handler(result.and_then(|reply| into_message::<M>(seq, reply)))
        });
        self.add(M::type_name(), callback)
    }

    /// Sends the call. Later calls are no-ops.
    ///
    /// On failure the pending entry is removed and its callbacks cancelled.
    pub fn start(&mut self) -> RpcResult<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        let envelope = std::mem::take(&mut self.envelope);
        let body = std::mem::take(&mut self.body);
        match self
            .shared
            .send(self.seq, self.type_name, &envelope, &body)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                self.shared.pending.erase_with_cancellation(self.seq);
                Err(err)
            }
        }
    }
}

impl Drop for CallStarter {
    fn drop(&mut self) {
        if self.started {
            return;
        }
        match self.start() {
            Ok(()) => debug!(seq = self.seq, "call started on drop"),
            Err(err) => warn!(seq = self.seq, "call failed to start on drop: {err}"),
        }
    }
}
