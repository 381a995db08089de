use std::sync::Arc;

use tracing::debug;

use rpc_dispatch::{ClientConfig, Notification, RpcClient, RpcError, RpcResult};
use transport::Transport;
use transport_codecs::{
    AllocRequest, AllocResponse, CloseSessionRequest, CloseSessionResponse, CreateSessionRequest,
    CreateSessionResponse, CustomRequest, CustomResponse, DeallocRequest, DeallocResponse,
    FetchRequest, FetchResponse, Message, Outcome, Payload, PushRequest, PushResponse, TensorBlob,
};

use crate::run;
use crate::{KernelSerializer, Rendezvous};

/// Opaque executor-side address returned by an allocation.
pub type AddrHandle = u64;

pub const LIST_DEVICES: &str = "executor.ListDevices";
pub const RESET: &str = "executor.Reset";
pub const EXTEND_SESSION: &str = "executor.ExtendSession";
pub const PARTIAL_RUN_SETUP: &str = "executor.PartialRunSetup";
pub const RUN_STEP: &str = "executor.RunStep";

/// Folds a non-zero result code into the error channel.
fn checked<R: Message + Outcome>(result: RpcResult<R>) -> RpcResult<R> {
    let response = result?;
    RpcError::check(response.result())?;
    Ok(response)
}

/// Client-facing executor operations built on one [`RpcClient`].
pub struct ExecClient {
    rpc: RpcClient,
}

impl ExecClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    pub fn connect<T: Transport>(config: ClientConfig, transport: T) -> RpcResult<Self> {
        RpcClient::connect(config, transport).map(Self::new)
    }

    /// Connects over ZeroMQ to `config.executor_addr`.
    #[cfg(feature = "zmq")]
    pub fn connect_zmq(config: ClientConfig) -> RpcResult<Self> {
        RpcClient::connect_zmq(config).map(Self::new)
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    fn call<R: Message + Outcome>(&self, session: Option<&str>, request: impl Into<Payload>) -> RpcResult<R> {
        checked(self.rpc.call_sync::<R>(session, request))
    }

    pub fn create_session(&self, request: CreateSessionRequest) -> RpcResult<String> {
        let response: CreateSessionResponse = self.call(None, request)?;
        debug!(session = %response.session_id, "session created");
        Ok(response.session_id)
    }

    pub fn close_session(&self, session_id: &str) -> RpcResult<()> {
        let _: CloseSessionResponse = self.call(
            Some(session_id),
            CloseSessionRequest {
                session_id: session_id.to_owned(),
            },
        )?;
        debug!(session = %session_id, "session closed");
        Ok(())
    }

    pub fn allocate(&self, alignment: u64, num_bytes: u64) -> RpcResult<AddrHandle> {
        let response: AllocResponse = self.call(
            None,
            AllocRequest {
                alignment,
                num_bytes,
            },
        )?;
        Ok(response.addr_handle)
    }

    pub fn deallocate(&self, addr_handle: AddrHandle) -> RpcResult<()> {
        let _: DeallocResponse = self.call(None, DeallocRequest { addr_handle })?;
        Ok(())
    }

    /// Copies the executor tensor described by `tensor` back to the host.
    pub fn fetch(&self, tensor: &TensorBlob) -> RpcResult<TensorBlob> {
        let response: FetchResponse = self.call(
            None,
            FetchRequest {
                library: self.rpc.config().library,
                tensors: vec![tensor.clone()],
            },
        )?;
        let count = response.tensors.len();
        let mut tensors = response.tensors.into_iter();
        match (tensors.next(), count) {
            (Some(fetched), 1) => Ok(fetched),
            _ => Err(RpcError::internal(format!(
                "fetch returned {count} tensors, expected 1"
            ))),
        }
    }

    /// Copies host `data` into the executor tensor `target`.
    pub fn push(&self, target: &TensorBlob, data: TensorBlob) -> RpcResult<()> {
        let _: PushResponse = self.call(
            None,
            PushRequest {
                library: self.rpc.config().library,
                targets: vec![target.clone()],
                data: vec![data],
            },
        )?;
        Ok(())
    }

    /// Sends an opaque request tunnelled under `type_name` and returns the
    /// opaque response body.
    pub fn custom_call(&self, session: Option<&str>, type_name: &str, extra: Vec<u8>) -> RpcResult<Vec<u8>> {
        let response: CustomResponse = self.call(
            session,
            CustomRequest {
                type_name: type_name.to_owned(),
                extra,
            },
        )?;
        Ok(response.extra)
    }

    pub fn list_devices(&self, extra: Vec<u8>) -> RpcResult<Vec<u8>> {
        self.custom_call(None, LIST_DEVICES, extra)
    }

    pub fn reset(&self, extra: Vec<u8>) -> RpcResult<Vec<u8>> {
        self.custom_call(None, RESET, extra)
    }

    pub fn extend_session(&self, session_id: &str, extra: Vec<u8>) -> RpcResult<Vec<u8>> {
        self.custom_call(Some(session_id), EXTEND_SESSION, extra)
    }

    pub fn partial_run_setup(&self, session_id: &str, extra: Vec<u8>) -> RpcResult<Vec<u8>> {
        self.custom_call(Some(session_id), PARTIAL_RUN_SETUP, extra)
    }

    pub fn run_step(&self, session_id: &str, extra: Vec<u8>) -> RpcResult<Vec<u8>> {
        self.custom_call(Some(session_id), RUN_STEP, extra)
    }

    /// Runs `kernel` on the executor and returns it with the response applied.
    ///
    /// Tensor requests pushed by the executor while the kernel runs are
    /// answered from `rendezvous`.
    pub fn run<K: KernelSerializer>(
        &self,
        session: Option<&str>,
        kernel: K,
        rendezvous: Arc<dyn Rendezvous>,
    ) -> RpcResult<K> {
        if self.rpc.on_receive_thread() {
            return Err(RpcError::internal(
                "blocking run from the receive thread would never complete",
            ));
        }
        let note = Arc::new(Notification::new());
        let signal = Arc::clone(&note);
        self.run_async(session, kernel, rendezvous, move |kernel, outcome| {
            signal.notify((kernel, outcome));
        })?;
        match note.wait() {
            Some((kernel, outcome)) => outcome.map(|()| kernel),
            None => Err(RpcError::internal("run completion lost")),
        }
    }

    /// Starts `kernel` on the executor. `done` runs exactly once with the
    /// kernel and the outcome, also when preparing or sending the request
    /// fails; that failure is returned as well.
    pub fn run_async<K, F>(
        &self,
        session: Option<&str>,
        kernel: K,
        rendezvous: Arc<dyn Rendezvous>,
        done: F,
    ) -> RpcResult<()>
    where
        K: KernelSerializer,
        F: FnOnce(K, RpcResult<()>) + Send + 'static,
    {
        run::start(&self.rpc, session, kernel, rendezvous, done)
    }

    pub fn shutdown(&self) {
        self.rpc.shutdown();
    }
}
