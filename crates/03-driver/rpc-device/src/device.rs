use std::sync::Arc;

use tracing::{error, info};

use rpc_dispatch::RpcResult;
use transport_codecs::{CreateSessionRequest, TensorBlob};

use crate::{ExecClient, KernelSerializer, RawAllocator, Rendezvous, RpcAllocator};

/// A compute device backed by one executor session.
///
/// The session is created on construction and closed when the device drops.
pub struct RpcDevice {
    name: String,
    client: Arc<ExecClient>,
    allocator: RpcAllocator,
    session_id: String,
}

impl RpcDevice {
    pub fn new(name: impl Into<String>, client: Arc<ExecClient>, session: CreateSessionRequest) -> RpcResult<Self> {
        let name = name.into();
        let session_id = client.create_session(session)?;
        info!(device = %name, session = %session_id, "device session opened");
        Ok(Self {
            name,
            allocator: RpcAllocator::new(Arc::clone(&client)),
            client,
            session_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn client(&self) -> &Arc<ExecClient> {
        &self.client
    }

    pub fn allocator(&self) -> &dyn RawAllocator {
        &self.allocator
    }

    /// Runs `kernel` in this device's session and waits for it.
    pub fn compute<K: KernelSerializer>(&self, kernel: K, rendezvous: Arc<dyn Rendezvous>) -> RpcResult<K> {
        self.client.run(Some(&self.session_id), kernel, rendezvous)
    }

    pub fn compute_async<K, F>(&self, kernel: K, rendezvous: Arc<dyn Rendezvous>, done: F) -> RpcResult<()>
    where
        K: KernelSerializer,
        F: FnOnce(K, RpcResult<()>) + Send + 'static,
    {
        self.client
            .run_async(Some(&self.session_id), kernel, rendezvous, done)
    }

    pub fn copy_to_host(&self, tensor: &TensorBlob) -> RpcResult<TensorBlob> {
        self.client.fetch(tensor)
    }

    pub fn copy_from_host(&self, target: &TensorBlob, data: TensorBlob) -> RpcResult<()> {
        self.client.push(target, data)
    }
}

impl Drop for RpcDevice {
    fn drop(&mut self) {
        match self.client.close_session(&self.session_id) {
            Ok(()) => info!(device = %self.name, session = %self.session_id, "device session closed"),
            Err(err) => error!(
                device = %self.name,
                session = %self.session_id,
                "failed to close session: {err}"
            ),
        }
    }
}
