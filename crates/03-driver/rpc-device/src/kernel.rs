use rpc_dispatch::RpcResult;
use transport_codecs::{ContextDef, KernelDef};

/// Host-side kernel invocation that can be shipped to the executor.
///
/// The implementor turns its local kernel and execution context into opaque
/// blobs and later folds the executor's updated context back into local
/// outputs.
pub trait KernelSerializer: Send + 'static {
    fn serialize_kernel(&self) -> RpcResult<KernelDef>;

    fn serialize_context(&self) -> RpcResult<ContextDef>;

    /// Applies the context returned by a successful run.
    fn apply_response(&mut self, context: &ContextDef) -> RpcResult<()>;
}
