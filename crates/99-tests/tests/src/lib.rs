//! End-to-end suite: the executor client against the scripted executor.

#[cfg(test)]
mod native_e2e;

#[cfg(test)]
mod shutdown_e2e;

#[cfg(test)]
pub(crate) mod support {
    use std::sync::Arc;

    use mock_executor::{MockExecutor, Script};
    use rpc_device::ExecClient;
    use rpc_dispatch::ClientConfig;
    use transport::MemTransport;

    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    pub struct World {
        pub client: Arc<ExecClient>,
        pub executor: MockExecutor,
        /// Second handle on the client's transport, for closing it underneath.
        pub transport: MemTransport,
    }

    pub fn world(script: Script) -> World {
        init_tracing();
        let (transport, executor) = MockExecutor::pair(script).expect("mock executor");
        let config = ClientConfig::default().with_identity_prefix("e2e::recv::");
        let client = ExecClient::connect(config, transport.clone()).expect("connect");
        World {
            client: Arc::new(client),
            executor,
            transport,
        }
    }
}
