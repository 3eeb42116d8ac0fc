#![allow(dead_code)]

use tokio::runtime::Runtime;
use wiremock::{Mock, MockServer};

pub struct MockHost {
    server: Option<MockServer>,
    runtime: Runtime,
}

impl MockHost {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime");
        let server = runtime.block_on(MockServer::start());
        Self {
            server: Some(server),
            runtime,
        }
    }

    fn server(&self) -> &MockServer {
        self.server.as_ref().expect("server is running")
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(self.server()));
    }

    pub fn uri(&self) -> String {
        self.server().uri()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.uri(), path)
    }

    pub fn authority(&self) -> String {
        self.server().address().to_string()
    }

    pub fn received(&self) -> Vec<wiremock::Request> {
        self.runtime
            .block_on(self.server().received_requests())
            .unwrap_or_default()
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        // Expectations are verified when the server drops.
        let _guard = self.runtime.enter();
        drop(self.server.take());
    }
}
