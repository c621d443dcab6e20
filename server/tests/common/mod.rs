//! Test harness: a real server on an ephemeral loopback port backed by a
//! freshly generated PKI.

#![allow(dead_code)]

use std::{
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use mtls_echo_client::TlsClient;
use mtls_echo_common::{testing::TestPki, ClientSettings, EndpointIdentity, Result, ServerSettings};
use mtls_echo_server::TlsServer;

pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub server: TlsServer,
    pub pki:    TestPki,
    pub port:   u16,
    finished:   Option<mpsc::Receiver<Result<()>>>,
}

impl TestServer {
    /// Server trusting the PKI's regular client certificate.
    pub fn start() -> Self {
        let pki = TestPki::generate();
        let identity = pki.server_identity();
        Self::start_with(pki, identity)
    }

    pub fn start_with(pki: TestPki, identity: EndpointIdentity) -> Self {
        Self::start_configured(pki, identity, |settings| settings)
    }

    /// Like [`start_with`](Self::start_with), with a hook to adjust the
    /// loopback settings before the server is built.
    pub fn start_configured(
        pki: TestPki,
        identity: EndpointIdentity,
        configure: impl FnOnce(ServerSettings) -> ServerSettings,
    ) -> Self {
        let settings = configure(ServerSettings::default().with_host("127.0.0.1").with_port(0));
        let server = TlsServer::new(settings, &identity).expect("build server");
        let listener = server.bind().expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();

        let (tx, rx) = mpsc::channel();
        let runner = server.clone();
        thread::spawn(move || {
            let _ = tx.send(runner.serve(listener));
        });
        assert!(wait_until(|| server.is_running()), "server never started");

        Self {
            server,
            pki,
            port,
            finished: Some(rx),
        }
    }

    pub fn client_with(&self, identity: &EndpointIdentity) -> TlsClient {
        let settings = ClientSettings::default()
            .with_host("localhost")
            .with_port(self.port);
        TlsClient::new(settings, identity).expect("build client")
    }

    pub fn client(&self) -> TlsClient {
        self.client_with(&self.pki.client_identity())
    }

    /// Connected client that has completed one exchange, so its handler is
    /// known to be registered.
    pub fn connected_client(&self) -> TlsClient {
        let mut client = self.client();
        assert!(client.connect(), "client failed to connect");
        assert_eq!(client.send("ready").as_deref(), Some("READY"));
        client
    }

    /// Stop the server and wait for its accept loop to return.
    pub fn shutdown(&mut self) -> Result<()> {
        self.server.stop();
        let finished = self.finished.take().expect("server already shut down");
        finished
            .recv_timeout(SHUTDOWN_DEADLINE)
            .expect("accept loop did not exit in time")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.stop();
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SHUTDOWN_DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
