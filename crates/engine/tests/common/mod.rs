//! Shared harness for end-to-end convergence tests: spins up an in-process
//! `ServerEngine` and `ClientEngine` pair over a loopback socket and polls
//! for convergence instead of sleeping a fixed duration.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use engine::{ClientEngine, ServerEngine, ServerStats, SourceConfig};
use resume::ResumeStore;

pub struct Harness {
    pub source_dir: tempfile::TempDir,
    pub client_dir: tempfile::TempDir,
    addr: std::net::SocketAddr,
    checksums: bool,
    compress: bool,
    server_shutdown: Option<oneshot::Sender<()>>,
    client_shutdown: Option<oneshot::Sender<()>>,
    server_task: JoinHandle<std::io::Result<ServerStats>>,
    client_task: JoinHandle<std::io::Result<()>>,
}

pub const SOURCE_NAME: &str = "src";

impl Harness {
    pub async fn start(checksums: bool, compress: bool) -> Self {
        let source_dir = tempfile::tempdir().unwrap();
        let client_dir = tempfile::tempdir().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self::start_at(source_dir, client_dir, listener, addr, checksums, compress).await
    }

    async fn start_at(
        source_dir: tempfile::TempDir,
        client_dir: tempfile::TempDir,
        listener: TcpListener,
        addr: std::net::SocketAddr,
        checksums: bool,
        compress: bool,
    ) -> Self {
        let server = ServerEngine::with_listener(
            listener,
            source_dir.path(),
            Regex::new(".*").unwrap(),
            checksums,
            compress,
        );
        let (server_tx, server_rx) = oneshot::channel();
        let server_task = tokio::spawn(server.run(shutdown_future(server_rx)));

        let resume = ResumeStore::open(&client_dir.path().join("resume.redb")).unwrap();
        let client = ClientEngine::new(
            client_dir.path(),
            vec![SourceConfig {
                name: SOURCE_NAME.to_string(),
                addr,
            }],
            resume,
            false,
        )
        .unwrap();
        let (client_tx, client_rx) = oneshot::channel();
        let client_task = tokio::spawn(client.run(shutdown_future(client_rx)));

        Self {
            source_dir,
            client_dir,
            addr,
            checksums,
            compress,
            server_shutdown: Some(server_tx),
            client_shutdown: Some(client_tx),
            server_task,
            client_task,
        }
    }

    /// Rebinds a fresh listener on the same address and respawns the server
    /// task, leaving the client (and its reconnect loop) untouched. Used by
    /// the reconnect-resume scenario.
    pub async fn restart_server(&mut self) {
        let listener = TcpListener::bind(self.addr).await.unwrap();
        let server = ServerEngine::with_listener(
            listener,
            self.source_dir.path(),
            Regex::new(".*").unwrap(),
            self.checksums,
            self.compress,
        );
        let (server_tx, server_rx) = oneshot::channel();
        self.server_shutdown = Some(server_tx);
        self.server_task = tokio::spawn(server.run(shutdown_future(server_rx)));
    }

    pub fn mirror_path(&self, relative: &str) -> PathBuf {
        self.client_dir.path().join(SOURCE_NAME).join(relative)
    }

    /// Polls `cond` every 20 ms until it's true or `timeout` elapses.
    pub async fn wait_for(&self, timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cond() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Shuts the client down only, leaving the server running (used by the
    /// reconnect-resume scenario, which restarts the server on the same
    /// socket address).
    pub fn stop_client(&mut self) {
        if let Some(tx) = self.client_shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Shuts the server down only, returning its lifetime counters.
    pub async fn stop_server(&mut self) -> ServerStats {
        if let Some(tx) = self.server_shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.server_task).await.unwrap().unwrap()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.client_shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(tx) = self.server_shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.client_task.await;
        let _ = self.server_task.await;
    }
}

fn shutdown_future(rx: oneshot::Receiver<()>) -> impl Future<Output = ()> + Unpin {
    Box::pin(async move {
        let _ = rx.await;
    })
}
