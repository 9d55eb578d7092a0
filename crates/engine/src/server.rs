//! Server engine: the event loop that accepts connections, scans the
//! filesystem, detects changes, feeds downloads, and fans out appends,
//! built as a single value owned by one async task with no hidden globals.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use regex::Regex;
use tokio::net::{TcpListener, TcpStream};

use wire::{Cmd, Decoded, Frame, Header, PacketKind, Status};

use crate::constants::{
    APPEND_WRITE_MARGIN, DOWNLOAD_WRITE_MARGIN, NETWORK_BLOCK, SESSION_BUFFER_CAPACITY,
    TICK_INTERVAL,
};
use crate::download::DownloadTable;
use crate::readiness::next_ready;
use crate::session::{Session, SessionId};
use crate::tracker::{AppendEvent, Tracker};

/// Lifetime counters reported when [`ServerEngine::run`] returns cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub bytes_sent: u64,
    pub backpressure_skips: u64,
}

/// The server's complete state: file tracker, live sessions, and in-flight
/// downloads. Owned exclusively by [`ServerEngine::run`]'s task.
pub struct ServerEngine {
    listener: TcpListener,
    tracker: Tracker,
    sessions: HashMap<SessionId, Session>,
    downloads: DownloadTable,
    next_session_id: SessionId,
    compress: bool,
    session_capacity: usize,
    total_bytes_sent: u64,
    total_backpressure_skips: u64,
    shutting_down: bool,
}

impl ServerEngine {
    /// Binds the listen socket and constructs the engine. Fatal if the bind
    /// fails, the regex is already known invalid by the caller, or the root
    /// doesn't exist.
    pub async fn bind(
        addr: SocketAddr,
        root: impl Into<PathBuf>,
        include: Regex,
        checksums_enabled: bool,
        compress: bool,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::with_listener(
            listener,
            root,
            include,
            checksums_enabled,
            compress,
        ))
    }

    /// Constructs the engine around an already-bound listener, used by
    /// tests that bind to an OS-assigned port ahead of time.
    #[must_use]
    pub fn with_listener(
        listener: TcpListener,
        root: impl Into<PathBuf>,
        include: Regex,
        checksums_enabled: bool,
        compress: bool,
    ) -> Self {
        Self::with_listener_and_session_capacity(
            listener,
            root,
            include,
            checksums_enabled,
            compress,
            SESSION_BUFFER_CAPACITY,
        )
    }

    /// Like [`ServerEngine::with_listener`], but with an explicit per-session
    /// buffer capacity instead of the production default. Exists for tests
    /// that need to exhaust a session's write buffer (back-pressure) without
    /// waiting for [`SESSION_BUFFER_CAPACITY`] (4 MiB) of unacknowledged
    /// data to accumulate.
    #[must_use]
    pub fn with_listener_and_session_capacity(
        listener: TcpListener,
        root: impl Into<PathBuf>,
        include: Regex,
        checksums_enabled: bool,
        compress: bool,
        session_capacity: usize,
    ) -> Self {
        Self {
            listener,
            tracker: Tracker::new(root, include, checksums_enabled),
            sessions: HashMap::new(),
            downloads: DownloadTable::new(),
            next_session_id: 0,
            compress,
            session_capacity,
            total_bytes_sent: 0,
            total_backpressure_skips: 0,
            shutting_down: false,
        }
    }

    #[must_use]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept/tick/readiness loop until `shutdown` resolves.
    ///
    /// Each iteration is one `tokio::select!` arm: listener accept, the
    /// 100 ms tick (stat queue, append scan, download service), or the
    /// single collapsed session-readiness wait.
    ///
    /// A shutdown signal doesn't cut connections immediately: new accepts
    /// and new `STREAM` requests stop, but in-flight downloads already
    /// queued keep receiving ticks until they drain, so a follower
    /// mid-catch-up sees a clean EOF rather than a reset. Returns the
    /// lifetime byte/back-pressure counters on a clean shutdown.
    pub async fn run(
        mut self,
        mut shutdown: impl Future<Output = ()> + Unpin,
    ) -> std::io::Result<ServerStats> {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                accepted = self.listener.accept(), if !self.shutting_down => {
                    match accepted {
                        Ok((socket, addr)) => self.on_accept(socket, addr),
                        Err(err) => tracing::warn!(error = %err, "accept failed"),
                    }
                }
                _ = interval.tick() => {
                    self.on_tick();
                }
                ready = next_ready(&self.sessions), if !self.sessions.is_empty() => {
                    if let Some((id, ready)) = ready {
                        self.service_session(id, ready);
                    }
                }
                () = &mut shutdown, if !self.shutting_down => {
                    tracing::info!(
                        sessions = self.sessions.len(),
                        downloads = self.downloads.len(),
                        "shutdown signal received, draining in-flight downloads"
                    );
                    self.shutting_down = true;
                }
            }

            if self.shutting_down && self.downloads.is_empty() {
                break;
            }
        }
        tracing::info!(
            bytes_sent = self.total_bytes_sent,
            backpressure_skips = self.total_backpressure_skips,
            "server engine stopped"
        );
        Ok(ServerStats {
            bytes_sent: self.total_bytes_sent,
            backpressure_skips: self.total_backpressure_skips,
        })
    }

    fn on_accept(&mut self, socket: TcpStream, addr: SocketAddr) {
        let id = self.next_session_id;
        self.next_session_id += 1;
        tracing::info!(session = id, peer = %addr, "accepted connection");
        let _ = socket.set_nodelay(true);
        self.sessions
            .insert(id, Session::with_capacity(id, socket, self.session_capacity));
    }

    /// Refreshes the tracker, polls the stat queue, scans for new data,
    /// services downloads, and pushes any dirty-list delta, once per tick.
    fn on_tick(&mut self) {
        self.tracker.refresh();
        self.tracker.process_stat_queue();

        let now = Instant::now();
        let events = {
            let Self {
                tracker, sessions, ..
            } = self;
            tracker.scan_new_data(now, |id, bytes| {
                sessions
                    .get(&id)
                    .is_some_and(|s| s.write_buf.space() >= bytes + APPEND_WRITE_MARGIN)
            })
        };
        for event in &events {
            self.apply_append_event(event);
        }

        self.service_downloads();
        self.broadcast_list_delta();
    }

    fn apply_append_event(&mut self, event: &AppendEvent) {
        let relative = self.tracker.relative_path(&event.path);

        if event.recipients.is_empty() {
            if !event.skipped.is_empty() {
                self.total_backpressure_skips += event.skipped.len() as u64;
                tracing::debug!(
                    path = %relative,
                    skipped = event.skipped.len(),
                    "round skipped for every subscriber, read_cursor held back (write buffer full)"
                );
            }
            return;
        }

        let (payload, gzip) = if self.compress {
            match compress::compress(&event.data) {
                Ok(compressed) => (compressed, true),
                Err(err) => {
                    tracing::error!(path = %relative, error = %err, "block compression failed, dropping chunk");
                    return;
                }
            }
        } else {
            (event.data.clone(), false)
        };

        let header = Header::block(relative, event.offset as i64, payload.len(), gzip);
        let frame = wire::encode_frame(&header, &payload);
        for &session_id in &event.recipients {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.write_buf.add(&frame);
                self.total_bytes_sent += payload.len() as u64;
            }
        }
    }

    /// Services every in-flight download: one block per tick for sessions
    /// with enough write-buffer headroom, promoting to subscriber on EOF.
    fn service_downloads(&mut self) {
        let Self {
            downloads,
            sessions,
            tracker,
            compress,
            ..
        } = self;

        let mut finished: Vec<(SessionId, PathBuf, u64)> = Vec::new();
        let mut bytes_sent = 0u64;
        for download in downloads.iter_mut() {
            let Some(session) = sessions.get_mut(&download.session) else {
                continue;
            };
            if session.write_buf.space() < DOWNLOAD_WRITE_MARGIN {
                continue;
            }

            match tracker.read_at(&download.path, download.cursor, NETWORK_BLOCK) {
                Ok(bytes) if bytes.is_empty() => {
                    let at_eof = tracker
                        .size_of(&download.path)
                        .is_none_or(|size| download.cursor >= size);
                    if at_eof {
                        finished.push((download.session, download.path.clone(), download.cursor));
                    }
                }
                Ok(bytes) => {
                    let relative = tracker.relative_path(&download.path);
                    let bytes_read = bytes.len() as u64;
                    let (payload, gzip) = if *compress {
                        match compress::compress(&bytes) {
                            Ok(compressed) => (compressed, true),
                            Err(err) => {
                                tracing::error!(path = %relative, error = %err, "download block compression failed, dropping chunk");
                                continue;
                            }
                        }
                    } else {
                        (bytes, false)
                    };
                    let header =
                        Header::block(relative, download.cursor as i64, payload.len(), gzip);
                    bytes_sent += payload.len() as u64;
                    session.write_buf.add(&wire::encode_frame(&header, &payload));
                    download.cursor += bytes_read;
                }
                Err(err) => {
                    tracing::warn!(path = %download.path.display(), error = %err, "download read failed");
                }
            }
        }

        for (session_id, path, cursor) in finished {
            downloads.finish(session_id, &path);
            if let Some(session) = sessions.get_mut(&session_id) {
                let relative = tracker.relative_path(&path);
                let header = Header::stream_status(relative, Status::Complete);
                session.write_buf.add(&wire::encode_frame(&header, &[]));
            }
            tracker.promote_to_subscriber(&path, session_id, cursor);
        }
        self.total_bytes_sent += bytes_sent;
    }

    fn broadcast_list_delta(&mut self) {
        if !self.tracker.list_dirty() {
            return;
        }
        let list = self.tracker.generate_list(true);
        let payload = wire::list::encode(&list);
        let header = Header::list_response(PacketKind::ListPartial, payload.len());
        let frame = wire::encode_frame(&header, &payload);
        for session in self.sessions.values_mut() {
            session.write_buf.add(&frame);
        }
    }

    fn service_session(&mut self, id: SessionId, ready: std::io::Result<tokio::io::Ready>) {
        let ready = match ready {
            Ok(ready) => ready,
            Err(err) => {
                tracing::info!(session = id, error = %err, "session readiness wait failed");
                self.teardown_session(id);
                return;
            }
        };

        let mut fatal = false;
        if ready.is_readable() {
            match self.sessions.get_mut(&id).map(Session::try_fill_read_buf) {
                Some(Ok(0)) => fatal = true,
                Some(Ok(_)) => {}
                Some(Err(_)) | None => fatal = true,
            }
        }
        if !fatal {
            self.process_requests(id);
        }
        if !fatal && ready.is_writable() {
            if let Some(session) = self.sessions.get_mut(&id) {
                if session.try_flush_write_buf().is_err() {
                    fatal = true;
                }
            }
        }
        if fatal {
            self.teardown_session(id);
        }
    }

    fn process_requests(&mut self, id: SessionId) {
        loop {
            let frame = {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                match wire::decode_frame(&mut session.read_buf) {
                    Decoded::Incomplete => break,
                    Decoded::Invalid(err) => {
                        tracing::error!(session = id, error = %err, "dropping malformed request");
                        session.write_buf.add(&wire::encode_frame(
                            &Header::unknown(b"bad request".len()),
                            b"bad request",
                        ));
                        continue;
                    }
                    Decoded::Frame(frame) => frame,
                }
            };
            self.handle_request(id, frame);
        }
    }

    fn handle_request(&mut self, id: SessionId, frame: Frame) {
        match frame.header.cmd {
            Some(Cmd::List) => {
                let list = self.tracker.generate_list(false);
                let payload = wire::list::encode(&list);
                let header = Header::list_response(PacketKind::List, payload.len());
                self.send(id, &header, &payload);
            }
            Some(Cmd::Stream) => self.handle_stream(id, &frame),
            Some(Cmd::Block) => {
                // Reserved, unimplemented; answered the same way as an
                // unparseable request rather than dropped silently.
                self.send(id, &Header::stream_fail(), &[]);
            }
            None => {
                self.send(
                    id,
                    &Header::unknown(b"unrecognized request".len()),
                    b"unrecognized request",
                );
            }
        }
    }

    fn handle_stream(&mut self, id: SessionId, frame: &Frame) {
        let Some(file) = frame.header.file.clone() else {
            self.send(id, &Header::stream_fail(), &[]);
            return;
        };
        if self.shutting_down {
            self.send(id, &Header::stream_status(file, Status::Fail), &[]);
            return;
        }
        let Some(path) = self.tracker.is_tracked(&file) else {
            self.send(id, &Header::stream_status(file, Status::Fail), &[]);
            return;
        };
        let cursor = frame.header.offset.unwrap_or(0).max(0) as u64;
        self.downloads.start(id, path, cursor);
        self.send(id, &Header::stream_status(file, Status::InProgress), &[]);
    }

    fn send(&mut self, id: SessionId, header: &Header, payload: &[u8]) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.write_buf.add(&wire::encode_frame(header, payload));
        }
    }

    fn teardown_session(&mut self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            tracing::info!(session = id, "session closed");
        }
        self.tracker.remove_session_everywhere(id);
        self.downloads.remove_session(id);
    }
}
