//! Client engine: reconnect/list/stream convergence.
//!
//! The per-source state table is keyed exclusively by source name, never by
//! session id or address, so a disconnect can never tear down the wrong
//! source's state.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::net::TcpStream;

use resume::ResumeStore;
use wire::{Decoded, Frame, Header, PacketKind, Status};

use crate::constants::{
    MAX_CONCURRENT_DOWNLOADS, NETWORK_BLOCK, READ_LOW_WATER, RECONNECT_BACKOFF, TICK_INTERVAL,
};
use crate::mirror::{Mirror, MirrorEntry, StreamState};
use crate::readiness::next_ready;
use crate::session::{Session, SessionId};

/// One configured upstream source: a positional hostname after brace
/// expansion, resolved to a socket address by the caller.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub addr: SocketAddr,
}

struct SourceState {
    addr: SocketAddr,
    session: Option<SessionId>,
    next_reconnect_at: Instant,
    list_received_once: bool,
    mirror: Mirror,
}

/// The client's complete state: per-source connection/mirror tables and
/// live sessions. Owned exclusively by [`ClientEngine::run`]'s task.
pub struct ClientEngine {
    working_dir: PathBuf,
    sources: HashMap<String, SourceState>,
    sessions: HashMap<SessionId, Session>,
    next_session_id: SessionId,
    resume: ResumeStore,
    echo_stdout: bool,
}

impl ClientEngine {
    /// Enumerates each source's cached mirror subdirectory (if any) into its
    /// `Mirror`, without computing hashes.
    ///
    /// A path the resume store already has tombstoned is pruned here rather
    /// than carried forward: it means a previous run recorded the deletion
    /// but exited before (or while) removing the local file, so the leftover
    /// file is stale and is cleaned up before the engine starts taking
    /// requests.
    pub fn new(
        working_dir: impl Into<PathBuf>,
        configs: Vec<SourceConfig>,
        resume: ResumeStore,
        echo_stdout: bool,
    ) -> std::io::Result<Self> {
        let working_dir = working_dir.into();
        fs::create_dir_all(&working_dir)?;

        let mut sources = HashMap::new();
        for config in configs {
            let mirror_dir = working_dir.join(&config.name);
            let mut mirror = Mirror::new();
            if mirror_dir.is_dir() {
                for (path, entry) in scan_existing_mirror(&mirror_dir) {
                    match resume.is_tombstoned(&config.name, &path) {
                        Ok(true) => {
                            let stray = mirror_dir.join(&path);
                            if let Err(err) = fs::remove_file(&stray) {
                                if err.kind() != std::io::ErrorKind::NotFound {
                                    tracing::warn!(path = %stray.display(), error = %err, "failed to remove stale tombstoned mirror file");
                                }
                            } else {
                                tracing::info!(source = %config.name, path, "removed stray mirror file left by an earlier deletion");
                            }
                        }
                        Ok(false) => mirror.insert(path, entry),
                        Err(err) => {
                            tracing::warn!(source = %config.name, path, error = %err, "resume store lookup failed at startup, keeping local file");
                            mirror.insert(path, entry);
                        }
                    }
                }
            }
            sources.insert(
                config.name.clone(),
                SourceState {
                    addr: config.addr,
                    session: None,
                    next_reconnect_at: Instant::now(),
                    list_received_once: false,
                    mirror,
                },
            );
        }

        Ok(Self {
            working_dir,
            sources,
            sessions: HashMap::new(),
            next_session_id: 0,
            resume,
            echo_stdout,
        })
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Runs the reconnect/tick/readiness loop until `shutdown` resolves.
    pub async fn run(mut self, mut shutdown: impl Future<Output = ()> + Unpin) -> std::io::Result<()> {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.maintain_connections().await;
                    self.schedule_requests();
                }
                ready = next_ready(&self.sessions), if !self.sessions.is_empty() => {
                    if let Some((id, ready)) = ready {
                        self.service_session(id, ready);
                    }
                }
                () = &mut shutdown => {
                    tracing::info!("client engine shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// For each source without a live socket whose backoff has elapsed,
    /// attempts a connect and, on success, immediately enqueues `LIST`.
    async fn maintain_connections(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .sources
            .iter()
            .filter(|(_, s)| s.session.is_none() && now >= s.next_reconnect_at)
            .map(|(name, _)| name.clone())
            .collect();

        for name in due {
            let addr = self.sources[&name].addr;
            match TcpStream::connect(addr).await {
                Ok(socket) => {
                    let _ = socket.set_nodelay(true);
                    let id = self.next_session_id;
                    self.next_session_id += 1;
                    let mut session = Session::for_source(id, socket, name.clone());
                    session
                        .write_buf
                        .add(&wire::encode_frame(&Header::list_request(), &[]));
                    self.sessions.insert(id, session);
                    if let Some(state) = self.sources.get_mut(&name) {
                        state.session = Some(id);
                    }
                    tracing::info!(source = %name, session = id, "connected");
                }
                Err(err) => {
                    tracing::info!(source = %name, error = %err, "connect failed, backing off");
                    if let Some(state) = self.sources.get_mut(&name) {
                        state.next_reconnect_at = now + RECONNECT_BACKOFF;
                    }
                }
            }
        }
    }

    /// Picks up to [`MAX_CONCURRENT_DOWNLOADS`] not-yet-requested mirror
    /// paths across sources with a fully received list and read-buffer
    /// headroom, sending `STREAM` for each.
    fn schedule_requests(&mut self) {
        let mut in_flight = self
            .sources
            .values()
            .flat_map(|s| s.mirror.iter())
            .filter(|(_, entry)| {
                matches!(
                    entry.stream_state,
                    StreamState::Requested | StreamState::InProgress
                )
            })
            .count();
        if in_flight >= MAX_CONCURRENT_DOWNLOADS {
            return;
        }

        let names: Vec<String> = self.sources.keys().cloned().collect();
        for name in names {
            if in_flight >= MAX_CONCURRENT_DOWNLOADS {
                break;
            }
            let Some(state) = self.sources.get(&name) else {
                continue;
            };
            if !state.list_received_once {
                continue;
            }
            let Some(session_id) = state.session else {
                continue;
            };
            if !self
                .sessions
                .get(&session_id)
                .is_some_and(|s| s.read_buf.space() >= READ_LOW_WATER)
            {
                continue;
            }

            let candidates: Vec<(String, u64)> = state
                .mirror
                .iter()
                .filter(|(_, entry)| matches!(entry.stream_state, StreamState::NotRequested))
                .map(|(path, entry)| (path.clone(), entry.size))
                .collect();

            for (path, size) in candidates {
                if in_flight >= MAX_CONCURRENT_DOWNLOADS {
                    break;
                }
                let header = Header::stream_request(path.clone(), size as i64);
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.write_buf.add(&wire::encode_frame(&header, &[]));
                }
                if let Some(state) = self.sources.get_mut(&name) {
                    if let Some(entry) = state.mirror.get_mut(&path) {
                        entry.stream_state = StreamState::Requested;
                    }
                }
                in_flight += 1;
            }
        }
    }

    fn service_session(&mut self, id: SessionId, ready: std::io::Result<tokio::io::Ready>) {
        let ready = match ready {
            Ok(ready) => ready,
            Err(err) => {
                tracing::info!(session = id, error = %err, "session readiness wait failed");
                self.disconnect(id);
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
            self.process_responses(id);
        }
        if !fatal && ready.is_writable() {
            if let Some(session) = self.sessions.get_mut(&id) {
                if session.try_flush_write_buf().is_err() {
                    fatal = true;
                }
            }
        }
        if fatal {
            self.disconnect(id);
        }
    }

    fn process_responses(&mut self, id: SessionId) {
        loop {
            let frame = {
                let Some(session) = self.sessions.get_mut(&id) else {
                    return;
                };
                match wire::decode_frame(&mut session.read_buf) {
                    Decoded::Incomplete => break,
                    Decoded::Invalid(err) => {
                        tracing::error!(session = id, error = %err, "dropping malformed response");
                        continue;
                    }
                    Decoded::Frame(frame) => frame,
                }
            };
            let Some(source) = self.sessions.get(&id).and_then(|s| s.source.clone()) else {
                continue;
            };
            self.dispatch(&source, frame);
        }
    }

    fn dispatch(&mut self, source: &str, frame: Frame) {
        match frame.header.packet {
            Some(PacketKind::List) => self.apply_list(source, &frame.payload, true),
            Some(PacketKind::ListPartial) => self.apply_list(source, &frame.payload, false),
            Some(PacketKind::Block) => self.apply_block(source, &frame.header, frame.payload),
            Some(PacketKind::Status) => self.apply_status(source, &frame.header),
            None => tracing::warn!(source = %source, "response carried no packet kind"),
        }
    }

    /// List reconciliation: applies tombstones, shrink/hash-mismatch
    /// truncation, and new-path creation for every entry in the server's
    /// list, plus the full-list-only prune of locally known paths the
    /// server omitted.
    fn apply_list(&mut self, source: &str, payload: &[u8], full: bool) {
        let list = match wire::list::decode(payload) {
            Ok(list) => list,
            Err(err) => {
                tracing::error!(source = %source, error = %err, "malformed list payload");
                return;
            }
        };
        if let Some(state) = self.sources.get_mut(source) {
            state.list_received_once = true;
        }

        let mut present = HashSet::new();
        for (path, entry) in &list {
            if entry.is_tombstone() {
                self.delete_mirror_path(source, path);
                continue;
            }
            present.insert(path.clone());
            self.reconcile_path(source, path, entry.size as u64, entry.hash.clone());
        }

        if full {
            let stale = self
                .sources
                .get_mut(source)
                .map(|state| state.mirror.prune_to(&present))
                .unwrap_or_default();
            for path in stale {
                self.delete_local_file(source, &path);
                if let Err(err) = self.resume.tombstone(source, &path) {
                    tracing::warn!(source = %source, path = %path, error = %err, "failed to record tombstone in resume store");
                }
            }
        }
    }

    fn reconcile_path(
        &mut self,
        source: &str,
        path: &str,
        server_size: u64,
        server_hash: Option<String>,
    ) {
        let local_path = self.working_dir.join(source).join(path);
        let exists_locally = self
            .sources
            .get(source)
            .is_some_and(|s| s.mirror.contains(path));

        if exists_locally {
            let (local_size, local_hash, stream_state) = {
                let state = self.sources.get(source).expect("checked above");
                let entry = state.mirror.get(path).expect("checked above");
                (entry.size, entry.hash_hex.clone(), entry.stream_state)
            };
            let shrank = local_size > server_size + NETWORK_BLOCK as u64;
            let hash_mismatch = matches!((&local_hash, &server_hash), (Some(a), Some(b)) if a != b);

            if shrank || hash_mismatch {
                if let Err(err) = truncate_local(&local_path) {
                    tracing::warn!(path = %local_path.display(), error = %err, "failed to truncate local mirror file");
                    return;
                }
                if let Some(state) = self.sources.get_mut(source) {
                    if let Some(entry) = state.mirror.get_mut(path) {
                        entry.size = 0;
                        entry.stream_state = StreamState::NotRequested;
                        entry.hash_hex = server_hash;
                    }
                }
                if let Err(err) = self.resume.set(source, path, 0) {
                    tracing::warn!(source = %source, path = %path, error = %err, "failed to reset resume offset in resume store");
                }
                return;
            }

            // The server's idea of this file grew past what's locally
            // mirrored without a shrink or hash mismatch. Most likely a
            // fresh connection (reconnect) picking up a list the previous
            // session's subscriber push never delivered because the socket
            // wasn't open for it. Re-arm a `STREAM` request starting at the
            // local size, resuming rather than retransmitting the prefix.
            if server_size > local_size && matches!(stream_state, StreamState::Complete | StreamState::Fail) {
                if let Some(state) = self.sources.get_mut(source) {
                    if let Some(entry) = state.mirror.get_mut(path) {
                        entry.stream_state = StreamState::NotRequested;
                        entry.hash_hex = server_hash;
                    }
                }
            }
            return;
        }

        if let Some(parent) = local_path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %err, "failed to create mirror directory");
                return;
            }
        }
        if let Err(err) = File::create(&local_path) {
            tracing::warn!(path = %local_path.display(), error = %err, "failed to create local mirror file");
            return;
        }
        if let Some(state) = self.sources.get_mut(source) {
            state.mirror.insert(
                path.to_string(),
                MirrorEntry {
                    size: 0,
                    stream_state: StreamState::NotRequested,
                    hash_hex: server_hash,
                },
            );
        }
        if let Err(err) = self.resume.set(source, path, 0) {
            tracing::warn!(source = %source, path = %path, error = %err, "failed to record resume offset for new mirror path");
        }
    }

    fn delete_mirror_path(&mut self, source: &str, path: &str) {
        if let Some(state) = self.sources.get_mut(source) {
            state.mirror.remove(path);
        }
        self.delete_local_file(source, path);
        if let Err(err) = self.resume.tombstone(source, path) {
            tracing::warn!(source = %source, path = %path, error = %err, "failed to record tombstone in resume store");
        }
    }

    fn delete_local_file(&self, source: &str, path: &str) {
        let local_path = self.working_dir.join(source).join(path);
        if let Err(err) = fs::remove_file(&local_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %local_path.display(), error = %err, "failed to remove mirror file");
            }
        }
    }

    /// Applies a `b`-packet: decompresses if needed, appends to the local
    /// mirror file, and advances that entry's recorded size.
    fn apply_block(&mut self, source: &str, header: &Header, payload: Vec<u8>) {
        let Some(path) = header.file.clone() else {
            tracing::warn!(source = %source, "block frame missing file field");
            return;
        };
        if !self
            .sources
            .get(source)
            .is_some_and(|s| s.mirror.contains(&path))
        {
            tracing::warn!(source = %source, path = %path, "block for unknown mirror path dropped");
            return;
        }

        let bytes = if header.gzip {
            match compress::decompress(&payload) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!(source = %source, path = %path, error = %err, "block decompression failed, dropping");
                    return;
                }
            }
        } else {
            payload
        };

        let local_path = self.working_dir.join(source).join(&path);
        let write_result = (|| -> std::io::Result<()> {
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&local_path)?;
            file.write_all(&bytes)
        })();

        if let Err(err) = write_result {
            tracing::warn!(path = %local_path.display(), error = %err, "local append failed, mirror size left unchanged");
            return;
        }

        let new_size = self.sources.get_mut(source).and_then(|state| {
            state.mirror.get_mut(&path).map(|entry| {
                entry.size += bytes.len() as u64;
                entry.size
            })
        });
        if let Some(size) = new_size {
            if let Err(err) = self.resume.set(source, &path, size as i64) {
                tracing::warn!(source = %source, path = %path, error = %err, "failed to record resume offset after append");
            }
        }

        if self.echo_stdout {
            let _ = std::io::stdout().write_all(&bytes);
        }
    }

    fn apply_status(&mut self, source: &str, header: &Header) {
        let Some(path) = header.file.clone() else {
            return;
        };
        let Some(status) = header.status else {
            return;
        };
        let Some(state) = self.sources.get_mut(source) else {
            return;
        };
        let Some(entry) = state.mirror.get_mut(&path) else {
            return;
        };
        match status {
            Status::InProgress => entry.stream_state = StreamState::InProgress,
            Status::Complete => entry.stream_state = StreamState::Complete,
            Status::Fail => {
                tracing::warn!(source = %source, path = %path, "stream request failed");
                entry.stream_state = StreamState::Fail;
            }
            Status::Ok => {}
        }
    }

    /// On read/write failure: close the socket, clear `list_received_once`,
    /// revert in-flight stream states, and arm the reconnect timer.
    fn disconnect(&mut self, id: SessionId) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        let Some(source_name) = session.source else {
            return;
        };
        tracing::info!(source = %source_name, session = id, "disconnected");
        if let Some(state) = self.sources.get_mut(&source_name) {
            state.session = None;
            state.list_received_once = false;
            state.next_reconnect_at = Instant::now() + RECONNECT_BACKOFF;
            for (_, entry) in state.mirror.iter_mut() {
                if matches!(
                    entry.stream_state,
                    StreamState::Requested | StreamState::InProgress
                ) {
                    entry.stream_state = StreamState::NotRequested;
                }
            }
        }
    }
}

fn truncate_local(path: &Path) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .open(path)?;
    Ok(())
}

fn scan_existing_mirror(dir: &Path) -> HashMap<String, MirrorEntry> {
    let mut out = HashMap::new();
    walk_mirror(dir, dir, &mut out);
    out
}

fn walk_mirror(root: &Path, dir: &Path, out: &mut HashMap<String, MirrorEntry>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        if metadata.is_dir() {
            walk_mirror(root, &path, out);
            continue;
        }
        if !metadata.is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        out.insert(relative, MirrorEntry::new(metadata.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scans_existing_mirror_files_on_startup() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/x.log"), b"0123456789").unwrap();
        let found = scan_existing_mirror(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("a/b/x.log").unwrap().size, 10);
    }
}
