//! Server-side file tracker: per-file state (discovery, stat polling,
//! append detection, optional content hashing, subscriber fan-out).
//!
//! ## Hash invariant at zero-subscriber moments
//!
//! `hash_hex` is defined to always equal `SHA1(prefix[0:read_cursor])`, but
//! a freshly discovered or just-truncated file has no subscribers yet and
//! is hashed "from scratch" over its whole current content at that moment —
//! which only makes sense if `read_cursor` is also free to jump straight to
//! the current size whenever the subscriber set is empty. Discovery,
//! truncation, and the mtime-without-append replacement check all do this,
//! so `hash_hex` stays exactly `SHA1(prefix[0:read_cursor])` at every
//! moment, not just eventually. New subscribers never rely on the tracker's
//! `read_cursor` for their own starting point anyway: a `STREAM` request
//! always carries its own explicit offset. When checksums are disabled
//! there is no hash to reconcile, so `read_cursor` is simply reset to `0`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use regex::Regex;
use tracing::{debug, info, warn};

use checksums::IncrementalSha1;
use walk::Scanner;
use wire::{ListEntry, ListPayload};

use crate::constants::NETWORK_BLOCK;
use crate::session::SessionId;

/// One record per path under the shared root matching the include regex.
pub struct WatchedFile {
    pub path: PathBuf,
    handle: File,
    pub size: u64,
    pub mtime: SystemTime,
    pub read_cursor: u64,
    hash_state: Option<IncrementalSha1>,
    pub hash_hex: Option<String>,
    pub subscribers: HashSet<SessionId>,
    pub next_scan_at: Instant,
    pub dirty: bool,
}

impl WatchedFile {
    #[must_use]
    pub fn is_tracking_checksums(&self) -> bool {
        self.hash_state.is_some()
    }
}

/// Bytes of a new append, ready to be fanned out to a file's subscribers.
pub struct AppendEvent {
    pub path: PathBuf,
    pub offset: u64,
    pub data: Vec<u8>,
    pub recipients: Vec<SessionId>,
    pub skipped: Vec<SessionId>,
}

/// The server's table of watched files plus the directory scanner that
/// discovers them.
pub struct Tracker {
    root: PathBuf,
    scanner: Scanner,
    checksums_enabled: bool,
    files: HashMap<PathBuf, WatchedFile>,
    stat_queue: VecDeque<PathBuf>,
    tombstones: Vec<String>,
    list_dirty: bool,
}

impl Tracker {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, include: Regex, checksums_enabled: bool) -> Self {
        let root = root.into();
        Self {
            scanner: Scanner::new(root.clone(), include),
            root,
            checksums_enabled,
            files: HashMap::new(),
            stat_queue: VecDeque::new(),
            tombstones: Vec::new(),
            list_dirty: false,
        }
    }

    #[must_use]
    pub fn relative_path(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .unwrap_or(absolute)
            .to_string_lossy()
            .replace('\\', "/")
    }

    #[must_use]
    pub fn file(&self, absolute: &Path) -> Option<&WatchedFile> {
        self.files.get(absolute)
    }

    #[must_use]
    pub fn is_tracked(&self, relative: &str) -> Option<PathBuf> {
        self.files
            .keys()
            .find(|p| self.relative_path(p) == relative)
            .cloned()
    }

    /// Rescans the tree for new files, unless tombstones are still pending.
    /// Fills the stat queue with every currently watched path.
    pub fn refresh(&mut self) {
        if !self.tombstones.is_empty() {
            return;
        }
        let scan = self.scanner.scan();
        for path in scan.added {
            self.discover(path);
        }
        self.stat_queue = self.files.keys().cloned().collect();
    }

    fn discover(&mut self, path: PathBuf) {
        let handle = match File::open(&path) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to open newly discovered file");
                return;
            }
        };
        let metadata = match handle.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to stat newly discovered file");
                return;
            }
        };
        let size = metadata.len();
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let (read_cursor, hash_state, hash_hex) = if self.checksums_enabled {
            match hash_prefix(&path, size) {
                Ok(hasher) => {
                    let hex = hasher.hex();
                    (size, Some(hasher), Some(hex))
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to hash newly discovered file");
                    (0, Some(IncrementalSha1::new()), Some(IncrementalSha1::new().hex()))
                }
            }
        } else {
            (0, None, None)
        };

        info!(path = %path.display(), size, "discovered watched file");
        self.files.insert(
            path.clone(),
            WatchedFile {
                path,
                handle,
                size,
                mtime,
                read_cursor,
                hash_state,
                hash_hex,
                subscribers: HashSet::new(),
                next_scan_at: Instant::now(),
                dirty: true,
            },
        );
        self.list_dirty = true;
    }

    /// Pops up to [`crate::constants::STAT_QUEUE_BATCH`] paths and applies
    /// the deletion/truncation/replacement/no-op decision tree.
    pub fn process_stat_queue(&mut self) {
        for _ in 0..crate::constants::STAT_QUEUE_BATCH {
            let Some(path) = self.stat_queue.pop_front() else {
                break;
            };
            self.process_one_stat(&path);
        }
    }

    fn process_one_stat(&mut self, path: &Path) {
        let Some(file) = self.files.get(path) else {
            return;
        };
        let stat = match file.handle.metadata() {
            Ok(stat) => stat,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "stat failed, treating as deleted");
                self.remove_deleted(path);
                return;
            }
        };

        #[cfg(unix)]
        let unlinked = {
            use std::os::unix::fs::MetadataExt;
            stat.nlink() == 0
        };
        #[cfg(not(unix))]
        let unlinked = !stat.is_file();

        if unlinked {
            self.remove_deleted(path);
            return;
        }

        let new_size = stat.len();
        let new_mtime = stat.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let file = self.files.get_mut(path).expect("checked above");

        if new_size < file.size {
            info!(path = %path.display(), old_size = file.size, new_size, "truncation detected");
            file.subscribers.clear();
            file.size = new_size;
            file.mtime = new_mtime;
            reset_hash_for_current_content(file, self.checksums_enabled);
            file.dirty = true;
            self.list_dirty = true;
            return;
        }

        if new_mtime > file.mtime {
            if !file.subscribers.is_empty() && new_size > file.size {
                // Defer: the append path (`ScanNewData`) will pick this up.
                file.mtime = new_mtime;
                return;
            }
            if self.checksums_enabled {
                let recomputed = hash_prefix(path, new_size).map(|h| h.hex());
                match recomputed {
                    Ok(new_hex) if Some(&new_hex) == file.hash_hex.as_ref() => {
                        file.size = new_size;
                        file.mtime = new_mtime;
                    }
                    Ok(_) => {
                        info!(path = %path.display(), "content replacement detected via hash mismatch");
                        file.subscribers.clear();
                        file.size = new_size;
                        file.mtime = new_mtime;
                        reset_hash_for_current_content(file, true);
                        file.dirty = true;
                        self.list_dirty = true;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to rehash file during stat poll");
                    }
                }
            } else {
                info!(path = %path.display(), "mtime change treated as replacement (checksums disabled)");
                file.subscribers.clear();
                file.size = new_size;
                file.mtime = new_mtime;
                file.read_cursor = 0;
                file.dirty = true;
                self.list_dirty = true;
            }
            return;
        }

        file.size = new_size;
        file.mtime = new_mtime;
    }

    fn remove_deleted(&mut self, path: &Path) {
        if let Some(file) = self.files.remove(path) {
            drop(file.handle);
            let relative = self.relative_path(path);
            info!(path = %relative, "watched file deleted");
            self.tombstones.push(relative);
            self.list_dirty = true;
        }
    }

    /// `ScanNewData`: for every subscribed file whose backoff has elapsed,
    /// reads up to one filesystem block past `read_cursor` and returns the
    /// fan-out work for the caller to apply to session write buffers.
    ///
    /// `has_space` is asked, per subscriber, whether that session's write
    /// buffer has room for `bytes + APPEND_WRITE_MARGIN`. Bytes are only
    /// ever handed out once every subscriber has room for them: if even one
    /// doesn't, nobody gets this block and `read_cursor` stays put, so the
    /// whole subscriber set stays contiguous together instead of a laggard
    /// permanently losing the bytes it missed (back-pressure skips the
    /// round, not the subscriber; the next tick retries the same offset).
    pub fn scan_new_data(
        &mut self,
        now: Instant,
        mut has_space: impl FnMut(SessionId, usize) -> bool,
    ) -> Vec<AppendEvent> {
        let mut events = Vec::new();
        let paths: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(_, f)| !f.subscribers.is_empty() && f.next_scan_at <= now)
            .map(|(p, _)| p.clone())
            .collect();

        for path in paths {
            let Some(file) = self.files.get_mut(&path) else {
                continue;
            };
            let mut buf = vec![0u8; NETWORK_BLOCK];
            let read = (|| -> std::io::Result<usize> {
                file.handle.seek(SeekFrom::Start(file.read_cursor))?;
                file.handle.read(&mut buf)
            })();

            let bytes_read = match read {
                Ok(0) => {
                    file.next_scan_at = now + crate::constants::TICK_INTERVAL;
                    continue;
                }
                Ok(n) => n,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "append read failed");
                    continue;
                }
            };
            buf.truncate(bytes_read);

            let all_have_space = file
                .subscribers
                .iter()
                .all(|&subscriber| has_space(subscriber, bytes_read));

            if !all_have_space {
                // At least one subscriber has no room for this block. Don't
                // deliver it to anyone: committing the read/hash advance
                // while holding back only the laggard would desync it from
                // the rest of the set, since the next tick would read past
                // bytes it never received. Leave read_cursor and hash_state
                // untouched and retry the same offset next tick.
                file.next_scan_at = now;
                events.push(AppendEvent {
                    path,
                    offset: file.read_cursor,
                    data: Vec::new(),
                    recipients: Vec::new(),
                    skipped: file.subscribers.iter().copied().collect(),
                });
                continue;
            }

            if let Some(hash_state) = file.hash_state.as_mut() {
                hash_state.update(&buf);
                file.hash_hex = Some(hash_state.hex());
            }

            let recipients: Vec<SessionId> = file.subscribers.iter().copied().collect();
            let offset = file.read_cursor;
            file.read_cursor += bytes_read as u64;
            file.size = file.size.max(file.read_cursor);
            file.next_scan_at = now;

            events.push(AppendEvent {
                path,
                offset,
                data: buf,
                recipients,
                skipped: Vec::new(),
            });
        }
        events
    }

    /// Drops all subscribers for `path` and resets its read cursor.
    pub fn cancel_subscribers(&mut self, path: &Path) {
        if let Some(file) = self.files.get_mut(path) {
            file.subscribers.clear();
            file.read_cursor = 0;
            file.dirty = true;
            self.list_dirty = true;
        }
    }

    /// Promotes `session` into `path`'s subscriber set, asserting that its
    /// cursor matches the tracked `read_cursor` whenever other subscribers
    /// are already attached.
    pub fn promote_to_subscriber(&mut self, path: &Path, session: SessionId, cursor: u64) {
        if let Some(file) = self.files.get_mut(path) {
            if file.subscribers.is_empty() {
                file.read_cursor = cursor;
            } else {
                debug_assert_eq!(
                    cursor, file.read_cursor,
                    "promoted session's cursor must match the subscriber set's shared position"
                );
                if cursor != file.read_cursor {
                    warn!(
                        path = %path.display(),
                        cursor,
                        expected = file.read_cursor,
                        "promoted session's cursor diverged from subscriber set; clamping"
                    );
                }
            }
            file.subscribers.insert(session);
        }
    }

    /// Reads up to `len` bytes starting at `offset`, for download catch-up.
    pub fn read_at(&mut self, path: &Path, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let file = self
            .files
            .get_mut(path)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "file not tracked"))?;
        file.handle.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let n = file.handle.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    #[must_use]
    pub fn size_of(&self, path: &Path) -> Option<u64> {
        self.files.get(path).map(|f| f.size)
    }

    pub fn remove_session_everywhere(&mut self, session: SessionId) {
        for file in self.files.values_mut() {
            file.subscribers.remove(&session);
        }
    }

    #[must_use]
    pub fn list_dirty(&self) -> bool {
        self.list_dirty
    }

    /// `GenerateList`: returns either the full tracked set, or only
    /// dirty-flagged entries plus pending tombstones. Clears the emitted
    /// dirty bits and drains the tombstone list.
    pub fn generate_list(&mut self, only_dirty: bool) -> ListPayload {
        let mut list = ListPayload::new();
        for file in self.files.values_mut() {
            if only_dirty && !file.dirty {
                continue;
            }
            let relative = file
                .path
                .strip_prefix(&self.root)
                .unwrap_or(&file.path)
                .to_string_lossy()
                .replace('\\', "/");
            list.insert(
                relative,
                ListEntry {
                    size: file.size as i64,
                    hash: file.hash_hex.clone(),
                },
            );
            file.dirty = false;
        }
        for relative in self.tombstones.drain(..) {
            list.insert(relative, ListEntry::tombstone());
        }
        self.list_dirty = false;
        list
    }
}

fn hash_prefix(path: &Path, len: u64) -> std::io::Result<IncrementalSha1> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    let mut hasher = IncrementalSha1::new();
    hasher.update(&buf);
    Ok(hasher)
}

fn reset_hash_for_current_content(file: &mut WatchedFile, checksums_enabled: bool) {
    if !checksums_enabled {
        file.read_cursor = 0;
        file.hash_state = None;
        file.hash_hex = None;
        return;
    }
    match hash_prefix(&file.path, file.size) {
        Ok(hasher) => {
            file.hash_hex = Some(hasher.hex());
            file.hash_state = Some(hasher);
            file.read_cursor = file.size;
        }
        Err(err) => {
            warn!(path = %file.path.display(), error = %err, "failed to rehash after truncation/replacement");
            file.read_cursor = 0;
            file.hash_state = Some(IncrementalSha1::new());
            file.hash_hex = Some(IncrementalSha1::new().hex());
        }
    }
}
