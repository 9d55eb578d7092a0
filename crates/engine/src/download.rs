//! One-shot catch-up transfers.
//!
//! A download represents "catch the subscriber up from `cursor` to current
//! `size`"; it shares the watched file's single long-lived read handle
//! rather than opening its own, since the server loop is single-threaded
//! and there is never a concurrent seek.

use std::path::PathBuf;

use crate::session::SessionId;

/// One in-flight catch-up transfer. The file handle is reached through the
/// tracker by path rather than stored here.
pub struct Download {
    pub session: SessionId,
    pub path: PathBuf,
    pub cursor: u64,
}

/// The server's set of in-flight downloads.
#[derive(Default)]
pub struct DownloadTable {
    downloads: Vec<Download>,
}

impl DownloadTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, session: SessionId, path: PathBuf, cursor: u64) {
        self.downloads.push(Download {
            session,
            path,
            cursor,
        });
    }

    /// Removes every download belonging to a torn-down session.
    pub fn remove_session(&mut self, session: SessionId) {
        self.downloads.retain(|d| d.session != session);
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Download> {
        self.downloads.iter_mut()
    }

    /// Drops the download matching `(session, path)`, returning its final
    /// cursor if one was found (used to promote the session to subscriber
    /// at that exact offset).
    pub fn finish(&mut self, session: SessionId, path: &std::path::Path) -> Option<u64> {
        let idx = self
            .downloads
            .iter()
            .position(|d| d.session == session && d.path == path)?;
        Some(self.downloads.remove(idx).cursor)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.downloads.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.downloads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_removes_only_the_matching_download() {
        let mut table = DownloadTable::new();
        table.start(1, PathBuf::from("a.log"), 0);
        table.start(2, PathBuf::from("b.log"), 0);
        let cursor = table.finish(1, std::path::Path::new("a.log"));
        assert_eq!(cursor, Some(0));
        assert_eq!(table.iter_mut().count(), 1);
    }

    #[test]
    fn remove_session_clears_all_of_its_downloads() {
        let mut table = DownloadTable::new();
        table.start(1, PathBuf::from("a.log"), 0);
        table.start(1, PathBuf::from("b.log"), 5);
        table.start(2, PathBuf::from("c.log"), 0);
        table.remove_session(1);
        assert_eq!(table.iter_mut().count(), 1);
    }
}
