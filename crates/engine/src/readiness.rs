//! The single multiplexed readiness wait shared by both engines.
//!
//! Each loop iteration performs exactly one readiness wait across every
//! live session. [`next_ready`] builds a fresh [`FuturesUnordered`] from
//! every session's declared [`Session::interest`] and resolves to the first
//! one that becomes ready, collapsing the whole session set into that
//! single wait.

use std::collections::HashMap;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::io::Ready;

use crate::session::{Session, SessionId};

/// Awaits the first session whose interest becomes ready, or `None` if no
/// session currently declares an interest.
pub async fn next_ready(
    sessions: &HashMap<SessionId, Session>,
) -> Option<(SessionId, std::io::Result<Ready>)> {
    let mut futures: FuturesUnordered<_> = sessions
        .iter()
        .filter_map(|(&id, session)| {
            session.interest().map(|interest| async move {
                let ready = session.socket.ready(interest).await;
                (id, ready)
            })
        })
        .collect();
    futures.next().await
}
