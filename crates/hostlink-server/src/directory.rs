use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hostlink_core::SessionToken;
use tracing::info;

use crate::sink::EventSink;
use crate::transport::SessionTransport;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("session '{0}' not found")]
    NotFound(String),
}

/// Active sessions by token. Sharded, so lookups on one session never wait
/// on another.
#[derive(Default)]
pub struct SessionDirectory {
    sessions: DashMap<SessionToken, Arc<SessionTransport>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session on `sink` under a fresh token. The entry is
    /// removed when the transport closes.
    pub fn create(self: &Arc<Self>, sink: Box<dyn EventSink>) -> Arc<SessionTransport> {
        loop {
            let token = SessionToken::generate();
            if let Entry::Vacant(slot) = self.sessions.entry(token.clone()) {
                let transport = Arc::new(SessionTransport::new(token, sink));
                let directory: Weak<Self> = Arc::downgrade(self);
                transport.set_on_close(move |token| {
                    if let Some(directory) = directory.upgrade() {
                        let _ = directory.remove(token);
                    }
                });
                let _ = slot.insert(Arc::clone(&transport));
                info!(session_id = %transport.token(), "session opened");
                return transport;
            }
        }
    }

    pub fn lookup(&self, token: &SessionToken) -> Result<Arc<SessionTransport>, DirectoryError> {
        self.sessions
            .get(token)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DirectoryError::NotFound(token.to_string()))
    }

    /// Drop the entry for `token`. Removing an absent token is a no-op.
    pub fn remove(&self, token: &SessionToken) -> Option<Arc<SessionTransport>> {
        self.sessions.remove(token).map(|(_, transport)| transport)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session. Each close removes its own entry.
    pub fn close_all(&self) -> usize {
        let open: Vec<Arc<SessionTransport>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        open.iter().filter(|transport| transport.close()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::ChunkedSink;

    fn sink() -> Box<dyn EventSink> {
        Box::new(ChunkedSink {
            buf: Default::default(),
        })
    }

    #[test]
    fn create_lookup_close() {
        let directory = Arc::new(SessionDirectory::new());
        let transport = directory.create(sink());
        let token = transport.token().clone();

        assert_eq!(directory.len(), 1);
        assert!(Arc::ptr_eq(&directory.lookup(&token).unwrap(), &transport));

        assert!(transport.close());
        assert!(directory.is_empty());
        assert!(matches!(
            directory.lookup(&token),
            Err(DirectoryError::NotFound(_))
        ));

        assert!(!transport.close());
        assert!(directory.remove(&token).is_none());
    }

    #[test]
    fn tokens_are_distinct() {
        let directory = Arc::new(SessionDirectory::new());
        let a = directory.create(sink());
        let b = directory.create(sink());
        assert_ne!(a.token(), b.token());
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn unknown_token_not_found() {
        let directory = SessionDirectory::new();
        let err = directory
            .lookup(&SessionToken::from_raw("nope"))
            .unwrap_err();
        assert_eq!(err.to_string(), "session 'nope' not found");
    }

    #[test]
    fn close_all_empties_directory() {
        let directory = Arc::new(SessionDirectory::new());
        let sessions: Vec<_> = (0..5).map(|_| directory.create(sink())).collect();

        assert_eq!(directory.close_all(), 5);
        assert!(directory.is_empty());
        assert!(sessions.iter().all(|s| s.is_closed()));
        assert_eq!(directory.close_all(), 0);
    }

    #[test]
    fn concurrent_open_close_restores_count() {
        let directory = Arc::new(SessionDirectory::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let directory = Arc::clone(&directory);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let transport = directory.create(sink());
                        let _ = directory.lookup(transport.token()).unwrap();
                        assert!(transport.close());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(directory.is_empty());
    }
}
