use crate::error::FilterError;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// None when the address could not be scored
    pub score: Option<u8>,
    pub delay: Duration,
    /// Set until the first body line of the current message is seen
    pub first_line: bool,
}

impl Session {
    pub fn new(score: Option<u8>, delay: Duration) -> Self {
        Self {
            score,
            delay,
            first_line: true,
        }
    }
}

/// Live sessions, keyed by the id smtpd assigned at link-connect.
///
/// Only the dispatcher touches the store, so it needs no locking.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn create(&mut self, id: &str, session: Session) -> Result<&mut Session, FilterError> {
        use std::collections::hash_map::Entry;
        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(_) => Err(FilterError::DuplicateSession(id.to_string())),
            Entry::Vacant(entry) => Ok(entry.insert(session)),
        }
    }

    pub fn get(&mut self, id: &str) -> Result<&mut Session, FilterError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| FilterError::UnknownSession(id.to_string()))
    }

    pub fn remove(&mut self, id: &str) -> Result<Session, FilterError> {
        self.sessions
            .remove(id)
            .ok_or_else(|| FilterError::UnknownSession(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lifecycle() {
        let mut store = SessionStore::default();
        store
            .create("a", Session::new(Some(3), Duration::ZERO))
            .unwrap();
        assert!(matches!(
            store.create("a", Session::new(None, Duration::ZERO)),
            Err(FilterError::DuplicateSession(id)) if id == "a"
        ));

        let session = store.get("a").unwrap();
        assert_eq!(session.score, Some(3));
        session.first_line = false;
        assert!(!store.get("a").unwrap().first_line);

        assert_eq!(store.len(), 1);
        store.remove("a").unwrap();
        assert_eq!(store.len(), 0);

        assert!(matches!(store.get("a"), Err(FilterError::UnknownSession(_))));
        assert!(matches!(
            store.remove("a"),
            Err(FilterError::UnknownSession(_))
        ));
    }
}
