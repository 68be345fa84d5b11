//! Identifiers attached to client connections.
//!
//! Each accepted connection runs inside a tracing span carrying its id, so
//! every log line about a session can be correlated, across restarts and
//! across load balancer instances.

use std::fmt;
use uuid::Uuid;

/// Random, globally unique id of one client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    /// Hyphen-free form, which keeps log lines shorter.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.simple(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| ConnectionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display_is_simple_uuid() {
        let id = ConnectionId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert!(!text.contains('-'));
        assert_eq!(Uuid::parse_str(&text).unwrap(), *id.as_uuid());
    }

    #[test]
    fn test_version_four() {
        assert_eq!(ConnectionId::new().as_uuid().get_version_num(), 4);
    }
}
