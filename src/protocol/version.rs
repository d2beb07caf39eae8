//! Schema version gate.
//!
//! Inbound envelopes newer than the local schema are dropped without any
//! response or error. The peer may be a newer release; it notices the
//! silence through its own call timeout and falls back to an older action.

use crate::error::{Error, Result};

/// Schema version spoken by this crate.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Accepts or drops inbound envelopes by schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGate {
    local: u32,
}

impl VersionGate {
    /// Creates a gate for the given local version.
    #[inline]
    #[must_use]
    pub const fn new(local: u32) -> Self {
        Self { local }
    }

    /// Returns the local schema version.
    #[inline]
    #[must_use]
    pub const fn local(&self) -> u32 {
        self.local
    }

    /// Returns `true` iff `version <= local`.
    #[inline]
    #[must_use]
    pub const fn accept(&self, version: u32) -> bool {
        version <= self.local
    }

    /// Like [`accept`](Self::accept), naming both versions on rejection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedVersion`] if `version` is newer than local.
    pub fn check(&self, version: u32) -> Result<()> {
        if self.accept(version) {
            Ok(())
        } else {
            Err(Error::unsupported_version(version, self.local))
        }
    }
}

impl Default for VersionGate {
    fn default() -> Self {
        Self::new(CURRENT_SCHEMA_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_same_and_older() {
        let gate = VersionGate::new(3);
        assert!(gate.accept(0));
        assert!(gate.accept(2));
        assert!(gate.accept(3));
    }

    #[test]
    fn test_newer_peer_is_dropped() {
        // Dropping is the compatibility mechanism: the newer peer times out
        // and retries with an action this side understands.
        let gate = VersionGate::new(3);
        assert!(!gate.accept(4));
        assert!(!gate.accept(u32::MAX));
    }

    #[test]
    fn test_check_names_versions() {
        let gate = VersionGate::new(2);
        assert!(gate.check(2).is_ok());

        let err = gate.check(5).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedVersion {
                version: 5,
                local: 2
            }
        ));
    }

    #[test]
    fn test_default_is_current() {
        assert_eq!(VersionGate::default().local(), CURRENT_SCHEMA_VERSION);
    }
}
