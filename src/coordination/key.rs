use std::fmt;

use crate::error::LockError;

const SEPARATOR: &str = ":";

/// Identifies the resource a lock protects; the unit of mutual exclusion.
///
/// Two calls that must not overlap have to produce the same key, and calls
/// that may overlap must produce different keys.  Derive keys from the
/// logical arguments of the protected operation only (user id, repo name),
/// never from incidental values such as timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Wrap a raw key, rejecting empty or whitespace-only strings.
    pub fn new(raw: impl Into<String>) -> Result<Self, LockError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(LockError::InvalidKey(raw));
        }
        Ok(Self(raw))
    }

    /// Build a key by joining `parts` with `:`, e.g. `["refresh", "user-1"]`
    /// becomes `refresh:user-1`.
    ///
    /// Parts must be non-empty and must not contain `:` themselves, so that
    /// different part lists never produce the same key.
    pub fn from_parts<I, S>(parts: I) -> Result<Self, LockError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts = parts
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect::<Vec<_>>();
        if let Some(bad) = parts
            .iter()
            .find(|p| p.trim().is_empty() || p.contains(SEPARATOR))
        {
            return Err(LockError::InvalidKey(bad.clone()));
        }
        Self::new(parts.join(SEPARATOR))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key as stored, with the configured namespace prepended.
    pub(crate) fn namespaced(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for LockKey {
    type Error = LockError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for LockKey {
    type Error = LockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_joins_with_colon() {
        let key = LockKey::from_parts(["refresh", "user-1"]).unwrap();
        assert_eq!(key.as_str(), "refresh:user-1");
        assert_eq!(key.namespaced("keylock:"), "keylock:refresh:user-1");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(LockKey::new(""), Err(LockError::InvalidKey(_))));
        assert!(matches!(LockKey::new("  "), Err(LockError::InvalidKey(_))));
        assert!(LockKey::from_parts(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_from_parts_cannot_collide() {
        assert!(matches!(
            LockKey::from_parts(["refresh", "a:b"]),
            Err(LockError::InvalidKey(part)) if part == "a:b"
        ));
        assert!(LockKey::from_parts(["refresh:a", "b"]).is_err());
        assert!(LockKey::from_parts(["refresh", ""]).is_err());
        assert!(LockKey::from_parts(["refresh", " "]).is_err());
    }

    #[test]
    fn test_same_arguments_same_key() {
        let a = LockKey::from_parts(["refresh", 42.to_string().as_str()]).unwrap();
        let b = LockKey::try_from("refresh:42").unwrap();
        assert_eq!(a, b);
    }
}
