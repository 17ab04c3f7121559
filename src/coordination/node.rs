use std::sync::OnceLock;

/// Identifier of this process as a lock holder.
///
/// Prefers the `KEYLOCK_HOLDER_ID` environment variable.  Falls back to
/// `<hostname>-<random-8-chars>` so that every process gets a unique id even
/// on the same host.  Computed once per process.
pub fn holder_id() -> &'static str {
    static HOLDER_ID: OnceLock<String> = OnceLock::new();
    HOLDER_ID.get_or_init(|| {
        std::env::var("KEYLOCK_HOLDER_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| {
                let hostname = gethostname::gethostname().to_string_lossy().into_owned();
                let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
                format!("{hostname}-{suffix}")
            })
    })
}

/// A value unique to one acquisition, stored as the lock record.
///
/// Format: `{holder_id}:{unix_ts}:{uuid}`.  Only the uuid makes it unique;
/// the holder id and timestamp are there for whoever inspects the key in
/// the store.
pub fn owner_token() -> String {
    format!(
        "{}:{}:{}",
        holder_id(),
        chrono::Utc::now().timestamp(),
        uuid::Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_id_is_stable() {
        assert_eq!(holder_id(), holder_id());
        assert!(!holder_id().is_empty());
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        let a = owner_token();
        let b = owner_token();
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("{}:", holder_id())));
    }
}
