// Agent channel authentication.
//
// The agent proves itself with a static shared secret passed as `?key=` on
// the WebSocket upgrade request. With no secret configured the check is
// disabled and any client may link as the agent.

/// Guards the `/ws` upgrade with an optional shared secret.
#[derive(Debug, Clone, Default)]
pub struct AgentKeyGuard {
    secret: Option<String>,
}

impl AgentKeyGuard {
    /// Blank secrets are treated as "not configured".
    pub fn new(secret: Option<&str>) -> Self {
        let secret = secret
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        Self { secret }
    }

    /// Whether a key is required at all.
    pub fn require_key(&self) -> bool {
        self.secret.is_some()
    }

    /// Check a presented key. Always true when no secret is configured.
    pub fn is_authorized(&self, presented: Option<&str>) -> bool {
        match &self.secret {
            None => true,
            Some(expected) => constant_time_eq(presented.unwrap_or(""), expected),
        }
    }
}

/// Constant-time string comparison to prevent timing attacks.
///
/// Does not short-circuit on length mismatch; always iterates over the
/// longer input to avoid leaking length information via timing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    let len_diff = a.len() ^ b.len();

    let max_len = a.len().max(b.len());
    let mut byte_diff = 0u8;
    for i in 0..max_len {
        let x = *a.get(i).unwrap_or(&0);
        let y = *b.get(i).unwrap_or(&0);
        byte_diff |= x ^ y;
    }
    (len_diff == 0) & (byte_diff == 0)
}

/// Check if a host string represents a non-localhost bind address.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── AgentKeyGuard ────────────────────────────────────────

    #[test]
    fn open_guard_accepts_anything() {
        let guard = AgentKeyGuard::new(None);
        assert!(!guard.require_key());
        assert!(guard.is_authorized(None));
        assert!(guard.is_authorized(Some("whatever")));
    }

    #[test]
    fn blank_secret_means_open() {
        let guard = AgentKeyGuard::new(Some("  "));
        assert!(!guard.require_key());
        assert!(guard.is_authorized(None));
    }

    #[test]
    fn configured_guard_checks_key() {
        let guard = AgentKeyGuard::new(Some("s3cret"));
        assert!(guard.require_key());
        assert!(guard.is_authorized(Some("s3cret")));
        assert!(!guard.is_authorized(Some("s3cre")));
        assert!(!guard.is_authorized(Some("wrong!")));
        assert!(!guard.is_authorized(None));
    }

    // ── is_public_bind ───────────────────────────────────────

    #[test]
    fn localhost_variants_not_public() {
        assert!(!is_public_bind("127.0.0.1"));
        assert!(!is_public_bind("localhost"));
        assert!(!is_public_bind("::1"));
        assert!(!is_public_bind("[::1]"));
    }

    #[test]
    fn zero_zero_is_public() {
        assert!(is_public_bind("0.0.0.0"));
    }

    // ── constant_time_eq ─────────────────────────────────────

    #[test]
    fn constant_time_eq_same() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("a", ""));
    }
}
