//! Secret string wrapper that never appears in logs.

use serde::Deserialize;

/// Wrapper for provider tokens and verify secrets.
///
/// `Debug` and `Display` always render `[REDACTED]` so credentials cannot
/// leak through tracing output or error messages.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        SecretString(s)
    }

    /// Exposes the underlying secret value. Never pass the result to a
    /// logging macro.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_in_debug_and_display() {
        let secret = SecretString::new("wa-token-abc123".to_string());

        let debug = format!("{:?}", secret);
        assert!(!debug.contains("wa-token-abc123"));
        assert!(debug.contains("[REDACTED]"));

        let display = format!("{}", secret);
        assert!(!display.contains("wa-token-abc123"));

        assert_eq!(secret.expose(), "wa-token-abc123");
    }

    #[test]
    fn redacts_inside_containers() {
        let secret = SecretString::new("Bearer eyJabc".to_string());
        let wrapped = format!("{:?}", Some(&secret));
        assert!(!wrapped.contains("eyJabc"));
    }
}
