//! Identity key canonicalization for deduplication

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Canonical, deduplication-ready form of an entity's raw identity.
///
/// Two raw identities that differ only in case, URL scheme, a leading `www.`
/// or trailing slashes map to the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Normalize a raw identity, rejecting ones that collapse to nothing.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.trim().is_empty() {
            return Err(ValidationError::MissingIdentity);
        }
        let key = normalize_identity(raw);
        if key.is_empty() {
            return Err(ValidationError::EmptyIdentityKey {
                raw: raw.to_string(),
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize a raw identity string.
///
/// Steps: trim, lowercase, strip `scheme://` (or a protocol-relative `//`),
/// strip one leading `www.`, strip trailing slashes.
pub fn normalize_identity(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let rest = strip_scheme(&lowered);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.trim_end_matches('/').to_string()
}

fn strip_scheme(s: &str) -> &str {
    if let Some(rest) = s.strip_prefix("//") {
        return rest;
    }
    match s.find("://") {
        Some(idx) if is_scheme(&s[..idx]) => &s[idx + 3..],
        _ => s,
    }
}

/// RFC 3986 scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )
fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
