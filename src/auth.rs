//! Caller identity. Sign-in happens upstream; an auth proxy forwards the
//! opaque user id in a trusted request header (`x-user-id` by default).

use std::fmt;

use axum::http::{HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};

/// Opaque, stable user identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves the caller from request headers.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: HeaderName,
}

impl HeaderIdentity {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    /// `None` when the header is missing, blank or not valid UTF-8.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<UserId> {
        let value = headers.get(&self.header)?.to_str().ok()?.trim();
        if value.is_empty() {
            return None;
        }
        Some(UserId::new(value))
    }
}
