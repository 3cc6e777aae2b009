//! Credentials supplied by the realtime connection component

use serde::{Deserialize, Serialize};

use crate::constants::ANONYMOUS_USER_PREFIX;

/// Identifier of the realtime connection, attached to requests that need it.
pub type ConnectionId = String;

/// Auth token of the current user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub raw: String,
    pub user_id: String,
}

impl Token {
    pub fn new(raw: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { raw: raw.into(), user_id: user_id.into() }
    }

    /// Anonymous tokens authenticate with the anonymous auth type and never
    /// send an `Authorization` header.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.starts_with(ANONYMOUS_USER_PREFIX)
    }
}

// Never print the raw token.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token").field("user_id", &self.user_id).finish_non_exhaustive()
    }
}
