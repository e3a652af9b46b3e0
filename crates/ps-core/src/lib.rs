//! Shared primitives used across Periscope crates.

use thiserror::Error;

/// Result alias used across the workspace.
pub type PeriscopeResult<T> = Result<T, PeriscopeError>;

/// Plumbing error carrying a stable dotted code (`net.http.*`, `proxy.*`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct PeriscopeError {
    pub code: &'static str,
    pub message: String,
}

impl PeriscopeError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the code lives under the given dotted namespace, e.g. `net.tls`.
    pub fn is_in(&self, namespace: &str) -> bool {
        self.code
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }
}

/// Coarse classification of a failed navigation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidInput,
    Network,
    Upstream,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Network => "network",
            Self::Upstream => "upstream",
        }
    }
}

/// Terminal failure of one navigation attempt.
///
/// `Display` renders the user-facing message shown in place of page content,
/// so network and upstream failures must stay distinguishable in wording.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationFailure {
    #[error("\"{input}\" is not a valid address ({reason})")]
    InvalidInput { input: String, reason: String },

    #[error("Could not reach {target}: {detail}. Check the connection and refresh to try again.")]
    Network { target: String, detail: String },

    #[error("{target} responded with HTTP {status}{}", reason_suffix(.status_text))]
    Upstream {
        target: String,
        status: u16,
        status_text: String,
    },
}

impl NavigationFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput { .. } => FailureKind::InvalidInput,
            Self::Network { .. } => FailureKind::Network,
            Self::Upstream { .. } => FailureKind::Upstream,
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn reason_suffix(status_text: &str) -> String {
    let trimmed = status_text.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" {trimmed}")
    }
}
