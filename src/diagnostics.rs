// src/diagnostics.rs

//! Scoped error and warning accumulation
//!
//! Build and resolver operations report problems into a [`Diagnostics`]
//! value owned by the caller instead of aborting on the first one. The caller
//! decides severity afterwards. Scopes form an explicit stack: push a scope,
//! run an operation, inspect only what that operation produced, then either
//! merge those messages into the enclosing scope or discard them.
//!
//! ```ignore
//! let mut diag = Diagnostics::new();
//! diag.push_scope();
//! builder.add_source(&source, &mut diag)?;
//! if diag.pending_error() {
//!     // only errors raised by add_source are visible here
//! }
//! diag.pop_scope(true);
//! ```

use std::fmt;
use strum_macros::Display;
use tracing::{info, warn};

/// How serious a recorded message is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Severity {
    #[strum(serialize = "N")]
    Notice,
    #[strum(serialize = "W")]
    Warning,
    #[strum(serialize = "E")]
    Error,
}

/// A single recorded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
}

impl Message {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.text)
    }
}

/// Stack of message scopes
///
/// There is always at least one (base) scope.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    scopes: Vec<Vec<Message>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            scopes: vec![Vec::new()],
        }
    }

    fn current_mut(&mut self) -> &mut Vec<Message> {
        if self.scopes.is_empty() {
            self.scopes.push(Vec::new());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn record(&mut self, severity: Severity, text: String) {
        self.current_mut().push(Message { severity, text });
    }

    /// Record an error; sets the pending-error state of the current scope
    pub fn error(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!("error: {}", text);
        self.record(Severity::Error, text);
    }

    pub fn warning(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!("{}", text);
        self.record(Severity::Warning, text);
    }

    pub fn notice(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.record(Severity::Notice, text);
    }

    /// Open a new innermost scope
    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    /// Close the innermost scope
    ///
    /// With `merge` the scope's messages are appended to the enclosing scope,
    /// otherwise they are dropped. Popping the base scope only clears it when
    /// `merge` is false.
    pub fn pop_scope(&mut self, merge: bool) {
        if self.scopes.len() <= 1 {
            if !merge {
                self.current_mut().clear();
            }
            return;
        }
        if let Some(messages) = self.scopes.pop()
            && merge
        {
            self.current_mut().extend(messages);
        }
    }

    /// Number of open scopes, base included
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Messages recorded in the innermost scope, oldest first
    pub fn current(&self) -> &[Message] {
        self.scopes.last().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the innermost scope holds an error
    pub fn pending_error(&self) -> bool {
        self.current().iter().any(Message::is_error)
    }

    /// Whether any open scope holds an error
    pub fn any_error(&self) -> bool {
        self.scopes.iter().flatten().any(Message::is_error)
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Take every message of the innermost scope, oldest first
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(self.current_mut())
    }

    /// Most recent error text in the innermost scope
    pub fn last_error(&self) -> Option<&str> {
        self.current()
            .iter()
            .rev()
            .find(|m| m.is_error())
            .map(|m| m.text.as_str())
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
