//! Process-unique identities for supervisors.
//!
//! Every supervisor carries an [`Ident`] used only for log correlation.
//! Identities are never reused within a process; the counter is global and
//! monotonic.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global identity counter.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a supervisor, rendered as `kind-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ident {
    kind: &'static str,
    n: u64,
}

impl Ident {
    /// Allocates the next identity for the given component kind.
    pub fn next(kind: &'static str) -> Self {
        Self {
            kind,
            n: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Component kind this identity was allocated for.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_are_unique_and_render_with_kind() {
        let a = Ident::next("producer");
        let b = Ident::next("producer");
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("producer-"));
        assert_eq!(a.kind(), "producer");
    }
}
