//! API-key rotation: pick the least-used credential for every model call.
//!
//! Free-tier inference quotas are per key. Spreading calls evenly over a pool
//! of keys multiplies the effective rate limit, and "least used" (rather than
//! plain round-robin) keeps the spread even when callers retry unevenly after
//! failures.
//!
//! The pool is an ordinary value owned by the caller and shared by
//! reference (`Arc<KeyPool>`); there is no process-global rotation state.

use crate::error::ExamError;
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

/// Values that are never real keys.
const PLACEHOLDERS: &[&str] = &["your-api-key-here", "changeme", "xxx"];

/// One API credential. `Debug` and `Display` never print the full secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for the backend request only.
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// First six characters followed by an ellipsis.
    pub fn redacted(&self) -> String {
        let head: String = self.0.chars().take(6).collect();
        format!("{head}…")
    }

    fn is_placeholder(raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty()
            || trimmed.starts_with('<')
            || PLACEHOLDERS
                .iter()
                .any(|p| trimmed.eq_ignore_ascii_case(p))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// A fixed set of credentials with per-credential call counts.
pub struct KeyPool {
    slots: Mutex<Vec<(Credential, u64)>>,
    len: usize,
}

impl KeyPool {
    /// Build a pool, dropping blanks, placeholders and duplicates.
    ///
    /// # Errors
    /// [`ExamError::NoCredentials`] when nothing usable remains.
    pub fn new<I, S>(keys: I) -> Result<Self, ExamError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut slots: Vec<(Credential, u64)> = Vec::new();
        for raw in keys {
            let raw = raw.as_ref();
            if Credential::is_placeholder(raw) {
                continue;
            }
            let cred = Credential::new(raw.trim());
            if !slots.iter().any(|(c, _)| *c == cred) {
                slots.push((cred, 0));
            }
        }
        if slots.is_empty() {
            return Err(ExamError::NoCredentials);
        }
        let len = slots.len();
        Ok(Self {
            slots: Mutex::new(slots),
            len,
        })
    }

    /// Read keys from `GEMINI_API_KEYS` (comma separated) and `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ExamError> {
        let mut keys: Vec<String> = std::env::var("GEMINI_API_KEYS")
            .map(|list| list.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        if let Ok(single) = std::env::var("GEMINI_API_KEY") {
            keys.push(single);
        }
        Self::new(keys)
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Select the least-used credential (first in pool order on ties) and
    /// count the call against it.
    pub fn acquire(&self) -> Credential {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut best = 0;
        for (i, (_, used)) in slots.iter().enumerate() {
            if *used < slots[best].1 {
                best = i;
            }
        }
        let slot = &mut slots[best];
        slot.1 += 1;
        debug!("Using API key {} (call #{})", slot.0, slot.1);
        slot.0.clone()
    }

    /// Snapshot of `(credential, calls)` in pool order.
    pub fn usage(&self) -> Vec<(Credential, u64)> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("usage", &self.usage())
            .finish()
    }
}
