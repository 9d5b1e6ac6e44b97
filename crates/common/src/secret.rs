//! Redacting wrapper for bearer credentials

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs, zeroed on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Wrap a credential that may be absent or blank. Blank strings count as absent,
    /// the same way an empty cookie carries no session.
    pub fn non_empty(value: Option<String>) -> Option<Self> {
        value.filter(|v| !v.trim().is_empty()).map(Self::new)
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_debug_and_display() {
        let token = Secret::new(String::from("eyJhbGciOi.payload.sig"));
        assert_eq!(format!("{token:?}"), "[REDACTED]");
        assert_eq!(format!("{token}"), "[REDACTED]");
    }

    #[test]
    fn exposes_value() {
        let token: Secret<String> = String::from("rt_abc").into();
        assert_eq!(token.expose(), "rt_abc");
    }

    #[test]
    fn non_empty_treats_blank_as_absent() {
        assert!(Secret::non_empty(None).is_none());
        assert!(Secret::non_empty(Some(String::new())).is_none());
        assert!(Secret::non_empty(Some("  ".into())).is_none());
        assert_eq!(
            Secret::non_empty(Some("at_1".into())).unwrap().expose(),
            "at_1"
        );
    }

    #[test]
    fn debug_of_option_stays_redacted() {
        let token = Secret::non_empty(Some("rt_visible".into()));
        let debug = format!("{token:?}");
        assert!(!debug.contains("rt_visible"), "got: {debug}");
    }
}
