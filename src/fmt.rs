//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Formats an `Option<T>` by printing the inner value directly (no `Some(...)` wrapper).
///
/// Use with `#[debug(with = crate::fmt::opt)]` on fields that are
/// already gated by `#[debug(skip_if = Option::is_none)]`.
pub fn opt<T: fmt::Debug>(value: &Option<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Some(inner) => fmt::Debug::fmt(inner, f),
        None => f.write_str("None"),
    }
}

/// Hides a secret while still showing whether it is set.
///
/// Use with `#[debug(with = crate::fmt::redacted)]`.
pub fn redacted<T: AsRef<str>>(value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value.as_ref().is_empty() {
        f.write_str("\"\"")
    } else {
        f.write_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use custom_debug_derive::Debug;

    #[derive(Debug)]
    struct Secret {
        user: String,
        #[debug(with = crate::fmt::redacted)]
        token: String,
        #[debug(with = crate::fmt::opt)]
        note: Option<String>,
    }

    #[test]
    fn test_redacted_hides_value() {
        let s = Secret {
            user: "alice".to_owned(),
            token: "hunter2".to_owned(),
            note: None,
        };
        let out = format!("{s:?}");
        assert!(out.contains("alice"));
        assert!(out.contains("<redacted>"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("note: None"));
    }

    #[test]
    fn test_opt_prints_inner_value() {
        let s = Secret {
            user: "bob".to_owned(),
            token: String::new(),
            note: Some("hi".to_owned()),
        };
        let out = format!("{s:?}");
        assert!(out.contains("note: \"hi\""));
        assert!(out.contains("token: \"\""));
    }
}
