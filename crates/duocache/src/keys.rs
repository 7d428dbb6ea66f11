// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Composite key helpers.
//!
//! A composite key addresses one member of a `{prefix, id}` family:
//! `"{prefix}{separator}{id}"`. The separator is configured on the cache
//! (default `":"`) and may be disabled, in which case prefix and id are
//! simply concatenated.

use std::fmt::{Display, Write};

/// Joins display-able parts with a separator.
///
/// # Examples
///
/// ```
/// use duocache::keys::join;
///
/// assert_eq!(join(":", &[1, 2, 3]), "1:2:3");
/// assert_eq!(join(":", &["only"]), "only");
/// assert_eq!(join::<u32>(":", &[]), "");
/// ```
pub fn join<I: Display>(separator: &str, parts: &[I]) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        write!(out, "{part}").expect("writing to a String cannot fail");
    }
    out
}

/// Builds the composite key for one id of a family.
///
/// # Examples
///
/// ```
/// use duocache::keys::composite;
///
/// assert_eq!(composite("user", ":", &42), "user:42");
/// assert_eq!(composite("user", "", &42), "user42");
/// ```
pub fn composite(prefix: &str, separator: &str, id: &impl Display) -> String {
    format!("{prefix}{separator}{id}")
}

/// Builds the single-flight key for a whole id set, so concurrent callers
/// asking for the same ids share one fan-out.
pub(crate) fn family<I: Display>(prefix: &str, separator: &str, ids: &[I]) -> String {
    format!("{prefix}{separator}[{}]", join(",", ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_empty_and_single() {
        assert_eq!(join::<u32>("-", &[]), "");
        assert_eq!(join("-", &[7]), "7");
    }

    #[test]
    fn join_interleaves_separator() {
        assert_eq!(join(":", &["a", "b", "c"]), "a:b:c");
    }

    #[test]
    fn composite_concatenates_in_order() {
        assert_eq!(composite("p", ":", &"id"), "p:id");
    }

    #[test]
    fn family_is_stable_for_equal_id_sets() {
        assert_eq!(family("p", ":", &[1, 2, 3]), family("p", ":", &[1, 2, 3]));
        assert_ne!(family("p", ":", &[1, 2]), family("p", ":", &[1, 2, 3]));
    }
}
