//! Path splitting and normalisation.
//!
//! A path is split into its final component (`head`) and the directory
//! part (`tail`). Relative tails carry a canonical `./` or `../` marker.

use serde::{Deserialize, Serialize};
use t2fs_error::{Result, T2fsError};
use t2fs_types::{DOT, DOT_DOT};

/// A path split for lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    /// Final component. `None` only for the root path.
    pub head: Option<String>,
    /// Directory holding `head`.
    pub tail: String,
    /// `tail` joined with `head`.
    pub both: String,
}

impl ResolvedPath {
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.head.is_none()
    }

    /// True for a trailing `.` or `..`, which name a directory rather than an entry.
    #[must_use]
    pub fn head_is_dot(&self) -> bool {
        matches!(self.head.as_deref(), Some(DOT | DOT_DOT))
    }
}

/// Split `path` into head and tail.
///
/// Fails with `InvalidPath` for an empty path or one longer than `max_len`
/// bytes.
pub fn resolve_path(path: &str, max_len: usize) -> Result<ResolvedPath> {
    if path.is_empty() {
        return Err(T2fsError::InvalidPath("empty path".to_owned()));
    }
    if path.len() > max_len {
        return Err(T2fsError::InvalidPath(format!(
            "path is {} bytes, limit is {max_len}",
            path.len()
        )));
    }
    if path.contains('\0') {
        return Err(T2fsError::InvalidPath("path contains NUL".to_owned()));
    }

    let absolute = path.starts_with('/');
    let mut tokens: Vec<&str> = path.split('/').filter(|t| !t.is_empty()).collect();
    let Some(head) = tokens.pop() else {
        // "/", "//", ...
        return Ok(ResolvedPath {
            head: None,
            tail: "/".to_owned(),
            both: "/".to_owned(),
        });
    };

    let tail = if absolute {
        format!("/{}", tokens.join("/"))
    } else {
        let marker = match tokens.first() {
            Some(&DOT_DOT) => "../",
            _ => "./",
        };
        if matches!(tokens.first(), Some(&(DOT | DOT_DOT))) {
            tokens.remove(0);
        }
        format!("{marker}{}", tokens.join("/"))
    };
    let both = join(&tail, head);
    Ok(ResolvedPath {
        head: Some(head.to_owned()),
        tail,
        both,
    })
}

/// `dir` + `/` + `name`, without doubling the separator.
#[must_use]
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split(path: &str) -> ResolvedPath {
        resolve_path(path, 1024).unwrap()
    }

    #[test]
    fn root_has_no_head() {
        let root = split("/");
        assert!(root.is_root());
        assert_eq!(root.both, "/");
        assert!(split("///").is_root());
    }

    #[test]
    fn single_relative_component_gets_dot_tail() {
        let p = split("file.txt");
        assert_eq!(p.head.as_deref(), Some("file.txt"));
        assert_eq!(p.tail, "./");
        assert_eq!(p.both, "./file.txt");
    }

    #[test]
    fn leading_dot_is_canonicalised() {
        assert_eq!(split("./a/b").tail, "./a");
        assert_eq!(split("./a/b").both, "./a/b");
        assert_eq!(split("./x").tail, "./");
    }

    #[test]
    fn leading_dotdot_becomes_parent_marker() {
        let p = split("../dir/f");
        assert_eq!(p.tail, "../dir");
        assert_eq!(p.head.as_deref(), Some("f"));
        assert_eq!(split("../f").tail, "../");
    }

    #[test]
    fn absolute_paths_accumulate_tail() {
        let p = split("/dir5/dir6/dir7");
        assert_eq!(p.tail, "/dir5/dir6");
        assert_eq!(p.head.as_deref(), Some("dir7"));
        assert_eq!(p.both, "/dir5/dir6/dir7");
        assert_eq!(split("/a").tail, "/");
        assert_eq!(split("/a//b/").both, "/a/b");
    }

    #[test]
    fn dot_heads_are_flagged() {
        assert!(split("..").head_is_dot());
        assert!(split("/a/.").head_is_dot());
        assert!(!split("/a/b").head_is_dot());
    }

    #[test]
    fn empty_and_oversized_paths_fail() {
        assert!(matches!(
            resolve_path("", 1024),
            Err(T2fsError::InvalidPath(_))
        ));
        let long = format!("/{}", "a".repeat(1024));
        assert!(matches!(
            resolve_path(&long, 1024),
            Err(T2fsError::InvalidPath(_))
        ));
        assert!(resolve_path(&long[..1024], 1024).is_ok());
    }

    #[test]
    fn join_does_not_double_separators() {
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/a", "x"), "/a/x");
    }

    proptest! {
        #[test]
        fn absolute_split_rejoins(parts in proptest::collection::vec("[a-z0-9]{1,8}", 1..6)) {
            let path = format!("/{}", parts.join("/"));
            let p = split(&path);
            prop_assert_eq!(p.both, path);
            prop_assert_eq!(p.head.as_deref(), parts.last().map(String::as_str));
        }
    }
}
