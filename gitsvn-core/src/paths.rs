//! Repository path helpers
//!
//! Paths are repository-relative, slash-separated and never start or end
//! with a slash; the empty string is the repository root.

/// Strip leading/trailing slashes and collapse duplicate separators.
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for part in path.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(part);
    }
    out
}

/// Join a normalized prefix with a relative name.
pub fn join(prefix: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    if name.is_empty() {
        return prefix.to_string();
    }
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Parent directory; the root's parent is the root itself.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Final path component.
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Name of the direct child of `dir` on the way to `path`, if `path` is
/// inside `dir`.
pub fn child_name<'a>(dir: &str, path: &'a str) -> Option<&'a str> {
    let rest = if dir.is_empty() {
        path
    } else {
        path.strip_prefix(dir)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    Some(rest.split('/').next().unwrap_or(rest))
}

/// True when `dir` is `path` or one of its ancestors (segment-aware).
pub fn is_ancestor(dir: &str, path: &str) -> bool {
    if dir.is_empty() {
        return true;
    }
    match path.strip_prefix(dir) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a/b/"), "a/b");
        assert_eq!(normalize("a//b"), "a/b");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("./a"), "a");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("a", "b/c"), "a/b/c");
        assert_eq!(join("", ""), "");
    }

    #[test]
    fn test_parent_and_base() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
        assert_eq!(base_name("a/b/c"), "c");
        assert_eq!(base_name("a"), "a");
    }

    #[test]
    fn test_child_name() {
        assert_eq!(child_name("", "a/b"), Some("a"));
        assert_eq!(child_name("a", "a/b/c"), Some("b"));
        assert_eq!(child_name("a", "a"), None);
        assert_eq!(child_name("a", "ab/c"), None);
    }

    #[test]
    fn test_is_ancestor() {
        assert!(is_ancestor("", "a"));
        assert!(is_ancestor("a", "a"));
        assert!(is_ancestor("a", "a/b"));
        assert!(!is_ancestor("a", "ab"));
        assert!(!is_ancestor("a/b", "a"));
    }
}
