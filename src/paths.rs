//! Logical path helpers.
//!
//! Index paths are slash-rooted strings (`/`, `/docs`, `/docs/a.txt`).
//! Every prefix test here works on whole segments, so `/a/b` is an
//! ancestor of `/a/b/c` but never of `/a/bb`.

/// Normalize a logical path: collapse duplicate slashes, drop `.`,
/// resolve `..` (never above the root) and strip the trailing slash.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    join_segments(&segments)
}

fn join_segments(segments: &[&str]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for s in segments {
        out.push('/');
        out.push_str(s);
    }
    out
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// True when `path` lies strictly below `base`.
pub fn is_within(path: &str, base: &str) -> bool {
    if base == "/" {
        return path != "/" && path.starts_with('/');
    }
    path.len() > base.len()
        && path.starts_with(base)
        && path.as_bytes()[base.len()] == b'/'
}

/// True when `path` is `base` itself or lies below it.
pub fn is_within_or_self(path: &str, base: &str) -> bool {
    path == base || is_within(path, base)
}

/// Re-root `path` from `old_base` onto `new_base`.
///
/// Returns `None` when `path` is not `old_base` or one of its descendants.
pub fn rebase(path: &str, old_base: &str, new_base: &str) -> Option<String> {
    let path_segments = segments(path);
    let old_segments = segments(old_base);
    if path_segments.len() < old_segments.len() {
        return None;
    }
    if path_segments[..old_segments.len()] != old_segments[..] {
        return None;
    }
    let mut rebuilt = segments(new_base);
    rebuilt.extend_from_slice(&path_segments[old_segments.len()..]);
    Some(join_segments(&rebuilt))
}

/// Path of `path` relative to `base`, without a leading slash.
pub fn strip_base<'a>(path: &'a str, base: &str) -> Option<&'a str> {
    if !is_within(path, base) {
        return None;
    }
    if base == "/" {
        Some(&path[1..])
    } else {
        Some(&path[base.len() + 1..])
    }
}

/// Prefix shared by every direct child of `dir` (`/` for the root).
pub fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir)
    }
}

pub fn join(dir: &str, name: &str) -> String {
    format!("{}{}", child_prefix(dir), name)
}

/// Last segment of the path, empty for the root.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("docs/"), "/docs");
        assert_eq!(normalize("//docs//./a.txt"), "/docs/a.txt");
        assert_eq!(normalize("/docs/../../etc"), "/etc");
    }

    #[test]
    fn test_is_within_respects_segments() {
        assert!(is_within("/a/b/file.txt", "/a/b"));
        assert!(!is_within("/a/bb/file.txt", "/a/b"));
        assert!(!is_within("/a/b", "/a/b"));
        assert!(is_within_or_self("/a/b", "/a/b"));
        assert!(is_within("/a", "/"));
        assert!(!is_within("/", "/"));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/b/file.txt", "/a/b", "/a/bee").as_deref(), Some("/a/bee/file.txt"));
        assert_eq!(rebase("/a/b", "/a/b", "/a/bee").as_deref(), Some("/a/bee"));
        assert_eq!(rebase("/a/bb/file.txt", "/a/b", "/a/bee"), None);
        assert_eq!(rebase("/x/$$$b/y", "/x/$$$b", "/z").as_deref(), Some("/z/y"));
    }

    #[test]
    fn test_strip_base() {
        assert_eq!(strip_base("/team/x.txt", "/team"), Some("x.txt"));
        assert_eq!(strip_base("/teammate/x.txt", "/team"), None);
        assert_eq!(strip_base("/x.txt", "/"), Some("x.txt"));
    }

    #[test]
    fn test_children_helpers() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(file_name("/a/b.txt"), "b.txt");
        assert_eq!(file_name("/"), "");
    }
}
