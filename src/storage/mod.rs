// FILE: src/storage/mod.rs
pub mod change_log;
pub mod connection;
pub mod index_store;
pub mod schema;

// Common exports
pub use change_log::ChangeLog;
pub use connection::Database;
pub use index_store::{EntryValues, IndexEntry, IndexStore};

/// LIKE pattern matching every string that starts with `prefix`.
/// Use with `ESCAPE '\'`.
pub(crate) fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("/docs/"), "/docs/%");
        assert_eq!(like_prefix("/100%_done/"), r"/100\%\_done/%");
        assert_eq!(like_prefix(r"/a\b/"), r"/a\\b/%");
    }
}
