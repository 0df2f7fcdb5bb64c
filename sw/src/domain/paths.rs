//! Declared-path normalization

/// Normalize a declared or touched path for comparison
///
/// Converts separators to `/`, drops `.` segments and leading `./`, and
/// trims trailing slashes. Does not touch the filesystem.
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}
