//! Path component splitting and mount-prefix matching.

/// Returns whether `path` starts with `/`.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Splits `path` into non-empty components, ignoring repeated slashes.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Finds the longest mount prefix in `mounts` under which `path`
/// could live: the prefix must match `path` byte-for-byte, and the
/// character in `path` immediately after the prefix must be `/` or
/// the end of the string (so `/mnt` does not match `/mnt2/x`).
pub fn longest_prefix_match<'m>(
    path: &str,
    mounts: impl Iterator<Item = &'m str>,
) -> Option<&'m str> {
    let mut best: Option<&str> = None;
    for mount in mounts {
        if !path.starts_with(mount) {
            continue;
        }
        let next = path.as_bytes().get(mount.len());
        let boundary_ok = mount == "/" || matches!(next, None | Some(b'/'));
        if !boundary_ok {
            continue;
        }
        if best.is_none_or(|b| mount.len() > b.len()) {
            best = Some(mount);
        }
    }
    best
}

/// Removes a previously matched mount prefix from `path`, returning
/// the remainder with any leading slash stripped.
#[must_use]
pub fn strip_mount_prefix<'a>(path: &'a str, mount: &str) -> &'a str {
    let rest = if mount == "/" {
        path
    } else {
        &path[mount.len()..]
    };
    rest.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_skips_empty_segments() {
        let parts: Vec<_> = components("/a//b/c/").collect();
        assert_eq!(parts, vec!["a", "b", "c"]);
    }

    #[test]
    fn longest_prefix_prefers_more_specific_mount() {
        let mounts = ["/", "/mnt", "/mnt/sda"];
        let found = longest_prefix_match("/mnt/sda/file.txt", mounts.into_iter());
        assert_eq!(found, Some("/mnt/sda"));
    }

    #[test]
    fn longest_prefix_rejects_partial_segment_match() {
        let mounts = ["/mnt"];
        let found = longest_prefix_match("/mnt2/file.txt", mounts.into_iter());
        assert_eq!(found, None);
    }

    #[test]
    fn longest_prefix_exact_path_matches_mount() {
        let mounts = ["/dev"];
        let found = longest_prefix_match("/dev", mounts.into_iter());
        assert_eq!(found, Some("/dev"));
    }

    #[test]
    fn strip_mount_prefix_removes_leading_slash() {
        assert_eq!(strip_mount_prefix("/mnt/sda/file.txt", "/mnt/sda"), "file.txt");
        assert_eq!(strip_mount_prefix("/etc/passwd", "/"), "etc/passwd");
    }
}
