//! Public URLs for stored images
//!
//! URLs always use `/`, whatever separator the host platform puts in paths.

use crate::models::PathConfig;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Replace every `separator` in `path` with `/`.
pub fn normalize_separators(path: &str, separator: char) -> String {
    if separator == '/' {
        path.to_string()
    } else {
        path.replace(separator, "/")
    }
}

/// `<webroot>/<relative>` with forward slashes only.
pub fn public_url(webroot: &str, relative: &Path) -> String {
    let relative = normalize_separators(&relative.to_string_lossy(), MAIN_SEPARATOR);
    join(webroot, &relative)
}

fn join(webroot: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        webroot.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Map a URL produced by [`public_url`] back to the file it names.
///
/// Returns `None` for URLs outside the images tree or containing `.`, `..`
/// or empty segments.
pub fn path_for_url(paths: &PathConfig, url: &str) -> Option<PathBuf> {
    let prefix = join(
        &paths.webroot,
        &normalize_separators(&paths.images_rel_path, MAIN_SEPARATOR),
    );
    let prefix = prefix.trim_end_matches('/');

    let rest = url.strip_prefix(prefix)?.strip_prefix('/')?;

    let mut path = paths.images_path.clone();
    for segment in rest.split('/') {
        match segment {
            "" | "." | ".." => return None,
            segment if segment.contains('\\') => return None,
            segment => path.push(segment),
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_backslashes() {
        assert_eq!(
            normalize_separators("content\\images\\2024\\03\\cat.jpg", '\\'),
            "content/images/2024/03/cat.jpg"
        );
    }

    #[test]
    fn test_normalize_is_identity_for_slash() {
        assert_eq!(
            normalize_separators("content/images/cat.jpg", '/'),
            "content/images/cat.jpg"
        );
    }

    #[test]
    fn test_public_url_with_empty_webroot_is_root_relative() {
        let url = public_url("", Path::new("content/images/2024/03/cat.jpg"));
        assert_eq!(url, "/content/images/2024/03/cat.jpg");
    }

    #[test]
    fn test_public_url_trims_trailing_slash() {
        let url = public_url("https://blog.example.com/", Path::new("content/images/cat.jpg"));
        assert_eq!(url, "https://blog.example.com/content/images/cat.jpg");
    }

    #[test]
    fn test_public_url_has_no_platform_separator() {
        let relative = Path::new("content").join("images").join("2024").join("cat.jpg");
        let url = public_url("/blog", &relative);
        assert_eq!(url, "/blog/content/images/2024/cat.jpg");
        assert!(!url.contains('\\'));
    }

    #[test]
    fn test_path_for_url_inverts_public_url() {
        let paths = PathConfig::new("content/images", "/srv/images", "https://blog.example.com");
        let url = public_url(&paths.webroot, Path::new("content/images/2024/03/cat.jpg"));

        assert_eq!(
            path_for_url(&paths, &url),
            Some(PathBuf::from("/srv/images/2024/03/cat.jpg"))
        );
    }

    #[test]
    fn test_path_for_url_rejects_foreign_and_traversal_urls() {
        let paths = PathConfig::new("content/images", "/srv/images", "");

        assert_eq!(path_for_url(&paths, "/assets/cat.jpg"), None);
        assert_eq!(path_for_url(&paths, "/content/imagesX/cat.jpg"), None);
        assert_eq!(path_for_url(&paths, "/content/images/../secret"), None);
        assert_eq!(path_for_url(&paths, "/content/images/2024//cat.jpg"), None);
        assert_eq!(path_for_url(&paths, "/content/images/"), None);
    }
}
