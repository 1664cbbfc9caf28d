//! Destination path derivation, sanitization, and collision avoidance.
//!
//! Assets land under `<destination>/<host>/<url path>` so that a bundle mirrors
//! the relative layout of the site it was captured from. Names that would
//! clobber an earlier download get a timestamp spliced in.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Response metadata that influences the on-disk name of an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// `Content-Type` header value, if any.
    pub content_type: Option<String>,
    /// Filename suggested by `Content-Disposition`, if any.
    pub suggested_filename: Option<String>,
}

/// Milliseconds since the Unix epoch, `0` if the clock is before it.
pub(crate) fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Guess file extension (without dot) from a Content-Type header.
pub(crate) fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let ext = match mime.as_str() {
        "text/html" => "html",
        "text/plain" => "txt",
        "text/css" => "css",
        "text/javascript" | "application/javascript" => "js",
        "application/json" => "json",
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        "font/woff" => "woff",
        "font/woff2" => "woff2",
        "application/zip" => "zip",
        "text/vtt" => "vtt",
        "video/mp4" => "mp4",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        _ => return None,
    };
    Some(ext)
}

/// Extension forced onto media responses regardless of the URL's own extension.
///
/// Any `video/*` becomes `mp4`, WAV audio `wav`, every other `audio/*` `mp3`.
pub(crate) fn forced_media_extension(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if mime.starts_with("video/") {
        Some("mp4")
    } else if matches!(mime.as_str(), "audio/wav" | "audio/x-wav" | "audio/wave") {
        Some("wav")
    } else if mime.starts_with("audio/") {
        Some("mp3")
    } else {
        None
    }
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();
        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Sanitizes a single path segment for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Splits `name` into stem and extension when it carries a plausible one.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let ext = &name[pos + 1..];
            if (1..=8).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&name[..pos], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

/// Returns the lowercase extension of the URL's final path segment, if any.
pub(crate) fn url_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    split_extension(last).1.map(str::to_ascii_lowercase)
}

/// Mirrors a URL as `<host>/<dirs...>` plus its final segment (if non-empty).
///
/// Segments are percent-decoded and sanitized; `.` and `..` are dropped so
/// the result can never escape the destination folder.
#[must_use]
pub fn relative_destination(url: &Url) -> (PathBuf, Option<String>) {
    let mut dir = PathBuf::new();
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => "local".to_string(),
    };
    dir.push(sanitize_filename(&host));

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|s| !s.is_empty() && *s != "." && *s != "..")
                .map(|s| {
                    let decoded = urlencoding::decode(s).map_or_else(|_| s.to_string(), |d| d.into_owned());
                    sanitize_filename(&decoded)
                })
                .collect()
        })
        .unwrap_or_default();

    let ends_with_slash = url.path().ends_with('/');
    let last = if ends_with_slash { None } else { segments.pop() };
    for segment in segments {
        dir.push(segment);
    }
    (dir, last)
}

/// Computes where a fetched asset should be stored under `destination`.
///
/// The URL path supplies the directory and name. A final segment without an
/// extension is replaced by the suggested filename, else by a timestamp
/// placeholder. Media content types force `mp4` / `mp3` / `wav`.
#[must_use]
pub fn derive_destination(destination: &Path, url: &Url, metadata: &ResponseMetadata) -> PathBuf {
    let (dir, last) = relative_destination(url);

    let suggested = metadata
        .suggested_filename
        .as_deref()
        .map(sanitize_filename)
        .filter(|name| split_extension(name).1.is_some());

    let mut filename = match last {
        Some(segment) if split_extension(&segment).1.is_some() => segment,
        _ => suggested.unwrap_or_else(|| {
            let ext = metadata
                .content_type
                .as_deref()
                .and_then(extension_from_content_type);
            match ext {
                Some(ext) => format!("download_{}.{ext}", unix_millis()),
                None => format!("download_{}", unix_millis()),
            }
        }),
    };

    if let Some(forced) = metadata
        .content_type
        .as_deref()
        .and_then(forced_media_extension)
    {
        let (stem, ext) = split_extension(&filename);
        if ext.is_none_or(|ext| !ext.eq_ignore_ascii_case(forced)) {
            filename = format!("{stem}.{forced}");
        }
    }

    destination.join(dir).join(filename)
}

/// Returns `path` if free, otherwise a sibling with a timestamp spliced into the name.
///
/// Example: `a.png` -> `a_1718000000000.png`, then `a_1718000000000_2.png`, ...
#[must_use]
pub fn resolve_collision(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let (stem, ext) = split_extension(&name);
    let stamp = unix_millis();
    let with_ext = |base: String| match ext {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    };

    let candidate = parent.join(with_ext(format!("{stem}_{stamp}")));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 2u32;
    loop {
        let candidate = parent.join(with_ext(format!("{stem}_{stamp}_{counter}")));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Relative reference from directory `from_dir` to file `to`, `/`-separated.
#[must_use]
pub fn relative_path(from_dir: &Path, to: &Path) -> String {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let target: Vec<Component<'_>> = to.components().collect();
    let common = from
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &target[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn url(value: &str) -> Url {
        Url::parse(value).unwrap()
    }

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_parse_content_disposition_variants() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="lecture.mp4""#).as_deref(),
            Some("lecture.mp4")
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=notes.pdf; size=3").as_deref(),
            Some("notes.pdf")
        );
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''caf%C3%A9.pdf").as_deref(),
            Some("café.pdf")
        );
        assert!(parse_content_disposition("inline").is_none());
    }

    #[test]
    fn test_relative_destination_mirrors_host_and_path() {
        let (dir, last) = relative_destination(&url("https://cdn.example.com/img/icons/a.png?v=2"));
        assert_eq!(dir, PathBuf::from("cdn.example.com/img/icons"));
        assert_eq!(last.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_relative_destination_drops_traversal() {
        let (dir, last) = relative_destination(&url("https://example.com/a/%2E%2E/b.css"));
        assert!(!dir.components().any(|c| c == Component::ParentDir));
        assert_eq!(last.as_deref(), Some("b.css"));
    }

    #[test]
    fn test_relative_destination_directory_url_has_no_name() {
        let (dir, last) = relative_destination(&url("https://example.com/docs/"));
        assert_eq!(dir, PathBuf::from("example.com/docs"));
        assert!(last.is_none());
    }

    #[test]
    fn test_derive_destination_keeps_url_name() {
        let dest = derive_destination(
            Path::new("/bundle"),
            &url("https://example.com/css/site.css"),
            &ResponseMetadata::default(),
        );
        assert_eq!(dest, PathBuf::from("/bundle/example.com/css/site.css"));
    }

    #[test]
    fn test_derive_destination_uses_suggested_filename_without_extension() {
        let metadata = ResponseMetadata {
            content_type: Some("application/pdf".to_string()),
            suggested_filename: Some("syllabus.pdf".to_string()),
        };
        let dest = derive_destination(
            Path::new("/bundle"),
            &url("https://example.com/files/123/download"),
            &metadata,
        );
        assert_eq!(dest, PathBuf::from("/bundle/example.com/files/123/syllabus.pdf"));
    }

    #[test]
    fn test_derive_destination_timestamp_placeholder() {
        let metadata = ResponseMetadata {
            content_type: Some("image/png".to_string()),
            suggested_filename: None,
        };
        let dest = derive_destination(
            Path::new("/bundle"),
            &url("https://example.com/avatar"),
            &metadata,
        );
        let name = dest.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("download_"), "got {name}");
        assert!(name.ends_with(".png"), "got {name}");
    }

    #[test]
    fn test_derive_destination_forces_media_extension() {
        let video = ResponseMetadata {
            content_type: Some("video/quicktime".to_string()),
            suggested_filename: None,
        };
        let dest = derive_destination(
            Path::new("/bundle"),
            &url("https://media.example.com/clip.mov"),
            &video,
        );
        assert_eq!(dest.file_name().unwrap(), "clip.mp4");

        let wav = ResponseMetadata {
            content_type: Some("audio/x-wav".to_string()),
            suggested_filename: None,
        };
        let dest = derive_destination(Path::new("/b"), &url("https://m.example.com/s.bin"), &wav);
        assert_eq!(dest.file_name().unwrap(), "s.wav");

        let mp3 = ResponseMetadata {
            content_type: Some("audio/mpeg".to_string()),
            suggested_filename: None,
        };
        let dest = derive_destination(Path::new("/b"), &url("https://m.example.com/track"), &mp3);
        assert!(dest.file_name().unwrap().to_str().unwrap().ends_with(".mp3"));
    }

    #[test]
    fn test_resolve_collision_splices_timestamp() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.png");
        assert_eq!(resolve_collision(&original), original);

        std::fs::write(&original, b"first").unwrap();
        let second = resolve_collision(&original);
        assert_ne!(second, original);
        let name = second.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("a_") && name.ends_with(".png"), "got {name}");

        std::fs::write(&second, b"second").unwrap();
        let third = resolve_collision(&original);
        assert_ne!(third, original);
        assert_ne!(third, second);
    }

    #[test]
    fn test_relative_path_between_siblings_and_parents() {
        assert_eq!(
            relative_path(Path::new("/b/site/css"), Path::new("/b/site/img/a.png")),
            "../img/a.png"
        );
        assert_eq!(
            relative_path(Path::new("/b"), Path::new("/b/cdn.example.com/a.png")),
            "cdn.example.com/a.png"
        );
    }

    #[test]
    fn test_forced_media_extension_ignores_other_types() {
        assert_eq!(forced_media_extension("image/png"), None);
        assert_eq!(forced_media_extension("video/webm; codecs=vp9"), Some("mp4"));
    }
}
