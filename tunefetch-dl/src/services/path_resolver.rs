//! Output path resolver
//!
//! Pure mapping from job context and track metadata to a destination path:
//! - playlist layout: `<root>/<Playlist>/<Artist> - <Title>.mp3`
//! - library layout: `<root>/<Artist>/<Album>/<Artist> - <Title>.mp3`,
//!   or `<root>/<Artist>/<Artist> - <Title>.mp3` without album metadata

use crate::models::{JobContext, OutputLayout, TrackMetadata};
use std::path::{Path, PathBuf};

/// Used when a component sanitizes to nothing
pub const UNKNOWN_COMPONENT: &str = "Unknown";

/// Longest path component produced, in characters
pub const MAX_COMPONENT_CHARS: usize = 120;

pub const OUTPUT_EXTENSION: &str = "mp3";

pub fn resolve(ctx: &JobContext, track: &TrackMetadata) -> PathBuf {
    let artist = sanitize_component(&track.artist);
    let title = sanitize_component(&track.title);
    let file_name = format!("{} - {}.{}", artist, title, OUTPUT_EXTENSION);

    match &ctx.layout {
        OutputLayout::Playlist { name } => ctx
            .download_root
            .join(sanitize_component(name))
            .join(file_name),
        OutputLayout::Library => {
            let artist_dir = ctx.download_root.join(&artist);
            match track.album.as_deref().filter(|a| !a.trim().is_empty()) {
                Some(album) => artist_dir.join(sanitize_component(album)).join(file_name),
                None => artist_dir.join(file_name),
            }
        }
    }
}

/// `<stem> (n).<ext>` next to `path`; `n <= 1` is `path` itself
pub fn numbered(path: &Path, n: u32) -> PathBuf {
    if n <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

/// Make a string safe as a single path component on all major filesystems.
///
/// Replaces path separators, reserved characters and control characters with
/// `_`, collapses whitespace, strips leading/trailing dots and spaces and caps
/// the length. Deterministic; never returns an empty string, `.` or `..`.
pub fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(MAX_COMPONENT_CHARS).collect();
    let capped = capped.trim_end_matches(|c: char| c == '.' || c == ' ');

    if capped.is_empty() {
        UNKNOWN_COMPONENT.to_string()
    } else {
        capped.to_string()
    }
}

/// Playlist name for vibe jobs: first 50 characters of the description,
/// anything outside `[A-Za-z0-9_-]` replaced with `_`
pub fn vibe_playlist_name(description: &str) -> String {
    let name: String = description
        .chars()
        .take(50)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.trim_matches('_').is_empty() {
        "vibe_playlist".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobId, RequestKind};
    use std::path::Path;

    fn ctx(layout: OutputLayout) -> JobContext {
        JobContext {
            job_id: JobId::new(),
            kind: RequestKind::DirectMediaUrl,
            layout,
            download_root: PathBuf::from("downloads"),
        }
    }

    fn track(artist: &str, title: &str, album: Option<&str>) -> TrackMetadata {
        TrackMetadata {
            artist: artist.into(),
            title: title.into(),
            album: album.map(str::to_string),
        }
    }

    #[test]
    fn test_library_layout_with_album() {
        let path = resolve(
            &ctx(OutputLayout::Library),
            &track("Miles Davis", "So What", Some("Kind of Blue")),
        );
        assert_eq!(
            path,
            Path::new("downloads/Miles Davis/Kind of Blue/Miles Davis - So What.mp3")
        );
    }

    #[test]
    fn test_library_layout_without_album() {
        let path = resolve(&ctx(OutputLayout::Library), &track("Nina Simone", "Sinnerman", None));
        assert_eq!(path, Path::new("downloads/Nina Simone/Nina Simone - Sinnerman.mp3"));

        let blank = resolve(&ctx(OutputLayout::Library), &track("Nina Simone", "Sinnerman", Some("  ")));
        assert_eq!(blank, path);
    }

    #[test]
    fn test_playlist_layout() {
        let path = resolve(
            &ctx(OutputLayout::Playlist {
                name: "Road Trip".into(),
            }),
            &track("AC/DC", "T.N.T.", Some("ignored")),
        );
        assert_eq!(path, Path::new("downloads/Road Trip/AC_DC - T.N.T.mp3"));
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_component("What? Why: <Now>|*"), "What_ Why_ _Now___");
        assert_eq!(sanitize_component("a\\b/c"), "a_b_c");
        assert_eq!(sanitize_component("line\nbreak\ttab"), "line break tab");
    }

    #[test]
    fn test_sanitize_never_empty_or_relative() {
        assert_eq!(sanitize_component(""), UNKNOWN_COMPONENT);
        assert_eq!(sanitize_component("   "), UNKNOWN_COMPONENT);
        assert_eq!(sanitize_component(".."), UNKNOWN_COMPONENT);
        assert_eq!(sanitize_component(" .hidden. "), "hidden");
    }

    #[test]
    fn test_sanitize_caps_length_on_char_boundary() {
        let long = "é".repeat(300);
        let out = sanitize_component(&long);
        assert_eq!(out.chars().count(), MAX_COMPONENT_CHARS);
    }

    #[test]
    fn test_sanitize_is_deterministic() {
        let input = "  Sigur Rós / ( ) ? ";
        assert_eq!(sanitize_component(input), sanitize_component(input));
    }

    #[test]
    fn test_numbered_keeps_directory_and_extension() {
        let path = Path::new("downloads/Mix/A - One.mp3");
        assert_eq!(numbered(path, 1), path);
        assert_eq!(numbered(path, 2), Path::new("downloads/Mix/A - One (2).mp3"));
        assert_eq!(numbered(Path::new("out/track"), 3), Path::new("out/track (3)"));
    }

    #[test]
    fn test_vibe_playlist_name() {
        assert_eq!(
            vibe_playlist_name("upbeat indie rock"),
            "upbeat_indie_rock"
        );
        assert_eq!(vibe_playlist_name(&"x".repeat(80)).len(), 50);
        assert_eq!(vibe_playlist_name("!!!"), "vibe_playlist");
    }
}
