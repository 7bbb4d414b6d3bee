//! Entry classification by file extension, for preview tooling

use std::fmt;

/// Broad media category of an entry, judged by extension alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    /// Raster image formats
    Image,
    /// Plain text, scripts, and markup
    Text,
    /// Audio streams
    Audio,
    /// Video streams
    Video,
    /// Anything else, including compiled script containers
    Unknown,
}

impl fmt::Display for PreviewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "bmp", "tiff", "png", "webp", "exif", "ico", "gif",
];
const AUDIO_EXTENSIONS: &[&str] = &["aac", "ac3", "flac", "mp3", "wma", "wav", "ogg", "cpc"];
const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "flv", "mov", "mp4", "ogv", "swf", "mpg", "mpeg", "avi", "mkv", "wmv", "webm",
];
const TEXT_EXTENSIONS: &[&str] = &[
    "py", "rpy~", "rpy", "txt", "log", "nfo", "htm", "html", "xml", "json", "yaml", "csv",
];
const SCRIPT_EXTENSIONS: &[&str] = &["rpyc~", "rpyc", "rpymc~", "rpymc"];

/// Classify an entry path into a preview kind.
///
/// Compiled scripts come back [`PreviewKind::Unknown`]: their content is
/// a serialized container, not something to render directly.
pub fn classify(entry_path: &str) -> PreviewKind {
    let Some(ext) = extension_of(entry_path) else {
        return PreviewKind::Unknown;
    };
    let ext = ext.to_ascii_lowercase();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        PreviewKind::Image
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        PreviewKind::Text
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        PreviewKind::Audio
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        PreviewKind::Video
    } else {
        PreviewKind::Unknown
    }
}

/// Whether the entry is a compiled RenPy script container
pub fn is_compiled_script(entry_path: &str) -> bool {
    match extension_of(entry_path) {
        Some(ext) => SCRIPT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Extension after the last dot of the final path segment
fn extension_of(entry_path: &str) -> Option<&str> {
    let name = entry_path.rsplit(['/', '\\']).next()?;
    let dot = name.rfind('.')?;
    let ext = &name[dot + 1..];
    (!ext.is_empty()).then_some(ext)
}
