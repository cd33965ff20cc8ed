//! Decide whether an upstream response is a playlist to rewrite or an opaque
//! payload to stream through untouched.

use crate::proxy::policy::RewritePolicy;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentClass {
    /// Text manifest: buffered and rewritten
    Playlist,
    /// Segments, keys and everything else: streamed byte-for-byte
    Opaque,
}

impl ContentClass {
    /// Metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Playlist => "playlist",
            ContentClass::Opaque => "media",
        }
    }
}

/// Classify from the declared content type and the target path.
///
/// The suffix check is decisive on its own because origins frequently label
/// manifests as `text/plain` or `application/octet-stream`.
pub fn classify(content_type: Option<&str>, target: &Url, policy: &RewritePolicy) -> ContentClass {
    let declared = content_type.is_some_and(|ct| policy.is_playlist_content_type(ct));

    if declared || policy.is_playlist_path(target) {
        ContentClass::Playlist
    } else {
        ContentClass::Opaque
    }
}

/// Content type to use when the origin sends none.
pub fn default_content_type(target: &Url) -> &'static str {
    let path = target.path().to_ascii_lowercase();
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    match ext {
        "ts" => "video/mp2t",
        "aac" => "audio/aac",
        "ac3" => "audio/ac3",
        "ec3" => "audio/eac3",
        "mp3" => "audio/mpeg",
        "mp4" | "m4s" | "m4v" | "fmp4" | "cmfv" => "video/mp4",
        "m4a" | "cmfa" => "audio/mp4",
        "vtt" | "webvtt" => "text/vtt",
        _ => "application/octet-stream",
    }
}
