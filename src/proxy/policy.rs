//! The rewrite policy table.
//!
//! One ordered list of rules decides, for every absolute reference found in a
//! playlist, whether it is unwrapped, routed through the relay, or left as a
//! direct link. The same table answers "is this target a playlist?" for the
//! content classifier and the upstream header policy, so there is exactly one
//! place where suffixes and MIME tokens live.

use crate::config::{Config, ReferenceAction};
use crate::proxy::recursion::RecursionGuard;
use crate::proxy::target::upgrade_scheme;
use url::Url;

/// Path suffixes that identify a playlist.
pub const PLAYLIST_SUFFIXES: &[&str] = &[".m3u8", ".m3u"];

/// Content-type tokens that identify a playlist (compared case-insensitively).
pub const PLAYLIST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

/// Path suffixes of media segments, init sections and subtitle chunks.
pub const SEGMENT_SUFFIXES: &[&str] = &[
    ".ts", ".aac", ".ac3", ".ec3", ".mp3", ".mp4", ".m4s", ".m4a", ".m4v", ".fmp4", ".cmfv",
    ".cmfa", ".vtt", ".webvtt",
];

/// Path suffixes of encryption keys.
pub const KEY_SUFFIXES: &[&str] = &[".key", ".bin"];

/// Outcome of a policy lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RewriteAction {
    /// Wrap through the relay
    Proxy,
    /// Leave as an absolute direct link, scheme upgraded only
    Passthrough,
    /// Strip an existing relay wrapper, then decide again
    Unwrap,
}

impl RewriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteAction::Proxy => "proxy",
            RewriteAction::Passthrough => "passthrough",
            RewriteAction::Unwrap => "unwrap",
        }
    }
}

impl From<ReferenceAction> for RewriteAction {
    fn from(action: ReferenceAction) -> Self {
        match action {
            ReferenceAction::Proxy => RewriteAction::Proxy,
            ReferenceAction::Passthrough => RewriteAction::Passthrough,
        }
    }
}

/// What a rule recognized the reference as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    ProxyWrapper,
    Playlist,
    Segment,
    Key,
    Other,
}

/// How a rule matches a URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Matcher {
    /// The URL matches the relay wrapper grammar
    ProxyWrapper,
    /// Lowercased path ends with one of `suffixes` or contains one of `contains`
    Path {
        suffixes: Vec<String>,
        contains: Vec<String>,
    },
    Any,
}

impl Matcher {
    fn path_suffixes(suffixes: &[&str]) -> Self {
        Matcher::Path {
            suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
            contains: Vec::new(),
        }
    }

    fn matches(&self, url: &Url, guard: &RecursionGuard<'_>) -> bool {
        match self {
            Matcher::ProxyWrapper => guard.is_wrapped(url),
            Matcher::Path { .. } => self.matches_path(url),
            Matcher::Any => true,
        }
    }

    /// Path-only match; wrapper and catch-all matchers never match here.
    fn matches_path(&self, url: &Url) -> bool {
        let Matcher::Path { suffixes, contains } = self else {
            return false;
        };
        let path = url.path().to_ascii_lowercase();
        suffixes.iter().any(|s| path.ends_with(s.as_str()))
            || contains.iter().any(|c| path.contains(c.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyRule {
    pub kind: ReferenceKind,
    pub matcher: Matcher,
    pub action: RewriteAction,
}

/// Ordered rule table plus the knobs the rewriter needs.
#[derive(Clone, Debug)]
pub struct RewritePolicy {
    rules: Vec<PolicyRule>,
    max_unwrap_depth: usize,
    upgrade_insecure: bool,
    rewrite_tag_uris: bool,
}

impl RewritePolicy {
    /// Build the table from configuration.
    ///
    /// Rule order: wrapper detection, playlists (always proxied), segments,
    /// keys, then the catch-all for everything else.
    pub fn from_config(config: &Config) -> Self {
        let rules = vec![
            PolicyRule {
                kind: ReferenceKind::ProxyWrapper,
                matcher: Matcher::ProxyWrapper,
                action: RewriteAction::Unwrap,
            },
            PolicyRule {
                kind: ReferenceKind::Playlist,
                matcher: Matcher::Path {
                    suffixes: PLAYLIST_SUFFIXES.iter().map(|s| s.to_string()).collect(),
                    contains: config.playlist_path_hints.clone(),
                },
                action: RewriteAction::Proxy,
            },
            PolicyRule {
                kind: ReferenceKind::Segment,
                matcher: Matcher::path_suffixes(SEGMENT_SUFFIXES),
                action: config.segment_action.into(),
            },
            PolicyRule {
                kind: ReferenceKind::Key,
                matcher: Matcher::path_suffixes(KEY_SUFFIXES),
                action: config.key_action.into(),
            },
            PolicyRule {
                kind: ReferenceKind::Other,
                matcher: Matcher::Any,
                action: config.other_action.into(),
            },
        ];

        Self {
            rules,
            max_unwrap_depth: config.max_unwrap_depth,
            upgrade_insecure: config.upgrade_insecure,
            rewrite_tag_uris: config.rewrite_tag_uris,
        }
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn max_unwrap_depth(&self) -> usize {
        self.max_unwrap_depth
    }

    pub fn rewrite_tag_uris(&self) -> bool {
        self.rewrite_tag_uris
    }

    /// First matching rule for `url`.
    pub fn decide(&self, url: &Url, guard: &RecursionGuard<'_>) -> (ReferenceKind, RewriteAction) {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(url, guard))
            .map(|rule| (rule.kind, rule.action))
            .unwrap_or((ReferenceKind::Other, RewriteAction::Passthrough))
    }

    /// Apply the scheme upgrade if enabled.
    pub fn normalize(&self, url: Url) -> Url {
        if self.upgrade_insecure {
            upgrade_scheme(url)
        } else {
            url
        }
    }

    /// Does the target's path mark it as a playlist?
    pub fn is_playlist_path(&self, url: &Url) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.kind == ReferenceKind::Playlist)
            .any(|rule| rule.matcher.matches_path(url))
    }

    /// Does the declared content type carry a playlist MIME token?
    pub fn is_playlist_content_type(&self, content_type: &str) -> bool {
        let lowered = content_type.to_ascii_lowercase();
        PLAYLIST_CONTENT_TYPES.iter().any(|t| lowered.contains(*t))
    }
}
