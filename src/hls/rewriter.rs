use crate::hls::tag_uri;
use crate::proxy::policy::{ReferenceKind, RewriteAction, RewritePolicy};
use crate::proxy::recursion::RecursionGuard;
use crate::proxy::target::directory_base;
use std::borrow::Cow;
use tracing::{debug, warn};
use url::Url;

/// Marker that starts tags and comments.
const DIRECTIVE_MARKER: char = '#';
const BOM: char = '\u{feff}';

/// How a single playlist line is treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineCategory {
    Blank,
    /// Tag or comment, starting with `#`
    Directive,
    /// Anything else: a relative or absolute reference
    UriReference,
}

/// One classified line. The rewritten form is derived, never written back into `raw`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistLine<'t> {
    /// Line content without its `\n` terminator (a trailing `\r` is kept)
    pub raw: &'t str,
    pub category: LineCategory,
    /// Absolute form of the reference, when one was resolved
    pub resolved: Option<Url>,
    /// Replacement content (without terminator); `None` keeps `raw`
    pub rewritten: Option<String>,
}

impl<'t> PlaylistLine<'t> {
    /// Classify a raw line; `first` strips a leading byte-order mark for the check.
    pub fn classify(raw: &'t str, first: bool) -> Self {
        let content = if first { raw.trim_start_matches(BOM) } else { raw };
        let trimmed = content.trim();

        let category = if trimmed.is_empty() {
            LineCategory::Blank
        } else if trimmed.starts_with(DIRECTIVE_MARKER) {
            LineCategory::Directive
        } else {
            LineCategory::UriReference
        };

        Self {
            raw,
            category,
            resolved: None,
            rewritten: None,
        }
    }

    /// Text emitted for this line, carriage return preserved.
    pub fn output(&self) -> Cow<'t, str> {
        match &self.rewritten {
            Some(rewritten) if self.raw.ends_with('\r') => Cow::Owned(format!("{rewritten}\r")),
            Some(rewritten) => Cow::Owned(rewritten.clone()),
            None => Cow::Borrowed(self.raw),
        }
    }
}

/// Counters describing what a rewrite did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub proxied: usize,
    pub passthrough: usize,
    /// References that carried a relay wrapper and were unwrapped first
    pub unwrapped: usize,
    /// References left untouched because they could not be resolved
    pub untouched: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewrittenPlaylist {
    pub text: String,
    pub stats: RewriteStats,
}

/// Resolved reference plus what to emit in its place.
struct Rewrite {
    kind: ReferenceKind,
    resolved: Url,
    output: String,
    action: RewriteAction,
    unwrapped: bool,
}

/// Rewrites playlist text for one request.
///
/// Relative references resolve against the target's directory; every
/// absolute result goes through the recursion guard and the policy table.
/// Failures on a single reference leave that line as it was.
pub struct PlaylistRewriter<'a> {
    policy: &'a RewritePolicy,
    guard: RecursionGuard<'a>,
    proxy_base: &'a Url,
    base: Url,
}

impl<'a> PlaylistRewriter<'a> {
    pub fn new(target: &Url, proxy_base: &'a Url, policy: &'a RewritePolicy) -> Self {
        Self {
            policy,
            guard: RecursionGuard::new(proxy_base, policy.max_unwrap_depth()),
            proxy_base,
            base: directory_base(target),
        }
    }

    /// Rewrite a whole playlist. Line order and `\n` terminators are preserved.
    pub fn rewrite(&self, text: &str) -> RewrittenPlaylist {
        let mut stats = RewriteStats::default();
        let mut out = String::with_capacity(text.len() + text.len() / 2);

        for (index, raw) in text.split('\n').enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let line = self.process_line(raw, index == 0, &mut stats);
            out.push_str(&line.output());
        }

        debug!(
            "Rewrote playlist: {} proxied, {} passthrough, {} unwrapped, {} untouched",
            stats.proxied, stats.passthrough, stats.unwrapped, stats.untouched
        );

        RewrittenPlaylist { text: out, stats }
    }

    /// Classify one line and derive its rewritten form.
    pub fn process_line<'t>(
        &self,
        raw: &'t str,
        first: bool,
        stats: &mut RewriteStats,
    ) -> PlaylistLine<'t> {
        let mut line = PlaylistLine::classify(raw, first);

        match line.category {
            LineCategory::Blank => {}
            LineCategory::Directive => {
                if self.policy.rewrite_tag_uris() {
                    line.rewritten = self.rewrite_tag(raw.trim_end_matches('\r'), stats);
                }
            }
            LineCategory::UriReference => {
                let bom = first && raw.starts_with(BOM);
                let content = if bom { raw.trim_start_matches(BOM) } else { raw };
                match self.rewrite_reference(content.trim()) {
                    Some(rewrite) => {
                        stats.record(&rewrite);
                        let resolved = line.resolved.insert(rewrite.resolved);
                        debug!(
                            "{:?} reference '{}' -> {} ({})",
                            rewrite.kind,
                            resolved,
                            rewrite.output,
                            rewrite.action.as_str()
                        );
                        line.rewritten = Some(if bom {
                            format!("{BOM}{}", rewrite.output)
                        } else {
                            rewrite.output
                        });
                    }
                    None => stats.untouched += 1,
                }
            }
        }

        line
    }

    fn rewrite_tag(&self, line: &str, stats: &mut RewriteStats) -> Option<String> {
        if !tag_uri::carries_uri(line) {
            return None;
        }
        let (value, start, end) = tag_uri::find_quoted_uri(line)?;

        match self.rewrite_reference(value) {
            Some(rewrite) => {
                stats.record(&rewrite);
                debug!(
                    "{:?} tag URI '{}' -> {} ({})",
                    rewrite.kind,
                    rewrite.resolved,
                    rewrite.output,
                    rewrite.action.as_str()
                );
                Some(tag_uri::splice(line, start, end, &rewrite.output))
            }
            None => {
                stats.untouched += 1;
                None
            }
        }
    }

    /// Resolve, unwrap, classify and wrap a single reference.
    ///
    /// Returns `None` when the reference must be left as is: unparsable,
    /// not http(s), or wrapped beyond the unwrap bound.
    fn rewrite_reference(&self, reference: &str) -> Option<Rewrite> {
        let resolved = match self.base.join(reference) {
            Ok(url) => url,
            Err(e) => {
                debug!("Leaving unresolvable reference '{}': {}", reference, e);
                return None;
            }
        };

        if !matches!(resolved.scheme(), "http" | "https") {
            debug!("Leaving non-HTTP reference '{}'", reference);
            return None;
        }

        let (mut kind, mut action) = self.policy.decide(&resolved, &self.guard);
        let unwrapped = action == RewriteAction::Unwrap;

        let absolute = if unwrapped {
            match self.guard.unwrap(resolved) {
                Ok(inner) => inner,
                Err(e) => {
                    warn!("Leaving reference '{}' unchanged: {}", reference, e);
                    return None;
                }
            }
        } else {
            resolved
        };
        let absolute = self.policy.normalize(absolute);

        if unwrapped {
            (kind, action) = self.policy.decide(&absolute, &self.guard);
        }

        let output = match action {
            RewriteAction::Passthrough => absolute.to_string(),
            // A fully unwrapped URL no longer matches the wrapper rule
            RewriteAction::Proxy | RewriteAction::Unwrap => self.wrap(&absolute),
        };

        Some(Rewrite {
            kind,
            resolved: absolute,
            output,
            action,
            unwrapped,
        })
    }

    /// `<proxy base>?url=<percent-encoded absolute URL>`
    pub fn wrap(&self, absolute: &Url) -> String {
        wrap_url(self.proxy_base, absolute)
    }
}

impl RewriteStats {
    fn record(&mut self, rewrite: &Rewrite) {
        match rewrite.action {
            RewriteAction::Passthrough => self.passthrough += 1,
            RewriteAction::Proxy | RewriteAction::Unwrap => self.proxied += 1,
        }
        if rewrite.unwrapped {
            self.unwrapped += 1;
        }
    }
}

/// Wrap `absolute` so it routes through the relay at `proxy_base`.
///
/// The whole URL is percent-encoded, query string included, so the inner
/// query survives the trip as a single parameter value.
pub fn wrap_url(proxy_base: &Url, absolute: &Url) -> String {
    format!(
        "{}?url={}",
        proxy_base.as_str(),
        urlencoding::encode(absolute.as_str())
    )
}

/// Convenience wrapper: rewrite `text` fetched from `target`.
pub fn rewrite_playlist(
    text: &str,
    target: &Url,
    proxy_base: &Url,
    policy: &RewritePolicy,
) -> RewrittenPlaylist {
    PlaylistRewriter::new(target, proxy_base, policy).rewrite(text)
}
