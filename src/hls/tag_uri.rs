//! Quoted `URI="..."` attributes inside tag lines.
//!
//! Keys, init sections, alternate renditions and LL-HLS parts reference
//! resources from inside a tag rather than on a line of their own. This module
//! finds that attribute and splices a replacement in without touching the rest
//! of the line.

/// Tags whose `URI` attribute points at a fetchable resource.
pub const URI_TAGS: &[&str] = &[
    "#EXT-X-KEY:",
    "#EXT-X-SESSION-KEY:",
    "#EXT-X-MAP:",
    "#EXT-X-MEDIA:",
    "#EXT-X-I-FRAME-STREAM-INF:",
    "#EXT-X-PART:",
    "#EXT-X-PRELOAD-HINT:",
    "#EXT-X-RENDITION-REPORT:",
];

/// Does this tag line carry a rewritable `URI` attribute?
pub fn carries_uri(line: &str) -> bool {
    URI_TAGS.iter().any(|tag| line.starts_with(tag))
}

/// Locate the quoted `URI` attribute value in a tag line.
///
/// Returns the value (without quotes) and the byte range of the value itself,
/// so callers can splice a replacement between the existing quotes. The
/// attribute name must start the attribute list or follow a comma, which
/// keeps names such as `KEYFORMATURI` from matching.
pub fn find_quoted_uri(line: &str) -> Option<(&str, usize, usize)> {
    const MARKER: &str = "URI=\"";

    let mut search_from = 0;
    while let Some(offset) = line[search_from..].find(MARKER) {
        let marker_pos = search_from + offset;
        let preceded_ok = marker_pos
            .checked_sub(1)
            .and_then(|i| line.as_bytes().get(i))
            .is_some_and(|b| *b == b':' || *b == b',');

        let value_start = marker_pos + MARKER.len();
        if preceded_ok {
            let closing = line[value_start..].find('"')?;
            let value_end = value_start + closing;
            return Some((&line[value_start..value_end], value_start, value_end));
        }
        search_from = value_start;
    }

    None
}

/// Replace the byte range `[start, end)` of `line` with `replacement`.
pub fn splice(line: &str, start: usize, end: usize, replacement: &str) -> String {
    let mut result = String::with_capacity(line.len() + replacement.len());
    result.push_str(&line[..start]);
    result.push_str(replacement);
    result.push_str(&line[end..]);
    result
}
