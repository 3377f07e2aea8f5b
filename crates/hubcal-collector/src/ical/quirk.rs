//! Text filters applied to feed bodies before parsing.

use std::sync::LazyLock;

use hubcal_core::QuirkKind;
use regex::Regex;

static CREATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\nCREATED:[^\r\n]*").expect("created regex is valid"));

/// A named rewrite of raw feed text.
pub trait FeedQuirk: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Rewrites the feed text.
    fn apply(&self, text: &str) -> String;
}

/// Turns `\;` into `;` for feeds that over-escape.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnescapeSemicolons;

impl FeedQuirk for UnescapeSemicolons {
    fn name(&self) -> &'static str {
        "unescape_semicolons"
    }

    fn apply(&self, text: &str) -> String {
        text.replace("\\;", ";")
    }
}

/// Returns the filter for a configured quirk.
pub fn quirk_for(kind: QuirkKind) -> Box<dyn FeedQuirk> {
    match kind {
        QuirkKind::UnescapeSemicolons => Box::new(UnescapeSemicolons),
    }
}

/// Removes `CREATED` lines, which some publishers emit in forms the parser
/// rejects.
pub fn strip_created(text: &str) -> String {
    CREATED_RE.replace_all(text, "").into_owned()
}

/// Applies the always-on cleanup and then the hub's quirk, if any.
pub fn prepare_feed_text(text: &str, quirk: Option<QuirkKind>) -> String {
    let cleaned = strip_created(text);
    match quirk {
        Some(kind) => quirk_for(kind).apply(&cleaned),
        None => cleaned,
    }
}
