//! Rhythm markup removal.
//!
//! Annotated sentences carry verb spans as angle-bracket tags
//! (`<v>runs</v>`), breath boundaries as `/` or `|`, and stress as
//! capitalization. The synthesizer gets the words only; capitalization is
//! left alone.

use std::sync::LazyLock;

use regex::Regex;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").unwrap());
static BREATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]*[/|]+[ \t]*").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// Plain text suitable for synthesis. Line breaks survive, blank lines do not.
pub fn strip_markers(text: &str) -> String {
    let untagged = TAG.replace_all(text, "");
    let unbroken = BREATH.replace_all(&untagged, " ");
    let collapsed = SPACES.replace_all(&unbroken, " ");

    collapsed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
