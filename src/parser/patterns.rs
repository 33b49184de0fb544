use std::sync::LazyLock;

use regex::{Captures, Regex};

const MARKERS: &str = r"(?:\s+(RC|ROOKIE))?(?:\s+(AUTO|AU))?(?:\s+(PATCH|RELIC))?";

static SPACED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(\d+)\s+([^\s\-–].*?){}$", MARKERS)).unwrap()
});
static DASHED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(\d+)\s*[-–]\s*(.+?){}$", MARKERS)).unwrap()
});
static LENIENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(\d+)[^\w]+(.*?){}$", MARKERS)).unwrap()
});

/// Which rule of the chain produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePattern {
    /// `12 Mike Trout RC`
    Spaced,
    /// `12 - Mike Trout` / `12–Mike Trout`
    Dashed,
    /// Anything with a number, some punctuation, then a name.
    Lenient,
}

/// Fields captured from one checklist line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFields {
    pub card_number: String,
    pub player_name: String,
    pub is_rookie: bool,
    pub is_autographed: bool,
    pub is_patch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMatch {
    Matched(LineFields),
    NoMatch,
}

type Matcher = fn(&str) -> LineMatch;

/// Tried in order; the first `Matched` wins.
pub const CHAIN: [(LinePattern, Matcher); 3] = [
    (LinePattern::Spaced, match_spaced),
    (LinePattern::Dashed, match_dashed),
    (LinePattern::Lenient, match_lenient),
];

pub fn match_spaced(line: &str) -> LineMatch {
    capture(&SPACED_RE, line)
}

pub fn match_dashed(line: &str) -> LineMatch {
    capture(&DASHED_RE, line)
}

pub fn match_lenient(line: &str) -> LineMatch {
    capture(&LENIENT_RE, line)
}

/// Run the chain over a single line.
pub fn match_line(line: &str) -> Option<(LinePattern, LineFields)> {
    CHAIN.iter().find_map(|(kind, matcher)| match matcher(line) {
        LineMatch::Matched(fields) => Some((*kind, fields)),
        LineMatch::NoMatch => None,
    })
}

fn capture(re: &Regex, line: &str) -> LineMatch {
    match re.captures(line) {
        Some(caps) => LineMatch::Matched(fields(&caps)),
        None => LineMatch::NoMatch,
    }
}

fn fields(caps: &Captures) -> LineFields {
    let text = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or("");
    LineFields {
        card_number: text(1).to_string(),
        player_name: text(2).trim().to_string(),
        is_rookie: caps.get(3).is_some(),
        is_autographed: caps.get(4).is_some(),
        is_patch: caps.get(5).is_some(),
    }
}
