use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sport {
    Baseball,
    Football,
    Basketball,
    Hockey,
    Soccer,
    Other,
}

impl Sport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Baseball => "Baseball",
            Sport::Football => "Football",
            Sport::Basketball => "Basketball",
            Sport::Hockey => "Hockey",
            Sport::Soccer => "Soccer",
            Sport::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Sport {
        CATEGORIES
            .iter()
            .map(|(sport, _)| *sport)
            .find(|sport| sport.as_str().eq_ignore_ascii_case(s))
            .unwrap_or(Sport::Other)
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Order matters: the first category with a hit wins.
const CATEGORIES: [(Sport, &[&str]); 5] = [
    (Sport::Baseball, &["baseball", "mlb", "heritage", "chrome", "bowman"]),
    (Sport::Football, &["football", "nfl", "gridiron"]),
    (Sport::Basketball, &["basketball", "nba", "court", "hoops"]),
    (Sport::Hockey, &["hockey", "nhl", "ice", "puck"]),
    (Sport::Soccer, &["soccer", "mls", "pitch"]),
];

/// Case-insensitive keyword classification of a set name.
pub fn classify(set_name: &str) -> Sport {
    let lower = set_name.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(sport, _)| *sport)
        .unwrap_or(Sport::Other)
}
