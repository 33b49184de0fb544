pub mod context;
pub mod patterns;
pub mod sport;

use serde::{Deserialize, Serialize};
use tracing::debug;

use context::ExtractionContext;
use patterns::match_line;
use sport::Sport;

/// A card row read off a checklist, not yet deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCandidate {
    pub sport: Sport,
    pub year: Option<i32>,
    pub brand: String,
    pub set_name: String,
    pub player_name: String,
    pub card_number: String,
    pub is_rookie: bool,
    pub is_autographed: bool,
    pub is_patch: bool,
}

/// Parser output for one document, with line accounting for diagnostics.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    pub candidates: Vec<CardCandidate>,
    pub lines: usize,
    pub unmatched: usize,
    pub rejected: usize,
}

/// Names shorter than this are page furniture, not players.
const MIN_NAME_LEN: usize = 2;

/// Run the pattern chain over every non-empty line of `text`.
pub fn parse_text(text: &str, ctx: &ExtractionContext, brand: &str) -> ParsedDocument {
    let sport = sport::classify(&ctx.set_name);
    let mut doc = ParsedDocument::default();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        doc.lines += 1;
        let Some((kind, fields)) = match_line(line) else {
            debug!("Unmatched line: {}", line);
            doc.unmatched += 1;
            continue;
        };
        if fields.player_name.chars().count() < MIN_NAME_LEN {
            debug!("Rejected {:?} match, name too short: {}", kind, line);
            doc.rejected += 1;
            continue;
        }
        doc.candidates.push(CardCandidate {
            sport,
            year: ctx.detected_year,
            brand: brand.to_string(),
            set_name: ctx.set_name.clone(),
            player_name: fields.player_name,
            card_number: fields.card_number,
            is_rookie: fields.is_rookie,
            is_autographed: fields.is_autographed,
            is_patch: fields.is_patch,
        });
    }

    doc
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.txt", name)).unwrap()
    }

    fn parse(filename: &str, text: &str) -> ParsedDocument {
        let ctx = ExtractionContext::from_document(filename, text);
        parse_text(text, &ctx, "Topps")
    }

    #[test]
    fn chrome_checklist() {
        let text = fixture("2021-Topps-Chrome");
        let doc = parse("2021-Topps-Chrome.pdf", &text);
        assert_eq!(doc.candidates.len(), 6);

        let first = &doc.candidates[0];
        assert_eq!(first.card_number, "1");
        assert_eq!(first.player_name, "Mike Trout");
        assert_eq!(first.year, Some(2021));
        assert_eq!(first.set_name, "Topps Chrome");
        assert_eq!(first.sport, Sport::Baseball);
        assert_eq!(first.brand, "Topps");

        let rookie = doc
            .candidates
            .iter()
            .find(|c| c.player_name == "Jarred Kelenic")
            .unwrap();
        assert!(rookie.is_rookie);
        assert!(rookie.is_autographed);

        let dashed = doc
            .candidates
            .iter()
            .find(|c| c.card_number == "5")
            .unwrap();
        assert_eq!(dashed.player_name, "Bo Bichette");
        assert!(dashed.is_patch);
    }

    #[test]
    fn line_order_is_preserved() {
        let doc = parse("x.pdf", "3 Carl Yastrzemski\n1 Babe Ruth\n2 Lou Gehrig");
        let numbers: Vec<&str> = doc.candidates.iter().map(|c| c.card_number.as_str()).collect();
        assert_eq!(numbers, vec!["3", "1", "2"]);
    }

    #[test]
    fn short_names_are_never_emitted() {
        let text = "1 A\n2 -\n3 X RC\n4 Al Kaline\n5 . \n66: Z";
        let doc = parse("Heritage.pdf", text);
        assert!(doc
            .candidates
            .iter()
            .all(|c| c.player_name.trim().chars().count() >= 2));
        assert_eq!(doc.candidates.len(), 1);
        assert_eq!(doc.candidates[0].player_name, "Al Kaline");
        assert!(doc.rejected >= 3);
    }

    #[test]
    fn headers_and_prose_are_skipped() {
        let text = fixture("nhl-stadium-series");
        let doc = parse("NHL-Stadium-Series.pdf", &text);
        assert!(doc.unmatched > 0);
        assert!(doc.candidates.iter().all(|c| c.sport == Sport::Hockey));
        assert!(doc.candidates.iter().any(|c| c.player_name == "Connor McDavid"));
        // No year in the filename, so the first one in the text applies.
        assert!(doc.candidates.iter().all(|c| c.year == Some(2022)));
    }

    #[test]
    fn blank_text_yields_nothing() {
        let doc = parse("empty.pdf", "\n   \n\t\n");
        assert_eq!(doc.lines, 0);
        assert!(doc.candidates.is_empty());
    }
}
