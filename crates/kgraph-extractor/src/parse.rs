//! Model response parsing
//!
//! Accepts the loosely structured formats language models produce for
//! triplet prompts: `(a, b, c)` tuples, `a | b | c` rows, numbered or
//! bulleted variants of both, and JSON arrays of objects or 3-element
//! arrays. Malformed items are counted and skipped.

use std::collections::HashSet;

use kgraph_core::Triplet;
use regex::Regex;
use serde::Deserialize;

/// Parsed triplets plus the number of candidate items that were rejected
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub triplets: Vec<Triplet>,
    pub malformed: usize,
}

impl ParseOutcome {
    /// True when the response had candidates but none were usable
    pub fn is_unparseable(&self) -> bool {
        self.triplets.is_empty() && self.malformed > 0
    }
}

const LIST_MARKER: &str = r"^\s*(?:[-*•]|\d+[.)]|\[\d+\])\s*";
const TUPLE: &str = r"\(([^()]*)\)";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonTriplet {
    Object {
        subject: String,
        predicate: String,
        object: String,
        #[serde(default)]
        confidence: Option<f32>,
    },
    Tuple(Vec<String>),
}

/// Parser for triplet extraction responses
#[derive(Debug, Clone)]
pub struct ResponseParser {
    list_marker: Option<Regex>,
    tuple: Option<Regex>,
    max_entity_chars: usize,
}

impl ResponseParser {
    /// Create a parser rejecting parts longer than `max_entity_chars` characters
    pub fn new(max_entity_chars: usize) -> Self {
        Self {
            list_marker: Regex::new(LIST_MARKER).ok(),
            tuple: Regex::new(TUPLE).ok(),
            max_entity_chars,
        }
    }

    /// Parse a model response into unique triplets, in order of appearance
    pub fn parse(&self, response: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut seen = HashSet::new();

        let mut accept = |candidate: Option<Triplet>, outcome: &mut ParseOutcome| match candidate {
            Some(t) if seen.insert(t.identity()) => outcome.triplets.push(t),
            Some(_) => {}
            None => outcome.malformed += 1,
        };

        if let Some(items) = parse_json(response) {
            for item in items {
                let Ok(item) = serde_json::from_value::<JsonTriplet>(item) else {
                    outcome.malformed += 1;
                    continue;
                };
                let candidate = match item {
                    JsonTriplet::Object {
                        subject,
                        predicate,
                        object,
                        confidence,
                    } => self
                        .build(&[&subject, &predicate, &object])
                        .map(|t| match confidence {
                            Some(c) => t.with_confidence(c),
                            None => t,
                        }),
                    JsonTriplet::Tuple(parts) => {
                        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();
                        self.build(&parts)
                    }
                };
                accept(candidate, &mut outcome);
            }
            return outcome;
        }

        for line in response.lines() {
            let line = match &self.list_marker {
                Some(re) => re.replace(line, ""),
                None => line.into(),
            };
            let line = line.trim();
            if line.is_empty() || is_header(line) {
                continue;
            }

            let tuples: Vec<&str> = self
                .tuple
                .iter()
                .flat_map(|re| re.captures_iter(line))
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();

            if !tuples.is_empty() {
                for inner in tuples {
                    let parts: Vec<&str> = inner.split(',').collect();
                    accept(self.build(&parts), &mut outcome);
                }
            } else if line.contains('|') {
                let parts: Vec<&str> = line.trim_matches('|').split('|').collect();
                accept(self.build(&parts), &mut outcome);
            } else {
                outcome.malformed += 1;
            }
        }

        outcome
    }

    fn build(&self, parts: &[&str]) -> Option<Triplet> {
        let [subject, predicate, object] = parts else {
            return None;
        };

        let clean = |s: &str| s.trim().trim_matches(&['"', '\'', '`'][..]).trim().to_string();
        let (subject, predicate, object) = (clean(subject), clean(predicate), clean(object));

        if [&subject, &predicate, &object]
            .iter()
            .any(|p| p.chars().count() > self.max_entity_chars)
        {
            return None;
        }

        Triplet::new(subject, predicate, object).ok()
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Find a JSON array, tolerating prose or code fences around it. Items are
/// decoded one by one so a bad element does not discard the rest.
fn parse_json(response: &str) -> Option<Vec<serde_json::Value>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }

    // A `[` inside a plain-text line is not JSON
    let body = &response[start..=end];
    if !body.trim_start_matches('[').trim_start().starts_with(&['{', '[', '"'][..]) {
        return None;
    }

    serde_json::from_str(body).ok()
}

/// Lines like "Triplets:" or "Here are the triplets:" carry no data
fn is_header(line: &str) -> bool {
    line.ends_with(':') && !line.contains('(') && !line.contains('|')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(response: &str) -> ParseOutcome {
        ResponseParser::default().parse(response)
    }

    fn names(outcome: &ParseOutcome) -> Vec<String> {
        outcome.triplets.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_parse_tuple_lines() {
        let response = "(Josh Milligan, wants to exchange, Blackberry Torch)\n(Erica, works for, AT&T)";
        let outcome = parse(response);
        assert_eq!(
            names(&outcome),
            vec![
                "(Josh Milligan, wants to exchange, Blackberry Torch)",
                "(Erica, works for, AT&T)"
            ]
        );
        assert_eq!(outcome.malformed, 0);
    }

    #[test]
    fn test_parse_numbered_and_bulleted_lines() {
        let response = "Triplets:\n1. (Josh, owns, phone)\n- (phone, made by, Blackberry)\n* Erica | helps | Josh";
        let outcome = parse(response);
        assert_eq!(outcome.triplets.len(), 3);
        assert_eq!(outcome.malformed, 0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let response = "(Josh, owns)\n(Josh, owns, phone)\nsome chatter\n(, is, empty)\n(a, b, c, d)";
        let outcome = parse(response);
        assert_eq!(names(&outcome), vec!["(Josh, owns, phone)"]);
        assert_eq!(outcome.malformed, 4);
        assert!(!outcome.is_unparseable());
    }

    #[test]
    fn test_duplicates_collapse_across_surface_forms() {
        let response = "(AT&T, employs, Erica)\n(at&t, Employs, erica)";
        let outcome = parse(response);
        assert_eq!(outcome.triplets.len(), 1);
        assert_eq!(outcome.triplets[0].subject, "AT&T");
    }

    #[test]
    fn test_parse_json_objects() {
        let response = r#"```json
[
  {"subject": "Josh", "predicate": "calls", "object": "AT&T", "confidence": 0.9},
  {"subject": "Josh", "predicate": "", "object": "AT&T"},
  ["Erica", "helps", "Josh"]
]
```"#;
        let outcome = parse(response);
        assert_eq!(outcome.triplets.len(), 2);
        assert_eq!(outcome.triplets[0].confidence, Some(0.9));
        assert_eq!(outcome.malformed, 1);
    }

    #[test]
    fn test_bad_json_item_keeps_the_rest() {
        let response = r#"[
            {"subject": "Josh Milligan", "predicate": "called", "object": "AT&T"},
            {"subject": "Erica", "predicate": "works for", "object": null},
            ["Erica", "helps", 42],
            null
        ]"#;
        let outcome = parse(response);
        assert_eq!(names(&outcome), vec!["(Josh Milligan, called, AT&T)"]);
        assert_eq!(outcome.malformed, 3);
        assert!(!outcome.is_unparseable());
    }

    #[test]
    fn test_long_entities_rejected() {
        let long = "x".repeat(50);
        let response = format!("(Josh, owns, {long})\n(Josh, owns, phone)");
        let outcome = ResponseParser::new(20).parse(&response);
        assert_eq!(outcome.triplets.len(), 1);
        assert_eq!(outcome.malformed, 1);
    }

    #[test]
    fn test_unparseable_response() {
        let outcome = parse("I could not find any facts in this text.");
        assert!(outcome.is_unparseable());

        let outcome = parse("");
        assert!(!outcome.is_unparseable());
        assert!(outcome.triplets.is_empty());
    }

    #[test]
    fn test_quotes_are_trimmed() {
        let outcome = parse("(\"Josh\", 'wants', `Blackberry Torch`)");
        assert_eq!(names(&outcome), vec!["(Josh, wants, Blackberry Torch)"]);
    }
}
