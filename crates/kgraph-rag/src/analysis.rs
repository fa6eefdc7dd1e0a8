//! Question analysis
//!
//! Rule-based intent detection and keyword extraction. Keywords are
//! matched against node key tokens to pick traversal seeds.

use std::collections::HashSet;

/// Words that never make useful seed keywords
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "his", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of", "on",
    "or", "our", "she", "so", "tell", "than", "that", "the", "their", "them", "then", "there",
    "these", "they", "this", "to", "up", "was", "we", "were", "what", "when", "where", "which",
    "who", "why", "will", "with", "would", "you", "your",
];

/// Phrases that ask for the gist of everything rather than a specific fact
const SUMMARY_CUES: &[&str] = &[
    "summarize",
    "summarise",
    "summary",
    "overview",
    "key points",
    "main points",
];

/// Type of user intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Asks for a summary of the whole graph
    Summary,
    /// Asks about specific entities or facts
    Specific,
}

/// Analysis of a user question
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    /// Original question
    pub question: String,

    /// Detected intent
    pub intent: QueryIntent,

    /// Lowercase content tokens, stopwords and intent cues removed
    pub keywords: Vec<String>,
}

/// Analyze a question into intent and keywords
pub fn analyze_query(question: &str) -> QueryAnalysis {
    let lower = question.to_lowercase();

    let intent = if SUMMARY_CUES.iter().any(|cue| lower.contains(cue)) {
        QueryIntent::Summary
    } else {
        QueryIntent::Specific
    };

    let cue_words: HashSet<&str> = SUMMARY_CUES
        .iter()
        .flat_map(|cue| cue.split_whitespace())
        .collect();

    let mut seen = HashSet::new();
    let keywords = tokenize(question)
        .into_iter()
        .filter(|t| !cue_words.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect();

    QueryAnalysis {
        question: question.to_string(),
        intent,
        keywords,
    }
}

/// Split text into lowercase content tokens.
///
/// `&` and inner apostrophes stay inside a token so "AT&T" survives;
/// stopwords and single ASCII characters are dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '&' || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .filter(|t| !(t.len() == 1 && t.is_ascii()))
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Parse a `KEYWORDS: a, b, c` model reply into tokens
pub fn parse_keywords(response: &str) -> Vec<String> {
    let body = match response.find("KEYWORDS:") {
        Some(pos) => &response[pos + "KEYWORDS:".len()..],
        None => response,
    };

    let mut seen = HashSet::new();
    body.split(',')
        .flat_map(tokenize)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
