//! Locale navigation keyword sets. Two jobs: a fast path that resolves
//! obvious spoken commands without a network round-trip, and the filter that
//! keeps navigation phrases out of the assistant's question stream.

use regex::Regex;

use super::NavigationIntent;

/// Compiled phrase patterns for one locale.
pub struct KeywordMatcher {
    next: Vec<Regex>,
    prev: Vec<Regex>,
    goto: Vec<Regex>,
}

impl KeywordMatcher {
    /// Build the matcher for a locale tag ("en", "vi", ...). Unknown locales
    /// fall back to the English set.
    pub fn for_locale(locale: &str) -> Self {
        let lang = locale.split(['-', '_']).next().unwrap_or(locale);
        match lang {
            "vi" => Self::vietnamese(),
            _ => Self::english(),
        }
    }

    fn english() -> Self {
        Self {
            next: vec![Regex::new(
                r"^(?:please\s+)?(?:go\s+|flip\s+|turn\s+)?(?:next|forward)(?:\s+(?:page|slide))?(?:\s+please)?$",
            )
            .unwrap()],
            prev: vec![Regex::new(
                r"^(?:please\s+)?(?:go\s+|flip\s+|turn\s+)?(?:back|backward|previous|prev)(?:\s+(?:page|slide))?(?:\s+please)?$",
            )
            .unwrap()],
            goto: vec![Regex::new(
                r"^(?:please\s+)?(?:go\s+to\s+|goto\s+|jump\s+to\s+)?(?:page|slide)\s+(\d+)(?:\s+please)?$",
            )
            .unwrap()],
        }
    }

    fn vietnamese() -> Self {
        Self {
            next: vec![Regex::new(
                r"^(?:tiếp(?:\s+theo)?|qua(?:\s+trang)?|sang\s+trang|trang\s+sau|tới)$",
            )
            .unwrap()],
            prev: vec![Regex::new(
                r"^(?:quay\s+lại|trở\s+lại|lùi(?:\s+lại)?|trang\s+trước)$",
            )
            .unwrap()],
            goto: vec![Regex::new(r"^(?:đi\s+(?:tới|đến)\s+)?trang\s+(\d+)$").unwrap()],
        }
    }

    /// Resolve a normalized (trimmed, lowercased) utterance into an intent,
    /// or nothing when it is not one of the known navigation phrases.
    pub fn match_intent(&self, normalized: &str) -> Option<NavigationIntent> {
        if self.next.iter().any(|p| p.is_match(normalized)) {
            return Some(NavigationIntent::Next);
        }
        if self.prev.iter().any(|p| p.is_match(normalized)) {
            return Some(NavigationIntent::Prev);
        }
        for pattern in &self.goto {
            if let Some(caps) = pattern.captures(normalized) {
                if let Some(page) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                    if page >= 1 {
                        return Some(NavigationIntent::Goto(page));
                    }
                }
            }
        }
        None
    }

    /// Whether the utterance is a navigation phrase (and must therefore not
    /// be forwarded to the assistant).
    pub fn is_navigation_phrase(&self, normalized: &str) -> bool {
        self.match_intent(normalized).is_some()
    }
}
