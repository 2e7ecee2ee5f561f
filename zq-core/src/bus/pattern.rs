//! Topic pattern matching
//!
//! Topics are dotted strings (`market_data.quote.BTC-USDC`). A subscription
//! pattern is compiled once at subscribe time:
//!
//! - a literal segment matches itself
//! - `*` matches exactly one segment
//! - `**` matches one or more trailing segments

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

/// A compiled topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<Segment>,
    source: String,
}

impl TopicPattern {
    /// Compile a pattern. `**` is only meaningful as the final segment;
    /// anywhere else it behaves like `*`.
    pub fn compile(pattern: &str) -> Self {
        let count = pattern.split('.').count();
        let segments = pattern
            .split('.')
            .enumerate()
            .map(|(i, seg)| match seg {
                "**" if i + 1 == count => Segment::Rest,
                "*" | "**" => Segment::Single,
                lit => Segment::Literal(lit.to_string()),
            })
            .collect();
        Self {
            segments,
            source: pattern.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a concrete topic against this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('.');
        for segment in &self.segments {
            match segment {
                Segment::Rest => {
                    // `**` requires at least one remaining segment.
                    return parts.next().is_some();
                }
                Segment::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => match parts.next() {
                    Some(p) if p == lit => {}
                    _ => return false,
                },
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let p = TopicPattern::compile("order.pending");
        assert!(p.matches("order.pending"));
        assert!(!p.matches("order.filled"));
        assert!(!p.matches("order.pending.extra"));
        assert!(!p.matches("order"));
    }

    #[test]
    fn test_single_wildcard() {
        let p = TopicPattern::compile("market_data.*");
        assert!(p.matches("market_data.quote"));
        assert!(!p.matches("market_data.quote.BTC-USDC"));
        assert!(!p.matches("market_data"));

        let mid = TopicPattern::compile("order.*.filled");
        assert!(mid.matches("order.BTC-USDC.filled"));
        assert!(!mid.matches("order.filled"));
    }

    #[test]
    fn test_rest_wildcard() {
        let p = TopicPattern::compile("cache.quotes.**");
        assert!(p.matches("cache.quotes.BTC-USDC"));
        assert!(p.matches("cache.quotes.BTC-USDC.extra"));
        assert!(!p.matches("cache.quotes"));
        assert!(!p.matches("cache.orders.x"));
    }

    #[test]
    fn test_bare_rest() {
        let p = TopicPattern::compile("**");
        assert!(p.matches("anything"));
        assert!(p.matches("a.b.c"));
    }
}
