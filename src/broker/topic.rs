//! Routing-key matching for topic exchanges.
//!
//! Binding patterns are dot-separated words where `*` matches exactly one
//! word and `#` matches zero or more words.

use crate::outbox::ExchangeType;

/// Whether a message published with `routing_key` reaches a queue bound with `pattern`.
pub fn routes(exchange_type: ExchangeType, pattern: &str, routing_key: &str) -> bool {
    match exchange_type {
        ExchangeType::Fanout => true,
        ExchangeType::Topic => matches(pattern, routing_key),
        ExchangeType::Direct | ExchangeType::Headers => pattern == routing_key,
    }
}

/// Topic pattern match.
pub fn matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) if word == "*" || word == head => match_words(rest, tail),
            _ => false,
        },
    }
}
