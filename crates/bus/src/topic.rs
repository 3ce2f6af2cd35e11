//! Topic routing-key helpers (broker topic-exchange semantics).

/// Word substituted when deriving a response key from a request key.
const REQUEST_WORD: &str = "request";
const RESPONSE_WORD: &str = "response";

/// Whether `routing_key` matches a topic binding `pattern`.
///
/// Words are separated by `.`; `*` matches exactly one word and `#` matches
/// zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_words(rest, &key[1..]),
        Some((word, rest)) => key.first() == Some(word) && match_words(rest, &key[1..]),
    }
}

/// Routing key for the reply to a request: the first `request` word becomes
/// `response` (`intents.request.web` → `intents.response.web`).
///
/// Keys without a `request` word are returned unchanged.
pub fn response_routing_key(request_key: &str) -> String {
    let mut replaced = false;
    request_key
        .split('.')
        .map(|word| {
            if !replaced && word == REQUEST_WORD {
                replaced = true;
                RESPONSE_WORD
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
