/// How a user reply relates to a pending confirmation prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationReply {
    Affirmative,
    Negative,
    Unrelated,
}

const AFFIRMATIVE_PREFIXES: &[&str] = &[
    "yes", "yeah", "yep", "sure", "confirm", "do it", "proceed", "go ahead", "okay", "ok",
];

const NEGATIVE_PREFIXES: &[&str] =
    &["no", "nope", "cancel", "don't", "never mind", "nevermind", "stop"];

/// Classifies a reply against the affirmative/negative phrase lists.
/// Prefixes only match on a word boundary, so "note the totals" is not
/// a cancellation and "ship order 5" is not a confirmation.
pub fn classify_reply(message: &str) -> ConfirmationReply {
    let normalized = message.trim().to_lowercase();
    if normalized.is_empty() {
        return ConfirmationReply::Unrelated;
    }

    if NEGATIVE_PREFIXES.iter().any(|prefix| matches_prefix(&normalized, prefix)) {
        return ConfirmationReply::Negative;
    }
    if AFFIRMATIVE_PREFIXES.iter().any(|prefix| matches_prefix(&normalized, prefix)) {
        return ConfirmationReply::Affirmative;
    }
    ConfirmationReply::Unrelated
}

fn matches_prefix(message: &str, prefix: &str) -> bool {
    if !message.starts_with(prefix) {
        return false;
    }
    match message.as_bytes().get(prefix.len()) {
        None => true,
        Some(next) => !next.is_ascii_alphanumeric(),
    }
}
