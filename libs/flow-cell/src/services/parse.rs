//! Free-text interpretation for the three selection steps.
//!
//! Nothing here attempts real natural-language parsing; the NLU collaborator
//! already classified the intent. These routines only map short replies onto
//! the options the engine itself just offered.

use clinic_cell::Service;

use crate::models::ConfirmationReply;

const AFFIRMATIVE_KEYWORDS: &[&str] = &[
    "sim", "s", "confirmo", "confirmar", "confirma", "ok", "claro", "isso", "quero", "pode",
    "perfeito", "beleza",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "não", "nao", "n", "cancelar", "cancela", "desisto", "deixa", "nunca", "negativo",
];

fn tokens(message: &str) -> Vec<String> {
    message
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// 1-based ordinal against a list of `max` offered options. The first
/// numeric token wins, so "quero a 2" selects the second option.
pub fn parse_ordinal(message: &str, max: usize) -> Option<usize> {
    tokens(message)
        .iter()
        .find_map(|t| t.parse::<usize>().ok())
        .filter(|n| (1..=max).contains(n))
}

/// Resolves a free-text message against the catalogue.
///
/// Strategies in order: ordinal against the offered listing, exact
/// case-insensitive substring of the full name, keyword overlap (at least
/// half of the name's significant words), category keyword. Within each
/// strategy the configured catalogue order breaks ties.
pub fn match_service<'a>(message: &str, catalogue: &'a [Service]) -> Option<&'a Service> {
    if catalogue.is_empty() {
        return None;
    }

    if let Some(n) = parse_ordinal(message, catalogue.len()) {
        return Some(&catalogue[n - 1]);
    }

    let lowered = message.to_lowercase();
    if let Some(service) = catalogue
        .iter()
        .find(|s| lowered.contains(&s.name.to_lowercase()))
    {
        return Some(service);
    }

    let message_tokens = tokens(message);
    if let Some(service) = catalogue.iter().find(|s| {
        let significant: Vec<String> = tokens(&s.name)
            .into_iter()
            .filter(|w| w.chars().count() > 2)
            .collect();
        if significant.is_empty() {
            return false;
        }
        let hits = significant
            .iter()
            .filter(|w| message_tokens.contains(w))
            .count();
        hits * 2 >= significant.len()
    }) {
        return Some(service);
    }

    catalogue
        .iter()
        .find(|s| message_tokens.iter().any(|t| t == s.category.keyword()))
}

/// Fixed keyword classification; anything matching neither set is unclear
/// and re-prompts.
pub fn parse_confirmation(message: &str) -> ConfirmationReply {
    let message_tokens = tokens(message);

    if message_tokens
        .iter()
        .any(|t| NEGATIVE_KEYWORDS.contains(&t.as_str()))
    {
        return ConfirmationReply::Negative;
    }
    if message_tokens
        .iter()
        .any(|t| AFFIRMATIVE_KEYWORDS.contains(&t.as_str()))
    {
        return ConfirmationReply::Affirmative;
    }

    ConfirmationReply::Unclear
}
