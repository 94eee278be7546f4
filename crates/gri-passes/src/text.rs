// SPDX-License-Identifier: MIT OR Apache-2.0
//! Keyword and entity heuristics shared by Passes D and E.
//!
//! Both are deterministic, dependency-free approximations: keywords are
//! frequency-ranked lowercase tokens, entities are maximal runs of
//! capitalized words. The embedding itself is always adapter-provided;
//! these only enrich metadata and seed graph nodes.

use std::collections::BTreeMap;

/// Words too common to be useful keywords.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "may", "must", "no", "not", "of", "on", "or", "that", "the",
    "their", "them", "then", "they", "this", "to", "when", "with", "you", "your",
];

/// Frequency-ranked keywords: lowercase alphabetic tokens of length ≥ 4,
/// stopwords removed, ties broken alphabetically.
#[must_use]
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.len() < 4 {
            continue;
        }
        let token = raw.to_lowercase();
        if STOPWORDS.contains(&token.as_str()) || token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        *counts.entry(token).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    // BTreeMap iteration is alphabetical, so a stable sort by count keeps
    // the alphabetical tie-break.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Entities: maximal runs of two or more capitalized words
/// (`Mind Flayer`, `Forgotten Realms`). Duplicates are removed, order of
/// first appearance is preserved.
#[must_use]
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        // Capitalized stopwords ("The", "A") are sentence furniture, not
        // entity words; they terminate a run.
        if is_capitalized(cleaned) && !STOPWORDS.contains(&cleaned.to_lowercase().as_str()) {
            run.push(cleaned);
        } else {
            flush_run(&mut run, &mut entities);
        }
    }
    flush_run(&mut run, &mut entities);
    entities
}

fn flush_run(run: &mut Vec<&str>, entities: &mut Vec<String>) {
    if run.len() >= 2 {
        let entity = run.join(" ");
        if !entities.contains(&entity) {
            entities.push(entity);
        }
    }
    run.clear();
}

fn is_capitalized(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        // Interior apostrophes and hyphens are fine ("Baldur's"); further
        // uppercase letters are not ("DUNGEON").
        Some(first) if first.is_uppercase() => chars.all(|c| !c.is_uppercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_rank_by_frequency_then_alphabetically() {
        let text = "initiative initiative combat combat attack";
        assert_eq!(
            extract_keywords(text, 3),
            vec!["combat", "initiative", "attack"]
        );
    }

    #[test]
    fn keywords_skip_stopwords_and_short_tokens() {
        let text = "the cat ran to the big dragon dragon";
        assert_eq!(extract_keywords(text, 5), vec!["dragon"]);
    }

    #[test]
    fn entities_are_capitalized_runs() {
        let text = "The Mind Flayer stalks the Forgotten Realms, unlike goblins.";
        assert_eq!(
            extract_entities(text),
            vec!["Mind Flayer".to_string(), "Forgotten Realms".to_string()]
        );
    }

    #[test]
    fn single_capitalized_words_are_not_entities() {
        assert!(extract_entities("Roll a Strength check now.").is_empty());
    }

    #[test]
    fn entity_runs_stop_at_punctuation_cased_words() {
        let text = "Dungeon Master Guide and DUNGEON MASTER shouting";
        // All-caps words are not title-case, so the second run dies.
        assert_eq!(extract_entities(text), vec!["Dungeon Master Guide".to_string()]);
    }

    #[test]
    fn extraction_is_deterministic() {
        let text = "Baldur's Gate and Baldur's Gate again in the Sword Coast";
        assert_eq!(extract_entities(text), extract_entities(text));
        assert_eq!(extract_keywords(text, 4), extract_keywords(text, 4));
    }
}
