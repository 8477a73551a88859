//! Small text utilities shared by the classifier and the extractors.

/// Lowercases and trims an utterance the way the transcript pipeline does.
pub fn clean(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Lowercase word tokens of `text`. Decimal points inside numbers are kept.
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|w| w.trim_matches('.'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether any token of `text` is one of `candidates`.
pub fn has_any_word(text: &str, candidates: &[&str]) -> bool {
    words(text).iter().any(|w| candidates.contains(&w.as_str()))
}

/// Whether the word sequence `phrase` occurs in `text`.
pub fn has_phrase(text: &str, phrase: &str) -> bool {
    let haystack = words(text);
    let needle = words(phrase);
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle.as_slice())
}

/// Drops trailing punctuation and normalizes case so two transcripts of the
/// same utterance compare equal.
pub fn normalized(text: &str) -> String {
    words(text).join(" ")
}

const NUMBER_WORDS: [(&str, f32); 11] = [
    ("one", 1.0),
    ("two", 2.0),
    ("three", 3.0),
    ("four", 4.0),
    ("five", 5.0),
    ("six", 6.0),
    ("seven", 7.0),
    ("eight", 8.0),
    ("nine", 9.0),
    ("ten", 10.0),
    ("twice", 2.0),
];

/// The first literal number in `text`, written as digits or as a word.
pub fn first_number(text: &str) -> Option<f32> {
    words(text).iter().find_map(|w| {
        w.parse::<f32>().ok().filter(|n| n.is_finite()).or_else(|| {
            NUMBER_WORDS
                .iter()
                .find(|(name, _)| *name == w.as_str())
                .map(|(_, n)| *n)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_strip_punctuation() {
        assert_eq!(words("Move it LEFT, please."), vec!["move", "it", "left", "please"]);
        assert_eq!(words("scale by 2.5x"), vec!["scale", "by", "2.5x"]);
    }

    #[test]
    fn test_has_any_word_is_token_based() {
        assert!(has_any_word("start the physics", &["start"]));
        assert!(!has_any_word("display a cube", &["play"]));
    }

    #[test]
    fn test_has_phrase() {
        assert!(has_phrase("bring it toward me", "toward me"));
        assert!(!has_phrase("toward the wall me", "toward me"));
    }

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("make it smaller by 4"), Some(4.0));
        assert_eq!(first_number("make it three times bigger"), Some(3.0));
        assert_eq!(first_number("move it 1.5 meters"), Some(1.5));
        assert_eq!(first_number("make it bigger"), None);
    }

    #[test]
    fn test_normalized_matches_transcript_variants() {
        assert_eq!(normalized("Make a red cube."), normalized("make a red cube"));
    }
}
