use std::collections::HashSet;

/// Decides whether a message body is objectionable.
pub trait ContentFilter: Send + Sync {
    fn contains_profanity(&self, text: &str) -> bool;
}

/// Matches whole words, case-insensitively, against a fixed word list.
#[derive(Debug, Clone, Default)]
pub struct WordListFilter {
    words: HashSet<String>,
}

impl WordListFilter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }
}

impl ContentFilter for WordListFilter {
    fn contains_profanity(&self, text: &str) -> bool {
        if self.words.is_empty() {
            return false;
        }
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .any(|w| self.words.contains(&w.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_ignoring_case() {
        let filter = WordListFilter::new(["darn", " Heck "]);
        assert!(filter.contains_profanity("well DARN it"));
        assert!(filter.contains_profanity("what the heck!"));
        assert!(!filter.contains_profanity("darning socks"));
        assert!(!filter.contains_profanity("hello"));
    }

    #[test]
    fn empty_list_passes_everything() {
        let filter = WordListFilter::new(Vec::<String>::new());
        assert!(!filter.contains_profanity("anything at all"));
    }
}
