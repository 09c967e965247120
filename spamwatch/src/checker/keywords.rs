//! Case-insensitive keyword matching.

/// A fixed keyword list ready for matching.
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher {
    /// (original literal, lowercase form)
    keywords: Vec<(String, String)>,
}

impl KeywordMatcher {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = std::collections::HashSet::new();
        let keywords = keywords
            .into_iter()
            .map(Into::into)
            .filter_map(|k| {
                let trimmed = k.trim().to_string();
                let lower = trimmed.to_lowercase();
                (!lower.is_empty() && seen.insert(lower.clone())).then_some((trimmed, lower))
            })
            .collect();
        Self { keywords }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Keywords found in `text`, in keyword-list order, each at most once.
    pub fn find(&self, text: &str) -> Vec<String> {
        self.find_any(std::iter::once(text))
    }

    /// Keywords found in any of `texts`, deduplicated.
    pub fn find_any<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let haystacks: Vec<String> = texts.into_iter().map(str::to_lowercase).collect();
        self.keywords
            .iter()
            .filter(|(_, lower)| haystacks.iter().any(|h| h.contains(lower.as_str())))
            .map(|(original, _)| original.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_and_deduplicated() {
        let matcher = KeywordMatcher::new(["Spam", "scam", "SPAM", " fraud "]);
        let found = matcher.find("Likely SPAM caller - reported as scam, spam risk");
        assert_eq!(found, vec!["Spam", "scam"]);
    }

    #[test]
    fn test_no_match() {
        let matcher = KeywordMatcher::new(["spam"]);
        assert!(matcher.find("Unknown caller").is_empty());
        assert!(KeywordMatcher::new(Vec::<String>::new()).find("spam").is_empty());
    }

    #[test]
    fn test_find_any_across_texts() {
        let matcher = KeywordMatcher::new(["telemarketing", "fraud"]);
        let found = matcher.find_any(["nothing here", "Category: Telemarketing"]);
        assert_eq!(found, vec!["telemarketing"]);
    }
}
