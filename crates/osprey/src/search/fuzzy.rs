//
// search/fuzzy.rs
//
// Case-insensitive subsequence matching for file name queries. The
// pattern is lowered once and reused across every candidate.
//

/// A prepared fuzzy query.
#[derive(Debug, Clone, Default)]
pub struct FuzzyQuery {
    lowered: Vec<char>,
}

impl FuzzyQuery {
    pub fn new(pattern: &str) -> Self {
        Self {
            lowered: pattern
                .chars()
                .flat_map(|c| c.to_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lowered.is_empty()
    }

    /// Contiguous case-insensitive substring match.
    pub fn matches_contiguous(&self, candidate: &str) -> bool {
        if self.lowered.is_empty() {
            return true;
        }
        let needle: String = self.lowered.iter().collect();
        let haystack: String = candidate.chars().flat_map(|c| c.to_lowercase()).collect();
        haystack.contains(&needle)
    }

    /// Whether every pattern character appears in `candidate` in order.
    /// The empty pattern matches everything.
    pub fn matches(&self, candidate: &str) -> bool {
        let mut pattern = self.lowered.iter();
        let Some(mut needle) = pattern.next() else {
            return true;
        };
        for c in candidate.chars().flat_map(|c| c.to_lowercase()) {
            if c == *needle {
                match pattern.next() {
                    Some(next) => needle = next,
                    None => return true,
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsequence_match() {
        let q = FuzzyQuery::new("abc");
        assert!(q.matches("a_b_c"));
        assert!(q.matches("xaxbxcx"));
        assert!(!q.matches("acb"));
        assert!(!q.matches("ab"));
    }

    #[test]
    fn test_case_insensitive() {
        let q = FuzzyQuery::new("ReadMe");
        assert!(q.matches("README.md"));
        assert!(q.matches("docs/readme.txt"));
    }

    #[test]
    fn test_empty_pattern_matches_all() {
        let q = FuzzyQuery::new("");
        assert!(q.is_empty());
        assert!(q.matches("anything"));
        assert!(q.matches(""));
    }

    #[test]
    fn test_pattern_longer_than_candidate() {
        let q = FuzzyQuery::new("abcdef");
        assert!(!q.matches("abc"));
    }

    #[test]
    fn test_contiguous_requires_substring() {
        let q = FuzzyQuery::new("abc");
        assert!(q.matches_contiguous("xxabcxx"));
        assert!(q.matches_contiguous("ABCd"));
        assert!(!q.matches_contiguous("a_b_c"));
    }
}
