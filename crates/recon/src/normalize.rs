use std::collections::BTreeSet;
use std::fmt;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical token set of a display name.
///
/// Uppercased, decomposed with combining marks dropped, every character
/// outside `A-Z0-9` treated as a separator. Token order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameTokens(BTreeSet<String>);

impl NameTokens {
    pub fn new(text: &str) -> Self {
        let folded: String = text
            .to_uppercase()
            .nfkd()
            .filter(|c| !is_combining_mark(*c))
            .map(|c| if c.is_ascii_uppercase() || c.is_ascii_digit() { c } else { ' ' })
            .collect();
        Self(folded.split_whitespace().map(str::to_string).collect())
    }

    /// Absent input yields the empty set.
    pub fn from_opt(text: Option<&str>) -> Self {
        text.map(Self::new).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn is_subset(&self, other: &NameTokens) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Equality or containment in either direction.
    pub fn overlaps_fully(&self, other: &NameTokens) -> bool {
        self.is_subset(other) || other.is_subset(self)
    }
}

impl fmt::Display for NameTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tok in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(tok)?;
            first = false;
        }
        Ok(())
    }
}

/// Convenience wrapper over [`NameTokens::new`].
pub fn normalize(text: &str) -> NameTokens {
    NameTokens::new(text)
}

/// Trimmed, uppercased name. Used for exact name equality and for the
/// legacy substring heuristics, which work on raw text rather than tokens.
pub fn canonical_name(text: &str) -> String {
    text.trim().to_uppercase()
}

/// Last whitespace-separated word of a name, uppercased.
pub fn surname(text: &str) -> Option<String> {
    text.split_whitespace().last().map(str::to_uppercase)
}
