use std::collections::BTreeMap;

use crate::model::{FamilyCode, Household};
use crate::normalize::{canonical_name, NameTokens};

/// Maps person names to household codes.
///
/// Entries are scanned in registry order and, within an entry, slots in
/// column order; the first entry with a slot whose token set equals or
/// contains (either way) the query's wins.
#[derive(Debug, Clone)]
pub struct FamilyResolver {
    entries: Vec<Entry>,
    /// token -> ascending entry indices holding it in any slot.
    index: Option<BTreeMap<String, Vec<usize>>>,
}

#[derive(Debug, Clone)]
struct Entry {
    code: String,
    slot_tokens: Vec<NameTokens>,
    /// Uppercased raw slot text for the substring heuristic.
    slot_text: Vec<String>,
}

impl FamilyResolver {
    /// Linear-scan resolver.
    pub fn new(households: &[Household]) -> Self {
        let entries = households
            .iter()
            .map(|h| Entry {
                code: h.code.clone(),
                slot_tokens: h
                    .slots
                    .iter()
                    .map(|s| NameTokens::new(s))
                    .filter(|t| !t.is_empty())
                    .collect(),
                slot_text: h.slots.iter().map(|s| s.to_uppercase()).collect(),
            })
            .collect();
        Self { entries, index: None }
    }

    /// Resolver backed by a token -> entry postings index. Produces the same
    /// answers as the linear scan.
    pub fn indexed(households: &[Household]) -> Self {
        let mut resolver = Self::new(households);
        let mut index: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, entry) in resolver.entries.iter().enumerate() {
            for tokens in &entry.slot_tokens {
                for tok in tokens.iter() {
                    let postings = index.entry(tok.to_string()).or_default();
                    if postings.last() != Some(&i) {
                        postings.push(i);
                    }
                }
            }
        }
        log::debug!(
            "family index: {} households, {} distinct tokens",
            resolver.entries.len(),
            index.len()
        );
        resolver.index = Some(index);
        resolver
    }

    pub fn with_index(households: &[Household], use_index: bool) -> Self {
        if use_index {
            Self::indexed(households)
        } else {
            Self::new(households)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a display name to its household.
    pub fn resolve(&self, name: Option<&str>) -> FamilyCode {
        let name = match name {
            Some(n) if !n.trim().is_empty() => n,
            _ => return FamilyCode::NotIdentified,
        };
        let query = NameTokens::new(name);
        if query.is_empty() {
            return FamilyCode::NotFound;
        }
        match self.first_match(&query) {
            Some(i) => FamilyCode::Found(self.entries[i].code.clone()),
            None => FamilyCode::NotFound,
        }
    }

    fn first_match(&self, query: &NameTokens) -> Option<usize> {
        let matches = |i: &usize| {
            self.entries[*i]
                .slot_tokens
                .iter()
                .any(|slot| slot.overlaps_fully(query))
        };
        match &self.index {
            // Any slot that contains or is contained by a non-empty query
            // shares at least one token with it.
            Some(index) => {
                let mut candidates: Vec<usize> = query
                    .iter()
                    .filter_map(|tok| index.get(tok))
                    .flatten()
                    .copied()
                    .collect();
                candidates.sort_unstable();
                candidates.dedup();
                candidates.into_iter().find(|i| matches(i))
            }
            None => (0..self.entries.len()).find(|i| matches(i)),
        }
    }

    /// Looser lookup: the trimmed, uppercased name appears verbatim inside
    /// some slot's text. Returns the first such household code.
    pub fn resolve_by_substring(&self, name: &str) -> Option<&str> {
        let needle = canonical_name(name);
        if needle.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.slot_text.iter().any(|slot| slot.contains(&needle)))
            .map(|e| e.code.as_str())
    }
}
