use std::collections::HashMap;

use tracing::debug;

/// Scores how alike two labels are, from 0 (unrelated) to 100 (identical).
pub trait Similarity: Send + Sync {
    fn score(&self, a: &str, b: &str) -> u8;
}

/// Normalised Levenshtein similarity scaled to 0..=100.
#[derive(Debug, Clone, Copy, Default)]
pub struct Levenshtein;

impl Similarity for Levenshtein {
    fn score(&self, a: &str, b: &str) -> u8 {
        (strsim::normalized_levenshtein(a, b) * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Label part of a scraped key (`section-label`), if it has one.
fn scraped_label(name: &str) -> Option<&str> {
    name.split_once('-').map(|(_, label)| label)
}

/// Lazily built mapping from API parameter ids to scraped entity names.
///
/// The first lookup for a parameter scans the scraped names; the result is
/// kept for the lifetime of the matcher and never re-evaluated.
pub struct FuzzyMatcher {
    threshold: u8,
    similarity: Box<dyn Similarity>,
    cache: HashMap<String, Vec<String>>,
}

impl FuzzyMatcher {
    pub fn new(threshold: u8, similarity: Box<dyn Similarity>) -> Self {
        Self {
            threshold,
            similarity,
            cache: HashMap::new(),
        }
    }

    pub fn get(&self, parameter_id: &str) -> Option<&[String]> {
        self.cache.get(parameter_id).map(Vec::as_slice)
    }

    /// Scraped names that receive values of `parameter_id`. Falls back to the
    /// API friendly name itself when nothing scores high enough.
    pub fn resolve<'a, I>(&mut self, parameter_id: &str, friendly_name: &str, scraped: I) -> &[String]
    where
        I: IntoIterator<Item = &'a str>,
    {
        if !self.cache.contains_key(parameter_id) {
            let mut matches: Vec<String> = scraped
                .into_iter()
                .filter(|name| {
                    scraped_label(name).is_some_and(|label| {
                        self.similarity.score(friendly_name, label) >= self.threshold
                    })
                })
                .map(str::to_string)
                .collect();
            if matches.is_empty() {
                matches.push(friendly_name.to_string());
            }
            debug!(parameter = %parameter_id, ?matches, "mapped API parameter to scraped names");
            self.cache.insert(parameter_id.to_string(), matches);
        }
        self.cache.get(parameter_id).map(Vec::as_slice).unwrap_or_default()
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FUZZY_THRESHOLD, Box::new(Levenshtein))
    }
}
