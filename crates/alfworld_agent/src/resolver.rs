//! Free-text action resolution against the admissible command set.

use super::bleu::sentence_bleu;

pub const DEFAULT_ACTION_MARKER: &str = "Action:";
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.01;

/// Outcome of resolving one candidate action.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Text submitted to the environment.
    pub action: String,
    /// Candidate after marker extraction and truncation, case preserved.
    pub cleaned: String,
    /// Index into the admissible set when an entry was chosen.
    pub matched_index: Option<usize>,
    /// Best score seen, `None` when the admissible set was empty.
    pub best_score: Option<f64>,
}

impl Resolution {
    pub fn is_match(&self) -> bool {
        self.matched_index.is_some()
    }
}

/// Maps agent free text onto an admissible environment command.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResolver {
    marker: String,
    threshold: f64,
}

impl Default for ActionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_MARKER, DEFAULT_MATCH_THRESHOLD)
    }
}

impl ActionResolver {
    pub fn new(marker: impl Into<String>, threshold: f64) -> Self {
        Self {
            marker: marker.into(),
            threshold,
        }
    }

    pub fn marker(&self) -> &str {
        self.marker.as_str()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn resolve(&self, candidate: &str, admissible: &[String]) -> String {
        self.resolve_detailed(candidate, admissible).action
    }

    pub fn resolve_detailed(&self, candidate: &str, admissible: &[String]) -> Resolution {
        let cleaned = clean_candidate(candidate, self.marker.as_str());
        tracing::trace!(candidate, cleaned = cleaned.as_str(), "preprocessed action");

        if admissible.is_empty() {
            return Resolution {
                action: cleaned.clone(),
                cleaned,
                matched_index: None,
                best_score: None,
            };
        }

        let lowered = cleaned.to_lowercase();
        let mut best: Option<(usize, f64)> = None;
        for (index, choice) in admissible.iter().enumerate() {
            let score = sentence_bleu(choice.to_lowercase().as_str(), lowered.as_str());
            // strict comparison keeps the first of equal scores
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
        }

        match best {
            Some((index, score)) if score > self.threshold => {
                tracing::debug!(
                    action = admissible[index].as_str(),
                    score,
                    "resolved action to admissible command"
                );
                Resolution {
                    action: admissible[index].clone(),
                    cleaned,
                    matched_index: Some(index),
                    best_score: Some(score),
                }
            }
            other => {
                tracing::debug!(
                    action = lowered.as_str(),
                    best_score = other.map(|(_, score)| score),
                    threshold = self.threshold,
                    "no admissible command above threshold"
                );
                Resolution {
                    action: lowered,
                    cleaned,
                    matched_index: None,
                    best_score: other.map(|(_, score)| score),
                }
            }
        }
    }
}

/// Resolves with the default marker and the given threshold.
pub fn resolve_action(candidate: &str, admissible: &[String], threshold: f64) -> String {
    ActionResolver::new(DEFAULT_ACTION_MARKER, threshold).resolve(candidate, admissible)
}

/// Keeps the segment after the last marker, then cuts at the first period.
pub fn clean_candidate(candidate: &str, marker: &str) -> String {
    let segment = if !marker.is_empty() && candidate.contains(marker) {
        candidate
            .rsplit(marker)
            .next()
            .unwrap_or(candidate)
            .trim()
    } else {
        candidate
    };
    segment.split('.').next().unwrap_or_default().trim().to_string()
}
