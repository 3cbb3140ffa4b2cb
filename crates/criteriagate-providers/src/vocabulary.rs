// crates/criteriagate-providers/src/vocabulary.rs
// ============================================================================
// Module: CriteriaGate Vocabulary Providers
// Description: HTTP-backed TerminologyProvider adapters for SNOMED, LOINC,
//              RxNorm, ICD-10, HPO, and UMLS lookups, plus tiered matching.
// Purpose: Give the ground node exact/synonym/fuzzy matching over a real
//          terminology endpoint behind one shared client shape.
// Dependencies: criteriagate_core, reqwest
// ============================================================================

//! ## Overview
//! Every vocabulary adapter issues the same shape of request (a bounded GET
//! against a configured base URL with `q=<text>`) and only the parsing of
//! the response differs; the tiered-match confidence assignment (exact
//! 0.95, synonym/word 0.75, fuzzy 0.50) happens here rather than in the
//! provider's backing service so all vocabularies score consistently.

use std::time::Duration;

use async_trait::async_trait;
use criteriagate_core::Candidate;
use criteriagate_core::ClassifiedError;
use criteriagate_core::EntityType;
use criteriagate_core::PermanentError;
use criteriagate_core::TerminologyProvider;
use criteriagate_core::TransientError;
use serde::Deserialize;

/// Confidence assigned to an exact-text match.
pub const EXACT_MATCH_CONFIDENCE: f64 = 0.95;
/// Confidence assigned to a synonym/word-level match.
pub const SYNONYM_MATCH_CONFIDENCE: f64 = 0.75;
/// Confidence assigned to a fuzzy match, the lowest automatic tier.
pub const FUZZY_MATCH_CONFIDENCE: f64 = 0.50;

/// One row returned by a vocabulary lookup endpoint, before tiered scoring.
#[derive(Debug, Clone, Deserialize)]
struct RawMatch {
    code: String,
    display: String,
    #[serde(default)]
    exact: bool,
    #[serde(default)]
    synonym: bool,
}

/// Configuration for a single vocabulary's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct VocabularyConfig {
    /// Provider identifier used as the routing-table key and the
    /// [`Candidate::provider`] tag (e.g. `"snomed"`).
    pub provider_id: String,
    /// Base URL of the lookup endpoint; queried as `{base_url}?q=<text>`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// Generic HTTP-backed terminology provider shared by every vocabulary.
pub struct HttpVocabularyProvider {
    config: VocabularyConfig,
    client: reqwest::Client,
}

impl HttpVocabularyProvider {
    /// Builds a provider for one vocabulary's endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Permanent`] if the HTTP client cannot be built.
    pub fn new(config: VocabularyConfig) -> Result<Self, ClassifiedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ClassifiedError::Permanent(PermanentError::new(err.to_string())))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TerminologyProvider for HttpVocabularyProvider {
    async fn search(
        &self,
        entity_text: &str,
        _entity_type: EntityType,
    ) -> Result<Vec<Candidate>, ClassifiedError> {
        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[("q", entity_text)])
            .send()
            .await
            .map_err(|err| ClassifiedError::Transient(TransientError::new(err.to_string())))?;

        if !response.status().is_success() {
            return Err(ClassifiedError::Transient(TransientError::new(format!(
                "{} lookup failed with status {}",
                self.config.provider_id,
                response.status()
            ))));
        }

        let matches: Vec<RawMatch> = response
            .json()
            .await
            .map_err(|err| ClassifiedError::Permanent(PermanentError::new(err.to_string())))?;

        Ok(score_tiers(&self.config.provider_id, matches))
    }
}

/// Assigns tiered confidence scores: the first non-empty tier wins, so an
/// exact match present anywhere in the response suppresses synonym/fuzzy
/// rows from the same response.
fn score_tiers(provider_id: &str, matches: Vec<RawMatch>) -> Vec<Candidate> {
    let exact: Vec<_> = matches.iter().filter(|m| m.exact).collect();
    if !exact.is_empty() {
        return exact
            .into_iter()
            .map(|m| to_candidate(provider_id, m, EXACT_MATCH_CONFIDENCE))
            .collect();
    }
    let synonym: Vec<_> = matches.iter().filter(|m| m.synonym).collect();
    if !synonym.is_empty() {
        return synonym
            .into_iter()
            .map(|m| to_candidate(provider_id, m, SYNONYM_MATCH_CONFIDENCE))
            .collect();
    }
    matches
        .iter()
        .map(|m| to_candidate(provider_id, m, FUZZY_MATCH_CONFIDENCE))
        .collect()
}

/// Converts a raw match row to a [`Candidate`] at the given tier confidence.
fn to_candidate(provider_id: &str, raw: &RawMatch, confidence: f64) -> Candidate {
    Candidate {
        provider: provider_id.to_owned(),
        code: raw.code.clone(),
        display: raw.display.clone(),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::EXACT_MATCH_CONFIDENCE;
    use super::FUZZY_MATCH_CONFIDENCE;
    use super::RawMatch;
    use super::SYNONYM_MATCH_CONFIDENCE;
    use super::score_tiers;

    #[test]
    fn exact_match_suppresses_other_tiers() {
        let matches = vec![
            RawMatch { code: "A".to_owned(), display: "a".to_owned(), exact: true, synonym: false },
            RawMatch { code: "B".to_owned(), display: "b".to_owned(), exact: false, synonym: true },
        ];
        let candidates = score_tiers("snomed", matches);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, EXACT_MATCH_CONFIDENCE);
    }

    #[test]
    fn synonym_wins_over_fuzzy_when_no_exact() {
        let matches = vec![
            RawMatch { code: "A".to_owned(), display: "a".to_owned(), exact: false, synonym: true },
            RawMatch { code: "B".to_owned(), display: "b".to_owned(), exact: false, synonym: false },
        ];
        let candidates = score_tiers("loinc", matches);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].confidence, SYNONYM_MATCH_CONFIDENCE);
    }

    #[test]
    fn falls_back_to_fuzzy_when_no_exact_or_synonym() {
        let matches =
            vec![RawMatch { code: "A".to_owned(), display: "a".to_owned(), exact: false, synonym: false }];
        let candidates = score_tiers("rxnorm", matches);
        assert_eq!(candidates[0].confidence, FUZZY_MATCH_CONFIDENCE);
    }
}
