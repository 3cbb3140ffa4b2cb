// crates/criteriagate-cli/src/config.rs
// ============================================================================
// Module: CriteriaGate CLI Configuration
// Description: Environment-driven wiring for the adapters `serve` needs
//              (store path, blob root, LLM endpoint, vocabulary providers).
// Purpose: Keep capability construction out of `main.rs`'s command dispatch
//          and in one place that fails closed on a malformed env var.
// Dependencies: std::env, criteriagate-providers
// ============================================================================

//! ## Overview
//! Unlike [`criteriagate_config::PipelineConfig`] (pipeline tuning, read by
//! every node), this module is CLI-only: which concrete adapters `serve`
//! constructs and where they point. A vocabulary provider is wired only
//! when its endpoint env var is set; an entity type routed to an
//! unconfigured provider simply grounds with whatever other providers in
//! its order are present.

use std::collections::BTreeMap;
use std::env;
use std::env::VarError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use criteriagate_core::TerminologyProvider;
use criteriagate_providers::HttpVocabularyProvider;
use criteriagate_providers::LlmClientConfig;
use criteriagate_providers::VocabularyConfig;
use thiserror::Error;

/// Vocabulary provider ids consulted by [`criteriagate_providers::RoutingTable::default_table`].
const VOCABULARY_PROVIDER_IDS: [&str; 7] = ["snomed", "loinc", "rxnorm", "icd10", "cpt", "hpo", "umls"];

/// A malformed or missing required environment variable.
#[derive(Debug, Error)]
pub enum CliConfigError {
    /// A required variable was not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable was set but not valid unicode.
    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(&'static str),
    /// Building an HTTP-backed adapter client failed.
    #[error("failed to build adapter client: {0}")]
    Adapter(String),
    /// A variable was set but failed to parse as its expected type.
    #[error("environment variable {var} has invalid value {value:?}: {reason}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value read from the environment.
        value: String,
        /// Parse failure detail.
        reason: String,
    },
}

/// Adapter wiring read once at `serve` startup.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Path to the `SQLite` database file.
    pub db_path: PathBuf,
    /// Root directory `local://` blob URIs resolve against.
    pub blob_root: PathBuf,
    /// Structured-LLM endpoint shared by every pipeline role.
    pub llm: LlmClientConfig,
    /// Vocabulary endpoints, keyed by provider id, for whichever providers
    /// have an endpoint configured.
    pub vocabularies: Vec<VocabularyConfig>,
}

impl CliConfig {
    /// Reads just `CRITERIAGATE_DB_PATH`, for subcommands that touch the
    /// store without needing the rest of `serve`'s adapter wiring.
    ///
    /// # Errors
    ///
    /// Returns [`CliConfigError`] if the variable is set but not valid
    /// unicode.
    pub fn db_path_from_env() -> Result<PathBuf, CliConfigError> {
        env_or("CRITERIAGATE_DB_PATH", "criteriagate.sqlite3").map(PathBuf::from)
    }

    /// Loads wiring from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`CliConfigError`] if `CRITERIAGATE_LLM_ENDPOINT` is unset or
    /// any present variable is not valid unicode.
    pub fn from_env() -> Result<Self, CliConfigError> {
        let db_path = PathBuf::from(env_or("CRITERIAGATE_DB_PATH", "criteriagate.sqlite3")?);
        let blob_root = PathBuf::from(env_or("CRITERIAGATE_BLOB_ROOT", ".")?);
        let llm = LlmClientConfig {
            model: env_or("CRITERIAGATE_LLM_MODEL", "criteriagate-extractor")?,
            endpoint: required_env("CRITERIAGATE_LLM_ENDPOINT")?,
            timeout: Duration::from_secs(parse_u64_or("CRITERIAGATE_LLM_TIMEOUT_SEC", 30)?),
        };
        let vocabularies = VOCABULARY_PROVIDER_IDS
            .iter()
            .filter_map(|provider_id| {
                let var = format!("CRITERIAGATE_VOCAB_{}_ENDPOINT", provider_id.to_uppercase());
                match env::var(&var) {
                    Ok(base_url) => Some(Ok(VocabularyConfig {
                        provider_id: (*provider_id).to_owned(),
                        base_url,
                        timeout: Duration::from_secs(30),
                    })),
                    Err(VarError::NotPresent) => None,
                    Err(VarError::NotUnicode(_)) => Some(Err(CliConfigError::NotUnicode("CRITERIAGATE_VOCAB_*_ENDPOINT"))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { db_path, blob_root, llm, vocabularies })
    }

    /// Builds the provider map `TerminologyRouter::new` expects, one entry
    /// per configured vocabulary.
    ///
    /// # Errors
    ///
    /// Returns [`CliConfigError::Adapter`] if a vocabulary client cannot be
    /// built.
    pub fn build_providers(&self) -> Result<BTreeMap<String, Arc<dyn TerminologyProvider>>, CliConfigError> {
        self.vocabularies
            .iter()
            .map(|config| {
                let provider = HttpVocabularyProvider::new(config.clone())
                    .map_err(|err| CliConfigError::Adapter(err.to_string()))?;
                Ok((config.provider_id.clone(), Arc::new(provider) as Arc<dyn TerminologyProvider>))
            })
            .collect()
    }
}

/// Reads `var`, falling back to `default` when unset.
fn env_or(var: &'static str, default: &str) -> Result<String, CliConfigError> {
    match env::var(var) {
        Ok(value) => Ok(value),
        Err(VarError::NotPresent) => Ok(default.to_owned()),
        Err(VarError::NotUnicode(_)) => Err(CliConfigError::NotUnicode(var)),
    }
}

/// Reads `var`, erroring if it is unset.
fn required_env(var: &'static str) -> Result<String, CliConfigError> {
    match env::var(var) {
        Ok(value) => Ok(value),
        Err(VarError::NotPresent) => Err(CliConfigError::Missing(var)),
        Err(VarError::NotUnicode(_)) => Err(CliConfigError::NotUnicode(var)),
    }
}

/// Reads and parses `var` as `u64`, falling back to `default` when unset.
fn parse_u64_or(var: &'static str, default: u64) -> Result<u64, CliConfigError> {
    match env::var(var) {
        Ok(value) => value.parse::<u64>().map_err(|err| CliConfigError::InvalidValue {
            var,
            value,
            reason: err.to_string(),
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(CliConfigError::NotUnicode(var)),
    }
}
