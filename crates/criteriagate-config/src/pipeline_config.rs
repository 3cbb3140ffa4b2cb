// crates/criteriagate-config/src/pipeline_config.rs
// ============================================================================
// Module: CriteriaGate Pipeline Configuration
// Description: Environment-variable driven configuration for concurrency
//              limits, timeouts, cache sizing, and circuit breaker tuning.
// Purpose: Load configuration once at process startup into a validated,
//          immutable struct; every other crate reads fields, none re-reads
//          the environment.
// Dependencies: std::env, thiserror
// ============================================================================

//! ## Overview
//! Every field has a documented default so a bare environment still
//! produces a safe, fail-closed configuration. A present-but-unparseable
//! value is a hard startup error rather than a silently ignored default.

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading [`PipelineConfig`] from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable was present but could not be parsed.
    #[error("{var} is set to an invalid value '{value}': {reason}")]
    InvalidValue {
        /// Environment variable name.
        var: &'static str,
        /// Raw value read from the environment.
        value: String,
        /// Parse failure detail.
        reason: String,
    },
}

/// Validated, environment-driven configuration for the pipeline runtime,
/// outbox dispatcher, and resilience primitives.
///
/// # Invariants
/// - Constructed once via [`PipelineConfig::from_env`]; never re-read
///   mid-run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum criteria rows persisted per batch (parse-time truncation).
    /// `0` means unlimited. Default `0`.
    pub pipeline_max_criteria: u32,
    /// Maximum entities dispatched for grounding per run. `0` means
    /// unlimited. Default `0`.
    pub pipeline_max_entities: u32,
    /// Bounded parallelism for the ground node's per-entity fan-out.
    /// Default `4`.
    pub ground_concurrency: usize,
    /// Bounded parallelism for the structure node's per-criterion fan-out.
    /// Default `4`.
    pub structure_concurrency: usize,
    /// Outbox dispatcher poll interval. Default `500ms`.
    pub outbox_poll_interval: Duration,
    /// Maximum outbox retries before dead-lettering. Default `3`.
    pub outbox_max_retries: u32,
    /// Per-call LLM timeout. Default `30s`.
    pub llm_timeout: Duration,
    /// Per-call terminology provider timeout. Default `30s`.
    pub provider_timeout: Duration,
    /// Deadline for fully resolving one entity's grounding, spanning every
    /// provider call and retry round for that entity. Default `120s`.
    pub ground_entity_timeout: Duration,
    /// Deadline for the ground node's entire fan-out across one batch.
    /// Default `15 minutes`.
    pub ground_node_timeout: Duration,
    /// Terminology cache entry time-to-live. Default `5 minutes`.
    pub cache_ttl: Duration,
    /// Terminology cache maximum entry count. Default `10_000`.
    pub cache_capacity: usize,
    /// Consecutive failures before a circuit breaker opens. Default `5`.
    pub circuit_failure_threshold: u32,
    /// Circuit breaker failure-counting window. Default `60s`.
    pub circuit_window: Duration,
    /// Age a failed protocol or a dead-letter event must reach before it is
    /// eligible for lazy archival on next access. Default `7 days`.
    pub archive_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_max_criteria: 0,
            pipeline_max_entities: 0,
            ground_concurrency: 4,
            structure_concurrency: 4,
            outbox_poll_interval: Duration::from_millis(500),
            outbox_max_retries: 3,
            llm_timeout: Duration::from_secs(30),
            provider_timeout: Duration::from_secs(30),
            ground_entity_timeout: Duration::from_secs(120),
            ground_node_timeout: Duration::from_secs(15 * 60),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 10_000,
            circuit_failure_threshold: 5,
            circuit_window: Duration::from_secs(60),
            archive_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from the process environment, falling back to
    /// documented defaults for every unset variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable is present but
    /// cannot be parsed into its expected type.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            pipeline_max_criteria: parse_u32("PIPELINE_MAX_CRITERIA", defaults.pipeline_max_criteria)?,
            pipeline_max_entities: parse_u32("PIPELINE_MAX_ENTITIES", defaults.pipeline_max_entities)?,
            ground_concurrency: parse_usize("GROUND_CONCURRENCY", defaults.ground_concurrency)?,
            structure_concurrency: parse_usize("STRUCTURE_CONCURRENCY", defaults.structure_concurrency)?,
            outbox_poll_interval: parse_millis("OUTBOX_POLL_INTERVAL_MS", defaults.outbox_poll_interval)?,
            outbox_max_retries: parse_u32("OUTBOX_MAX_RETRIES", defaults.outbox_max_retries)?,
            llm_timeout: parse_millis("LLM_TIMEOUT_MS", defaults.llm_timeout)?,
            provider_timeout: parse_millis("PROVIDER_TIMEOUT_MS", defaults.provider_timeout)?,
            ground_entity_timeout: parse_seconds(
                "GROUND_ENTITY_TIMEOUT_SEC",
                defaults.ground_entity_timeout,
            )?,
            ground_node_timeout: parse_seconds(
                "GROUND_NODE_TIMEOUT_SEC",
                defaults.ground_node_timeout,
            )?,
            cache_ttl: parse_seconds("CACHE_TTL_SECONDS", defaults.cache_ttl)?,
            cache_capacity: parse_usize("CACHE_CAPACITY", defaults.cache_capacity)?,
            circuit_failure_threshold: parse_u32(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_failure_threshold,
            )?,
            circuit_window: parse_seconds("CIRCUIT_WINDOW_SEC", defaults.circuit_window)?,
            archive_ttl: parse_seconds("ARCHIVE_TTL_SECONDS", defaults.archive_ttl)?,
        })
    }
}

fn parse_u32(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    parse_env(var, default, str::parse)
}

fn parse_usize(var: &'static str, default: usize) -> Result<usize, ConfigError> {
    parse_env(var, default, str::parse)
}

fn parse_millis(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_env(var, default, |value: &str| value.parse::<u64>().map(Duration::from_millis))
}

fn parse_seconds(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_env(var, default, |value: &str| value.parse::<u64>().map(Duration::from_secs))
}

/// Reads `var` from the environment, applying `parse` when present and
/// returning `default` when unset. A present-but-unparseable value is a
/// hard error rather than a silent fallback.
fn parse_env<T, E, F>(var: &'static str, default: T, parse: F) -> Result<T, ConfigError>
where
    F: FnOnce(&str) -> Result<T, E>,
    E: std::fmt::Display,
{
    match env::var(var) {
        Ok(value) => parse(&value).map_err(|err| ConfigError::InvalidValue {
            var,
            value,
            reason: err.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(raw)) => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string_lossy().into_owned(),
            reason: "value is not valid unicode".to_owned(),
        }),
    }
}
