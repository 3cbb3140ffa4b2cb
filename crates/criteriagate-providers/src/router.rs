// crates/criteriagate-providers/src/router.rs
// ============================================================================
// Module: CriteriaGate Terminology Router
// Description: Maps entity types to an ordered list of terminology providers
//              and merges their candidate lists.
// Purpose: Give the ground node a single entry point that hides how many
//          vocabularies back a given entity type.
// Dependencies: criteriagate_core, serde_yaml
// ============================================================================

//! ## Overview
//! The routing table is YAML so operators can retune provider order without
//! a rebuild. `Demographic` entities route to an empty provider list since
//! they are never grounded (see [`criteriagate_core::Entity::skip_grounding`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use criteriagate_core::Candidate;
use criteriagate_core::ClassifiedError;
use criteriagate_core::EntityType;
use criteriagate_core::PermanentError;
use criteriagate_core::TerminologyProvider;
use serde::Deserialize;

/// Ordered list of provider identifiers to consult for one entity type.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry(pub Vec<String>);

/// YAML-configured entity-type to provider-order routing table.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingTable {
    routes: BTreeMap<String, RouteEntry>,
}

impl RoutingTable {
    /// Parses a routing table from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error if `text` is not valid YAML or does not
    /// match the expected shape.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// The default routing table, matching the terminology router
    /// specification's built-in assignments.
    #[must_use]
    pub fn default_table() -> Self {
        let mut routes = BTreeMap::new();
        routes.insert("medication".to_owned(), RouteEntry(vec!["rxnorm".to_owned(), "umls".to_owned()]));
        routes.insert(
            "condition".to_owned(),
            RouteEntry(vec!["snomed".to_owned(), "icd10".to_owned(), "umls".to_owned()]),
        );
        routes.insert("lab_value".to_owned(), RouteEntry(vec!["loinc".to_owned(), "umls".to_owned()]));
        routes.insert(
            "biomarker".to_owned(),
            RouteEntry(vec!["loinc".to_owned(), "snomed".to_owned(), "umls".to_owned()]),
        );
        routes.insert(
            "procedure".to_owned(),
            RouteEntry(vec!["snomed".to_owned(), "cpt".to_owned(), "umls".to_owned()]),
        );
        routes.insert("phenotype".to_owned(), RouteEntry(vec!["hpo".to_owned(), "umls".to_owned()]));
        routes.insert("demographic".to_owned(), RouteEntry(Vec::new()));
        Self { routes }
    }

    /// Returns the provider order for `entity_type`, or an empty order if
    /// unconfigured (fail-closed: no providers consulted).
    #[must_use]
    pub fn order_for(&self, entity_type: EntityType) -> &[String] {
        self.routes
            .get(entity_type_key(entity_type))
            .map_or(&[][..], |entry| entry.0.as_slice())
    }
}

/// Maps an [`EntityType`] to its routing-table key.
const fn entity_type_key(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Condition => "condition",
        EntityType::Medication => "medication",
        EntityType::Procedure => "procedure",
        EntityType::LabValue => "lab_value",
        EntityType::Demographic => "demographic",
        EntityType::Biomarker => "biomarker",
        EntityType::Phenotype => "phenotype",
    }
}

/// A candidate tagged with which routing-table position produced it, used
/// by the ground node's tiered-match and dual-grounding reconciliation.
#[derive(Debug, Clone)]
pub struct RoutedCandidate {
    /// Candidate returned by a provider.
    pub candidate: Candidate,
    /// Position in the routing order this provider occupied (0 = first
    /// choice); used to break confidence ties toward the preferred vocabulary.
    pub route_rank: usize,
}

/// Routes a terminology search to every provider configured for
/// `entity_type`, merging their candidate lists.
pub struct TerminologyRouter {
    table: RoutingTable,
    providers: BTreeMap<String, Arc<dyn TerminologyProvider>>,
}

impl TerminologyRouter {
    /// Builds a router from a routing table and a provider-id keyed registry.
    #[must_use]
    pub fn new(table: RoutingTable, providers: BTreeMap<String, Arc<dyn TerminologyProvider>>) -> Self {
        Self { table, providers }
    }

    /// Searches every provider configured for `entity_type`, in routing
    /// order, merging results. A single provider's transient failure does
    /// not abort the others; a provider missing from the registry entirely
    /// is a permanent configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifiedError::Permanent`] when the routing table names a
    /// provider id that was never registered.
    pub async fn search(
        &self,
        entity_text: &str,
        entity_type: EntityType,
    ) -> Result<Vec<RoutedCandidate>, ClassifiedError> {
        let order = self.table.order_for(entity_type);
        let mut merged = Vec::new();
        for (rank, provider_id) in order.iter().enumerate() {
            let provider = self.providers.get(provider_id).ok_or_else(|| {
                ClassifiedError::Permanent(PermanentError::new(format!(
                    "no provider registered for routing table entry '{provider_id}'"
                )))
            })?;
            match provider.search(entity_text, entity_type).await {
                Ok(candidates) => {
                    merged.extend(candidates.into_iter().map(|candidate| RoutedCandidate {
                        candidate,
                        route_rank: rank,
                    }));
                }
                Err(ClassifiedError::Transient(_)) => {
                    // A single provider outage does not fail the whole route;
                    // remaining providers in order are still consulted.
                }
                Err(permanent @ ClassifiedError::Permanent(_)) => return Err(permanent),
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use criteriagate_core::EntityType;

    use super::RoutingTable;

    #[test]
    fn default_table_routes_medication_to_rxnorm_first() {
        let table = RoutingTable::default_table();
        assert_eq!(table.order_for(EntityType::Medication), ["rxnorm", "umls"]);
    }

    #[test]
    fn demographic_has_no_providers() {
        let table = RoutingTable::default_table();
        assert!(table.order_for(EntityType::Demographic).is_empty());
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = "routes:\n  condition:\n    - snomed\n    - umls\n";
        let table = RoutingTable::from_yaml(yaml).expect("valid yaml");
        assert_eq!(table.order_for(EntityType::Condition), ["snomed", "umls"]);
    }
}
