// crates/criteriagate-pipeline/src/tree.rs
// ============================================================================
// Module: CriteriaGate Pipeline Expression Tree Flattener
// Description: Converts a structuring LLM's AND/OR/NOT proposal into the
//              atomic/composite/relationship rows the store persists.
// Purpose: Give the structure node one place that walks a `Requirement`
//          tree and allocates ids for it, instead of repeating the
//          recursion at every call site.
// Dependencies: criteriagate-core, criteriagate-logic
// ============================================================================

//! ## Overview
//! The structure node asks its LLM for a [`criteriagate_contract::schemas::structure_proposal_schema`]
//! response, decodes it into a `Requirement<StructureLeaf>`, then calls
//! [`flatten_tree`] to walk that tree once, allocating a [`CriterionId`]-scoped
//! id for every node it visits and recording the parent/child edges between
//! them. A criterion whose root is a single atom needs no composite
//! wrapper at all; `flatten_tree` handles that case by simply returning one
//! atom and no composites or relationships.

use criteriagate_core::AtomicCriterion;
use criteriagate_core::CompositeCriterion;
use criteriagate_core::CriteriaType;
use criteriagate_core::CriterionId;
use criteriagate_core::CriterionRelationship;
use criteriagate_core::LogicOperator;
use criteriagate_core::NodeId;
use criteriagate_core::ProtocolId;
use criteriagate_core::RelationOperator;
use criteriagate_logic::Requirement;

use crate::ids::IdAllocator;

/// The bindable fields of an atomic criterion, carried as the leaf payload
/// of a `Requirement` tree before it is flattened into store rows.
///
/// Mirrors [`AtomicCriterion`]'s comparator fields; omits identity and
/// ownership (assigned during flattening) and `unit_concept_id` (resolved
/// later by the ordinal_resolve node).
#[derive(Debug, Clone)]
pub struct StructureLeaf {
    /// Domain of the bound entity concept.
    pub entity_domain: Option<String>,
    /// Terminology concept id the atom is bound to.
    pub entity_concept_id: Option<String>,
    /// Terminology system the concept id belongs to.
    pub entity_concept_system: Option<String>,
    /// Comparator applied to the bound value.
    pub relation_operator: RelationOperator,
    /// Numeric comparand, when the comparator is numeric.
    pub value_numeric: Option<bigdecimal::BigDecimal>,
    /// Textual comparand, when the comparator is textual.
    pub value_text: Option<String>,
    /// Unit of `value_numeric`, free text until ordinal resolution runs.
    pub unit_text: Option<String>,
    /// Whether the comparison is negated.
    pub negation: bool,
}

/// The rows one criterion's expression tree flattens into.
pub struct FlattenedTree {
    /// Leaf rows.
    pub atoms: Vec<AtomicCriterion>,
    /// Interior AND/OR/NOT rows.
    pub composites: Vec<CompositeCriterion>,
    /// Parent-to-child edges among the rows above.
    pub relationships: Vec<CriterionRelationship>,
}

/// Walks `root`, allocating an id for every node and recording edges
/// between composites and their children.
#[must_use]
pub fn flatten_tree(
    root: &Requirement<StructureLeaf>,
    criterion_id: CriterionId,
    protocol_id: ProtocolId,
    inclusion_exclusion: CriteriaType,
    ids: &IdAllocator,
) -> FlattenedTree {
    let mut tree = FlattenedTree { atoms: Vec::new(), composites: Vec::new(), relationships: Vec::new() };
    visit(root, criterion_id, protocol_id, inclusion_exclusion, ids, &mut tree);
    tree
}

fn visit(
    node: &Requirement<StructureLeaf>,
    criterion_id: CriterionId,
    protocol_id: ProtocolId,
    inclusion_exclusion: CriteriaType,
    ids: &IdAllocator,
    tree: &mut FlattenedTree,
) -> NodeId {
    match node {
        Requirement::Predicate(leaf) => {
            let id = ids.next_atom_id();
            tree.atoms.push(AtomicCriterion {
                id,
                criterion_id,
                protocol_id,
                inclusion_exclusion,
                entity_domain: leaf.entity_domain.clone(),
                entity_concept_id: leaf.entity_concept_id.clone(),
                entity_concept_system: leaf.entity_concept_system.clone(),
                relation_operator: leaf.relation_operator,
                value_numeric: leaf.value_numeric.clone(),
                value_text: leaf.value_text.clone(),
                unit_text: leaf.unit_text.clone(),
                unit_concept_id: None,
                negation: leaf.negation,
            });
            NodeId::Atom(id)
        }
        Requirement::And(children) => {
            composite(LogicOperator::And, children, criterion_id, protocol_id, inclusion_exclusion, ids, tree)
        }
        Requirement::Or(children) => {
            composite(LogicOperator::Or, children, criterion_id, protocol_id, inclusion_exclusion, ids, tree)
        }
        Requirement::Not(child) => {
            let id = ids.next_composite_id();
            tree.composites.push(CompositeCriterion {
                id,
                criterion_id,
                protocol_id,
                logic_operator: LogicOperator::Not,
            });
            let child_id = visit(child, criterion_id, protocol_id, inclusion_exclusion, ids, tree);
            tree.relationships.push(CriterionRelationship {
                criterion_id,
                parent: id,
                child: child_id,
                child_sequence: 0,
            });
            NodeId::Composite(id)
        }
        Requirement::RequireGroup { .. } => {
            // The structuring LLM's schema only ever emits `and`/`or`/`not`
            // composites and atoms; `RequireGroup` has no corresponding
            // JSON shape and never appears in a decoded proposal.
            unreachable!("structure proposals never decode to RequireGroup")
        }
    }
}

#[allow(clippy::too_many_arguments, reason = "internal recursion helper, not a public API")]
fn composite(
    operator: LogicOperator,
    children: &[Box<Requirement<StructureLeaf>>],
    criterion_id: CriterionId,
    protocol_id: ProtocolId,
    inclusion_exclusion: CriteriaType,
    ids: &IdAllocator,
    tree: &mut FlattenedTree,
) -> NodeId {
    let id = ids.next_composite_id();
    tree.composites.push(CompositeCriterion { id, criterion_id, protocol_id, logic_operator: operator });
    for (sequence, child) in children.iter().enumerate() {
        let child_id = visit(child, criterion_id, protocol_id, inclusion_exclusion, ids, tree);
        tree.relationships.push(CriterionRelationship {
            criterion_id,
            parent: id,
            child: child_id,
            #[allow(clippy::cast_possible_truncation, reason = "child counts never approach u32::MAX")]
            child_sequence: sequence as u32,
        });
    }
    NodeId::Composite(id)
}
