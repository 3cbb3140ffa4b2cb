// criteriagate-logic/tests/builder.rs
// ============================================================================
// Module: Builder Tests
// Description: Tests for RequirementBuilder, AndBuilder, OrBuilder, GroupBuilder.
// Purpose: Ensure builder combinators emit the expected requirement trees.
// ============================================================================
//! ## Overview
//! Integration tests covering the builder helpers for composing requirements.

#[path = "support/mocks.rs"]
mod mocks;
mod support;

use mocks::MockPredicate;
use criteriagate_logic::Requirement;
use criteriagate_logic::builder::AndBuilder;
use criteriagate_logic::builder::GroupBuilder;
use criteriagate_logic::builder::OrBuilder;
use criteriagate_logic::builder::RequirementBuilder;
use criteriagate_logic::builder::convenience;
use support::TestResult;
use support::ensure;

// ========================================================================
// SECTION: Mock Coverage
// ========================================================================

#[test]
fn test_mock_predicate_variants_used() {
    let _ = mocks::all_variants();
}

// ============================================================================
// SECTION: RequirementBuilder Tests
// ============================================================================

#[test]
fn test_requirement_builder_new() -> TestResult {
    let req = Requirement::predicate(MockPredicate::AlwaysTrue);
    let builder = RequirementBuilder::new(req.clone());
    ensure(builder.build() == req, "Expected builder to return the original requirement")?;
    Ok(())
}

#[test]
fn test_requirement_builder_predicate() -> TestResult {
    let builder = RequirementBuilder::predicate(MockPredicate::ValueGte(50));
    let req = builder.build();
    match req {
        Requirement::Predicate(MockPredicate::ValueGte(50)) => Ok(()),
        _ => Err("Expected ValueGte predicate".into()),
    }
}

#[test]
fn test_requirement_builder_not() -> TestResult {
    let builder = RequirementBuilder::predicate(MockPredicate::AlwaysTrue);
    let req = builder.not().build();
    match req {
        Requirement::Not(_) => Ok(()),
        _ => Err("Expected Not variant".into()),
    }
}

#[test]
fn test_requirement_builder_double_not() -> TestResult {
    let builder = RequirementBuilder::predicate(MockPredicate::AlwaysTrue);
    let req = builder.not().not().build();
    match req {
        Requirement::Not(outer) => match *outer {
            Requirement::Not(inner) => {
                ensure(
                    matches!(*inner, Requirement::Predicate(MockPredicate::AlwaysTrue)),
                    "Expected double NOT to wrap the original predicate",
                )
            }
            _ => Err("Expected inner Not".into()),
        },
        _ => Err("Expected outer Not".into()),
    }
}

#[test]
fn test_requirement_builder_and_also() -> TestResult {
    let builder = RequirementBuilder::predicate(MockPredicate::AlwaysTrue);
    let req = builder.and_also(Requirement::predicate(MockPredicate::AlwaysFalse)).build();
    match req {
        Requirement::And(reqs) => ensure(reqs.len() == 2, "Expected AND of two requirements"),
        _ => Err("Expected And variant".into()),
    }
}

#[test]
fn test_requirement_builder_or_else() -> TestResult {
    let builder = RequirementBuilder::predicate(MockPredicate::AlwaysFalse);
    let req = builder.or_else(Requirement::predicate(MockPredicate::AlwaysTrue)).build();
    match req {
        Requirement::Or(reqs) => ensure(reqs.len() == 2, "Expected OR of two requirements"),
        _ => Err("Expected Or variant".into()),
    }
}

#[test]
fn test_requirement_builder_chaining() -> TestResult {
    let req = RequirementBuilder::predicate(MockPredicate::AlwaysTrue)
        .and_also(Requirement::predicate(MockPredicate::AlwaysTrue))
        .or_else(Requirement::predicate(MockPredicate::AlwaysFalse))
        .not()
        .build();

    // NOT((true AND true) OR false) has complexity 1 (Not) + 1 (Or) + 2 (Or's children:
    // the And with 2 leaves = 1 + 2, and the single leaf = 1) = 1 + (1 + (1+2)) + 1 = 6.
    ensure(req.complexity() == 6, "Expected chained builder complexity to match its shape")?;
    match req {
        Requirement::Not(_) => Ok(()),
        _ => Err("Expected outermost Not".into()),
    }
}

// ============================================================================
// SECTION: AndBuilder Tests
// ============================================================================

#[test]
fn test_and_builder_new() -> TestResult {
    let builder = AndBuilder::<MockPredicate>::new();
    let req = builder.build();
    match req {
        Requirement::And(reqs) => {
            ensure(reqs.is_empty(), "Expected empty And builder to contain no requirements")?;
            Ok(())
        }
        _ => Err("Expected empty And".into()),
    }
}

#[test]
fn test_and_builder_default() -> TestResult {
    let builder = AndBuilder::<MockPredicate>::default();
    let req = builder.build();
    match req {
        Requirement::And(reqs) => {
            ensure(reqs.is_empty(), "Expected default And builder to contain no requirements")?;
            Ok(())
        }
        _ => Err("Expected empty And".into()),
    }
}

#[test]
fn test_and_builder_with() -> TestResult {
    let builder = AndBuilder::new().with(Requirement::predicate(MockPredicate::AlwaysTrue));
    let req = builder.build();
    match req {
        Requirement::And(reqs) => {
            ensure(reqs.len() == 1, "Expected And builder to contain one requirement")?;
            Ok(())
        }
        _ => Err("Expected And with one element".into()),
    }
}

#[test]
fn test_and_builder_with_predicate() -> TestResult {
    let builder = AndBuilder::new()
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysFalse);
    let req = builder.build();
    match req {
        Requirement::And(reqs) => {
            ensure(reqs.len() == 2, "Expected And builder to contain two requirements")?;
            Ok(())
        }
        _ => Err("Expected And with two elements".into()),
    }
}

#[test]
fn test_and_builder_with_all() -> TestResult {
    let reqs = vec![
        Requirement::predicate(MockPredicate::AlwaysTrue),
        Requirement::predicate(MockPredicate::AlwaysFalse),
        Requirement::predicate(MockPredicate::ValueGte(10)),
    ];
    let builder = AndBuilder::new().with_all(reqs);
    let req = builder.build();
    match req {
        Requirement::And(reqs) => {
            ensure(reqs.len() == 3, "Expected And builder to contain three requirements")?;
            Ok(())
        }
        _ => Err("Expected And with three elements".into()),
    }
}

#[test]
fn test_and_builder_chaining() -> TestResult {
    let req = AndBuilder::new()
        .with_predicate(MockPredicate::ValueGte(10))
        .with(Requirement::or(vec![
            Requirement::predicate(MockPredicate::AlwaysTrue),
            Requirement::predicate(MockPredicate::AlwaysFalse),
        ]))
        .with_predicate(MockPredicate::HasAllFlags(0b11))
        .build();

    ensure(req.complexity() == 6, "Expected chained And builder complexity to match")?;
    Ok(())
}

#[test]
fn test_and_builder_from_static_method() -> TestResult {
    let builder = RequirementBuilder::<MockPredicate>::and();
    let req = builder.with_predicate(MockPredicate::AlwaysTrue).build();
    match req {
        Requirement::And(reqs) => {
            ensure(reqs.len() == 1, "Expected And builder to contain one requirement")?;
            Ok(())
        }
        _ => Err("Expected And".into()),
    }
}

// ============================================================================
// SECTION: OrBuilder Tests
// ============================================================================

#[test]
fn test_or_builder_new() -> TestResult {
    let builder = OrBuilder::<MockPredicate>::new();
    let req = builder.build();
    match req {
        Requirement::Or(reqs) => {
            ensure(reqs.is_empty(), "Expected empty Or builder to contain no requirements")?;
            Ok(())
        }
        _ => Err("Expected empty Or".into()),
    }
}

#[test]
fn test_or_builder_default() -> TestResult {
    let builder = OrBuilder::<MockPredicate>::default();
    let req = builder.build();
    match req {
        Requirement::Or(reqs) => {
            ensure(reqs.is_empty(), "Expected default Or builder to contain no requirements")?;
            Ok(())
        }
        _ => Err("Expected empty Or".into()),
    }
}

#[test]
fn test_or_builder_with() -> TestResult {
    let builder = OrBuilder::new().with(Requirement::predicate(MockPredicate::AlwaysTrue));
    let req = builder.build();
    match req {
        Requirement::Or(reqs) => {
            ensure(reqs.len() == 1, "Expected Or builder to contain one requirement")?;
            Ok(())
        }
        _ => Err("Expected Or with one element".into()),
    }
}

#[test]
fn test_or_builder_with_predicate() -> TestResult {
    let builder = OrBuilder::new()
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysFalse)
        .with_predicate(MockPredicate::ValueGte(10));
    let req = builder.build();
    match req {
        Requirement::Or(reqs) => {
            ensure(reqs.len() == 3, "Expected Or builder to contain three requirements")?;
            Ok(())
        }
        _ => Err("Expected Or with three elements".into()),
    }
}

#[test]
fn test_or_builder_with_all() -> TestResult {
    let reqs = vec![
        Requirement::predicate(MockPredicate::AlwaysTrue),
        Requirement::predicate(MockPredicate::AlwaysFalse),
    ];
    let builder = OrBuilder::new().with_all(reqs);
    let req = builder.build();
    match req {
        Requirement::Or(reqs) => {
            ensure(reqs.len() == 2, "Expected Or builder to contain two requirements")?;
            Ok(())
        }
        _ => Err("Expected Or with two elements".into()),
    }
}

#[test]
fn test_or_builder_from_static_method() -> TestResult {
    let builder = RequirementBuilder::<MockPredicate>::or();
    let req = builder
        .with_predicate(MockPredicate::AlwaysFalse)
        .with_predicate(MockPredicate::AlwaysTrue)
        .build();
    match req {
        Requirement::Or(reqs) => {
            ensure(reqs.len() == 2, "Expected Or builder result to contain two requirements")
        }
        _ => Err("Expected Or variant".into()),
    }
}

// ============================================================================
// SECTION: GroupBuilder Tests
// ============================================================================

#[test]
fn test_group_builder_new() -> TestResult {
    let builder = GroupBuilder::<MockPredicate>::new(2);
    let req = builder.build();
    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 2, "Expected RequireGroup min to match constructor")?;
            ensure(reqs.is_empty(), "Expected RequireGroup to start empty")?;
            Ok(())
        }
        _ => Err("Expected RequireGroup".into()),
    }
}

#[test]
fn test_group_builder_with() -> TestResult {
    let builder = GroupBuilder::new(1)
        .with(Requirement::predicate(MockPredicate::AlwaysTrue))
        .with(Requirement::predicate(MockPredicate::AlwaysFalse));
    let req = builder.build();
    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 1, "Expected RequireGroup min to match builder")?;
            ensure(reqs.len() == 2, "Expected RequireGroup to contain two requirements")?;
            Ok(())
        }
        _ => Err("Expected RequireGroup".into()),
    }
}

#[test]
fn test_group_builder_with_predicate() -> TestResult {
    let builder = GroupBuilder::new(2)
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysFalse);
    let req = builder.build();
    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 2, "Expected RequireGroup min to match builder")?;
            ensure(reqs.len() == 3, "Expected RequireGroup to contain three requirements")?;
            Ok(())
        }
        _ => Err("Expected RequireGroup".into()),
    }
}

#[test]
fn test_group_builder_with_all() -> TestResult {
    let reqs = vec![
        Requirement::predicate(MockPredicate::AlwaysTrue),
        Requirement::predicate(MockPredicate::AlwaysFalse),
        Requirement::predicate(MockPredicate::ValueGte(10)),
    ];
    let builder = GroupBuilder::new(1).with_all(reqs);
    let req = builder.build();
    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 1, "Expected RequireGroup min to be 1")?;
            ensure(reqs.len() == 3, "Expected RequireGroup to contain three requirements")?;
            Ok(())
        }
        _ => Err("Expected RequireGroup".into()),
    }
}

#[test]
fn test_group_builder_min_update() -> TestResult {
    let builder = GroupBuilder::new(1)
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysTrue)
        .min(2);
    let req = builder.build();
    match req {
        Requirement::RequireGroup {
            min, ..
        } => {
            ensure(min == 2, "Expected RequireGroup min to update to 2")?;
            Ok(())
        }
        _ => Err("Expected RequireGroup".into()),
    }
}

#[test]
fn test_group_builder_from_static_method() -> TestResult {
    let builder = RequirementBuilder::<MockPredicate>::require_group(2);
    let req = builder
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysTrue)
        .with_predicate(MockPredicate::AlwaysFalse)
        .build();
    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 2, "Expected RequireGroup min to match builder")?;
            ensure(reqs.len() == 3, "Expected RequireGroup to contain three requirements")
        }
        _ => Err("Expected RequireGroup".into()),
    }
}

// ============================================================================
// SECTION: Convenience Function Tests
// ============================================================================

#[test]
fn test_convenience_all() -> TestResult {
    let req = convenience::all(vec![
        Requirement::predicate(MockPredicate::AlwaysTrue),
        Requirement::predicate(MockPredicate::AlwaysTrue),
    ]);
    match req {
        Requirement::And(reqs) => ensure(reqs.len() == 2, "Expected convenience::all to AND both"),
        _ => Err("Expected And variant".into()),
    }
}

#[test]
fn test_convenience_any() -> TestResult {
    let req = convenience::any(vec![
        Requirement::predicate(MockPredicate::AlwaysFalse),
        Requirement::predicate(MockPredicate::AlwaysTrue),
    ]);
    match req {
        Requirement::Or(reqs) => ensure(reqs.len() == 2, "Expected convenience::any to OR both"),
        _ => Err("Expected Or variant".into()),
    }
}

#[test]
fn test_convenience_not() -> TestResult {
    let req = convenience::not(Requirement::predicate(MockPredicate::AlwaysFalse));
    match req {
        Requirement::Not(inner) => ensure(
            matches!(*inner, Requirement::Predicate(MockPredicate::AlwaysFalse)),
            "Expected convenience::not to wrap the predicate",
        ),
        _ => Err("Expected Not variant".into()),
    }
}

#[test]
fn test_convenience_at_least() -> TestResult {
    let req = convenience::at_least(
        2,
        vec![
            Requirement::predicate(MockPredicate::AlwaysTrue),
            Requirement::predicate(MockPredicate::AlwaysTrue),
            Requirement::predicate(MockPredicate::AlwaysFalse),
        ],
    );
    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 2, "Expected convenience::at_least to set min")?;
            ensure(reqs.len() == 3, "Expected convenience::at_least to keep all requirements")
        }
        _ => Err("Expected RequireGroup variant".into()),
    }
}

#[test]
fn test_convenience_predicate() -> TestResult {
    let req = convenience::predicate(MockPredicate::ValueEq(42));
    match req {
        Requirement::Predicate(MockPredicate::ValueEq(42)) => Ok(()),
        _ => Err("Expected convenience::predicate to wrap the leaf unchanged".into()),
    }
}

// ============================================================================
// SECTION: Complex Builder Pattern Tests
// ============================================================================

#[test]
fn test_complex_nested_builders() -> TestResult {
    // (A AND B) OR (C AND D)
    let req = OrBuilder::new()
        .with(
            AndBuilder::new()
                .with_predicate(MockPredicate::ValueGte(10))
                .with_predicate(MockPredicate::ValueLte(20))
                .build(),
        )
        .with(
            AndBuilder::new()
                .with_predicate(MockPredicate::ValueGte(80))
                .with_predicate(MockPredicate::ValueLte(90))
                .build(),
        )
        .build();

    match req {
        Requirement::Or(branches) => {
            ensure(branches.len() == 2, "Expected two OR branches")?;
            for branch in &branches {
                match branch.as_ref() {
                    Requirement::And(leaves) => {
                        ensure(leaves.len() == 2, "Expected each AND branch to hold two leaves")?;
                    }
                    _ => return Err("Expected each OR branch to be an And".into()),
                }
            }
            Ok(())
        }
        _ => Err("Expected Or variant".into()),
    }
}

#[test]
fn test_builder_with_groups() -> TestResult {
    // Need at least 2 of: (A OR B), C, D
    let req = GroupBuilder::new(2)
        .with(
            OrBuilder::new()
                .with_predicate(MockPredicate::AlwaysFalse)
                .with_predicate(MockPredicate::AlwaysTrue)
                .build(),
        )
        .with_predicate(MockPredicate::AlwaysFalse)
        .with_predicate(MockPredicate::AlwaysTrue)
        .build();

    match req {
        Requirement::RequireGroup {
            min,
            reqs,
        } => {
            ensure(min == 2, "Expected group min of 2")?;
            ensure(reqs.len() == 3, "Expected three group options")
        }
        _ => Err("Expected RequireGroup variant".into()),
    }
}
