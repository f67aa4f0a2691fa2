//! Integration tests for module execution
//!
//! These exercise a Context end to end against small inline modules:
//! - Rewinding to delay expiry between coarse ticks
//! - Submodule call and return
//! - Self-loop collapsing
//! - Seeded distributed transitions
//! - Time-dependent transitions after a Delay

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use pathway_sim::core::calendar::{timestamp, MS_PER_DAY};
use pathway_sim::core::types::{EntityId, Timestamp};
use pathway_sim::entity::record::EntryKind;
use pathway_sim::entity::Person;
use pathway_sim::module::{Context, ModuleRegistry};
use serde_json::{json, Value};

fn registry(modules: &[(&str, Value)]) -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    for (key, doc) in modules {
        registry.load_str(key, &doc.to_string()).unwrap();
    }
    Arc::new(registry)
}

fn person(seed: u64) -> Person {
    Person::born(EntityId::from_seed(seed, 0), seed, timestamp(1980, 1, 1).unwrap())
}

fn history_names(context: &Context) -> Vec<&str> {
    context.history().iter().map(|s| s.name.as_str()).collect()
}

fn entry_start(person: &Person, kind: EntryKind) -> Option<Timestamp> {
    person
        .record
        .entries()
        .iter()
        .find(|e| e.kind == kind)
        .map(|e| e.start)
}

#[test]
fn test_rewind_dates_states_at_true_expiry() {
    let reg = registry(&[(
        "rewind",
        json!({"name": "Rewind", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Two_Days"},
            "Two_Days": {"type": "Delay", "exact": {"quantity": 2, "unit": "days"}, "direct_transition": "Visit"},
            "Visit": {
                "type": "Encounter",
                "codes": [{"system": "SNOMED-CT", "code": "185345009", "display": "Encounter for symptom"}],
                "direct_transition": "Three_Days"
            },
            "Three_Days": {"type": "Delay", "exact": {"quantity": 3, "unit": "days"}, "direct_transition": "Death"},
            "Death": {"type": "Death", "direct_transition": "Terminal"},
            "Terminal": {"type": "Terminal"}
        }}),
    )]);
    let mut p = person(1);
    let mut ctx = Context::new(reg, "rewind").unwrap();
    let t0 = timestamp(2000, 1, 1).unwrap();

    ctx.run(t0, &mut p).unwrap();
    assert_eq!(ctx.current_state().name, "Two_Days");

    ctx.run(t0 + 7 * MS_PER_DAY, &mut p).unwrap();
    assert!(!ctx.is_active());
    assert_eq!(entry_start(&p, EntryKind::Encounter), Some(t0 + 2 * MS_PER_DAY));
    assert_eq!(p.record.death_time(), Some(t0 + 5 * MS_PER_DAY));

    let visit = ctx.most_recent_by_name("Visit").unwrap();
    assert_eq!(visit.entered, Some(t0 + 2 * MS_PER_DAY));
    let death = ctx.most_recent_by_name("Death").unwrap();
    assert_eq!(death.exited, Some(t0 + 5 * MS_PER_DAY));
}

#[test]
fn test_submodule_drains_before_parent_continues() {
    let reg = registry(&[
        (
            "parent",
            json!({"name": "Parent", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Before"},
                "Before": {"type": "Simple", "direct_transition": "Call"},
                "Call": {"type": "CallSubmodule", "submodule": "medications/statin", "direct_transition": "After"},
                "After": {"type": "Simple", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        ),
        (
            "medications/statin",
            json!({"name": "Statin", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Prescribe"},
                "Prescribe": {
                    "type": "MedicationOrder",
                    "target_encounter": "Refill",
                    "codes": [{"system": "RxNorm", "code": "617312", "display": "Atorvastatin"}],
                    "direct_transition": "Refill"
                },
                "Refill": {
                    "type": "Encounter",
                    "codes": [{"system": "SNOMED-CT", "code": "390906007", "display": "Follow-up encounter"}],
                    "direct_transition": "Terminal"
                },
                "Terminal": {"type": "Terminal"}
            }}),
        ),
    ]);
    let mut p = person(2);
    let mut ctx = Context::new(reg, "parent").unwrap();
    ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p).unwrap();

    assert_eq!(
        history_names(&ctx),
        vec!["Initial", "Before", "Call", "Initial", "Prescribe", "Refill", "Terminal", "After"]
    );
    let modules: Vec<&str> = ctx.history().iter().map(|s| s.module.as_str()).collect();
    assert_eq!(modules[3], "medications/statin");
    assert_eq!(modules[7], "parent");
    assert_eq!(ctx.call_depth(), 0);
    assert!(!ctx.is_active());
    assert!(p.record.medication_active("atorvastatin"));
}

#[test]
fn test_submodule_waits_across_ticks() {
    let reg = registry(&[
        (
            "parent",
            json!({"name": "Parent", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Call"},
                "Call": {"type": "CallSubmodule", "submodule": "recovery", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        ),
        (
            "recovery",
            json!({"name": "Recovery", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Rest"},
                "Rest": {"type": "Delay", "exact": {"quantity": 10, "unit": "days"}, "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}),
        ),
    ]);
    let mut p = person(3);
    let mut ctx = Context::new(reg, "parent").unwrap();
    let t0 = timestamp(2000, 1, 1).unwrap();

    ctx.run(t0, &mut p).unwrap();
    assert_eq!(ctx.call_depth(), 1);
    assert_eq!(ctx.current_module_key(), "recovery");
    assert!(ctx.is_active());

    ctx.run(t0 + 14 * MS_PER_DAY, &mut p).unwrap();
    assert_eq!(ctx.call_depth(), 0);
    assert!(!ctx.is_active());

    // The call returns when the submodule's delay expired, not at the tick
    let sub_terminal = &ctx.history()[ctx.history().len() - 1];
    assert_eq!(sub_terminal.name, "Terminal");
    assert_eq!(sub_terminal.exited, Some(t0 + 10 * MS_PER_DAY));
}

#[test]
fn test_self_loop_collapses_to_one_history_entry() {
    let reg = registry(&[(
        "loop",
        json!({"name": "Loop", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Check"},
            "Check": {
                "type": "Guard",
                "allow": {"condition_type": "True"},
                "distributed_transition": [
                    {"distribution": 0.5, "transition": "Check"},
                    {"distribution": 0.5, "transition": "Terminal"}
                ]
            },
            "Terminal": {"type": "Terminal"}
        }}),
    )]);
    // Seed 1 draws Check, Check, then Terminal
    let mut p = person(1);
    let mut ctx = Context::new(reg, "loop").unwrap();
    let t = timestamp(2000, 3, 1).unwrap();
    ctx.run(t, &mut p).unwrap();

    assert!(!ctx.is_active());
    assert_eq!(history_names(&ctx), vec!["Initial", "Check"]);
    let check = ctx.most_recent_by_name("Check").unwrap();
    assert_eq!(check.entered, Some(t));
    assert_eq!(check.exited, Some(t));

    // Exactly three draws were taken from the person's generator
    let mut expected = ChaCha8Rng::seed_from_u64(1);
    for _ in 0..3 {
        let _: f64 = expected.gen();
    }
    assert_eq!(p.rng().gen::<f64>(), expected.gen::<f64>());
}

#[test]
fn test_transition_rechecked_after_delay_expires() {
    let reg = registry(&[(
        "new_year",
        json!({"name": "New Year", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Wait"},
            "Wait": {
                "type": "Delay",
                "exact": {"quantity": 1, "unit": "days"},
                "conditional_transition": [
                    {"condition": {"condition_type": "Date", "operator": ">=", "year": 2001}, "transition": "Terminal"}
                ]
            },
            "Terminal": {"type": "Terminal"}
        }}),
    )]);
    let mut p = person(6);
    let mut ctx = Context::new(reg, "new_year").unwrap();

    ctx.run(timestamp(2000, 6, 1).unwrap(), &mut p).unwrap();
    ctx.run(timestamp(2000, 9, 1).unwrap(), &mut p).unwrap();
    assert_eq!(ctx.current_state().name, "Wait");
    assert_eq!(ctx.current_state().exited, None);

    let opened = timestamp(2001, 1, 1).unwrap();
    ctx.run(opened, &mut p).unwrap();
    assert!(!ctx.is_active());
    let wait = ctx.most_recent_by_name("Wait").unwrap();
    assert_eq!(wait.entered, Some(timestamp(2000, 6, 1).unwrap()));
    assert_eq!(wait.exited, Some(opened));
}

#[test]
fn test_branch_after_rewind_sees_rewound_date() {
    let reg = registry(&[(
        "year_end",
        json!({"name": "Year End", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Wait"},
            "Wait": {"type": "Delay", "exact": {"quantity": 3, "unit": "days"}, "direct_transition": "Branch"},
            "Branch": {"type": "Simple", "conditional_transition": [
                {"condition": {"condition_type": "Date", "operator": ">=", "year": 2010}, "transition": "New_Year"},
                {"transition": "Old_Year"}
            ]},
            "New_Year": {"type": "Simple", "direct_transition": "Terminal"},
            "Old_Year": {"type": "Simple", "direct_transition": "Terminal"},
            "Terminal": {"type": "Terminal"}
        }}),
    )]);
    let mut p = person(7);
    let mut ctx = Context::new(reg, "year_end").unwrap();
    let t0 = timestamp(2009, 12, 25).unwrap();

    ctx.run(t0, &mut p).unwrap();
    // The tick lands in 2010, but Branch runs at the Delay's expiry in 2009
    ctx.run(t0 + 14 * MS_PER_DAY, &mut p).unwrap();

    assert_eq!(history_names(&ctx), vec!["Initial", "Wait", "Branch", "Old_Year"]);
    let branch = ctx.most_recent_by_name("Branch").unwrap();
    assert_eq!(branch.entered, Some(t0 + 3 * MS_PER_DAY));
    assert_eq!(branch.exited, Some(t0 + 3 * MS_PER_DAY));
}

#[test]
fn test_distributed_choices_reproducible_per_person() {
    let reg = registry(&[(
        "split",
        json!({"name": "Split", "states": {
            "Initial": {"type": "Initial", "distributed_transition": [
                {"distribution": 0.15, "transition": "A"},
                {"distribution": 0.55, "transition": "B"},
                {"distribution": 0.30, "transition": "C"}
            ]},
            "A": {"type": "Simple", "direct_transition": "Terminal"},
            "B": {"type": "Simple", "direct_transition": "Terminal"},
            "C": {"type": "Simple", "direct_transition": "Terminal"},
            "Terminal": {"type": "Terminal"}
        }}),
    )]);

    let tally = |reg: &Arc<ModuleRegistry>| {
        let mut counts = [0usize; 3];
        for seed in 0..100 {
            let mut p = person(seed);
            let mut ctx = Context::new(Arc::clone(reg), "split").unwrap();
            ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p).unwrap();
            match ctx.history()[1].name.as_str() {
                "A" => counts[0] += 1,
                "B" => counts[1] += 1,
                "C" => counts[2] += 1,
                other => panic!("unexpected state {}", other),
            }
        }
        counts
    };

    let first = tally(&reg);
    assert_eq!(first, tally(&reg));
    assert_eq!(first, [12, 57, 31]);
}

#[test]
fn test_prior_state_condition_sees_history() {
    let reg = registry(&[(
        "prior",
        json!({"name": "Prior", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Smoked"},
            "Smoked": {"type": "SetAttribute", "attribute": "smoker", "value": true, "direct_transition": "Branch"},
            "Branch": {"type": "Simple", "conditional_transition": [
                {"condition": {"condition_type": "PriorState", "name": "Smoked"}, "transition": "Visit"},
                {"transition": "Terminal"}
            ]},
            "Visit": {
                "type": "Encounter",
                "codes": [{"system": "SNOMED-CT", "code": "185349003", "display": "Encounter for check up"}],
                "direct_transition": "Counseling"
            },
            "Counseling": {
                "type": "Procedure",
                "target_encounter": "Visit",
                "codes": [{"system": "SNOMED-CT", "code": "710081004", "display": "Smoking cessation therapy"}],
                "direct_transition": "Terminal"
            },
            "Terminal": {"type": "Terminal"}
        }}),
    )]);
    let mut p = person(5);
    let mut ctx = Context::new(reg, "prior").unwrap();
    ctx.run(timestamp(2000, 1, 1).unwrap(), &mut p).unwrap();

    assert_eq!(history_names(&ctx), vec!["Initial", "Smoked", "Branch", "Visit", "Counseling"]);
    assert_eq!(p.record.count(EntryKind::Procedure), 1);
}

#[test]
fn test_validate_reports_single_unreachable_state() {
    let reg = registry(&[(
        "orphaned",
        json!({"name": "Orphaned", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Terminal"},
            "Forgotten": {"type": "Simple", "direct_transition": "Terminal"},
            "Terminal": {"type": "Terminal"}
        }}),
    )]);
    let ctx = Context::new(reg, "orphaned").unwrap();
    let messages = ctx.validate();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Forgotten"));
}
