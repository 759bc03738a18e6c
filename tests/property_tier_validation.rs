use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use swarmgate::domain::models::context::is_credit_amount;
use swarmgate::domain::models::{StepDependency, TierKind, Workflow, WorkflowStep};
use swarmgate::services::tier_validator::{
    validate_execution_context, validate_resource_allocation, validate_routine_input,
    validate_step_input, validate_swarm_input,
};
use swarmgate::services::{DependencyResolver, TierInputValidator};

/// Arbitrary JSON, nested a few levels deep
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
        ".{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map(
                prop_oneof![
                    Just("goal".to_string()),
                    Just("stepId".to_string()),
                    Just("routineId".to_string()),
                    Just("parameters".to_string()),
                    Just("strategy".to_string()),
                    "[a-zA-Z]{1,8}",
                ],
                inner,
                0..6
            )
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn workflow_step(id: &str) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        name: id.to_string(),
        tool_name: "noop".to_string(),
        parameters: Map::new(),
        strategy: "deterministic".to_string(),
    }
}

proptest! {
    /// Property: Shape predicates are total
    ///
    /// Any JSON value gets a yes/no answer; discrimination agrees with the
    /// individual predicates.
    #[test]
    fn prop_predicates_never_panic(value in arb_json()) {
        let swarm = validate_swarm_input(&value);
        let routine = validate_routine_input(&value);
        let step = validate_step_input(&value);
        let _ = validate_execution_context(&value);
        let _ = validate_resource_allocation(&value);

        let discriminated = TierInputValidator::default().discriminate(&value);
        match discriminated.map(|input| input.kind()) {
            Some(TierKind::Swarm) => prop_assert!(swarm),
            Some(TierKind::Routine) => prop_assert!(!swarm && routine),
            Some(TierKind::Step) => prop_assert!(!swarm && !routine && step),
            None => {}
        }
    }

    /// Property: An input of several shapes resolves by priority order
    #[test]
    fn prop_ambiguous_input_follows_priority(
        goal in "[a-z]{1,16}",
        step_id in "[a-z]{1,8}",
    ) {
        let input = json!({
            "goal": goal,
            "stepId": step_id,
            "stepType": "transform",
            "strategy": "deterministic",
            "parameters": {}
        });

        let default_kind = TierInputValidator::default()
            .discriminate(&input)
            .map(|i| i.kind());
        prop_assert_eq!(default_kind, Some(TierKind::Swarm));

        let step_first = TierInputValidator::new(vec![TierKind::Step, TierKind::Swarm])
            .discriminate(&input)
            .map(|i| i.kind());
        prop_assert_eq!(step_first, Some(TierKind::Step));

        let routine_only = TierInputValidator::new(vec![TierKind::Routine]).discriminate(&input);
        prop_assert!(routine_only.is_none());
    }

    /// Property: Credit amounts are non-negative decimal strings
    #[test]
    fn prop_credit_amounts(whole in any::<u64>(), frac in 0u32..1_000_000, junk in "[a-z-]{1,3}") {
        let whole_str = whole.to_string();
        let decimal = format!("{whole}.{frac}");
        let negative = format!("-{whole}");
        let suffixed = format!("{whole}{junk}");
        prop_assert!(is_credit_amount(&whole_str));
        prop_assert!(is_credit_amount(&decimal));
        prop_assert!(!is_credit_amount(&negative));
        prop_assert!(!is_credit_amount(&suffixed));
    }

    /// Property: Execution order respects every dependency edge
    ///
    /// Edges only point from later steps to earlier ones, so every
    /// generated graph is acyclic.
    #[test]
    fn prop_execution_order_respects_dependencies(
        edges in prop::collection::vec((1usize..12, 0usize..12), 0..30)
    ) {
        let ids: Vec<String> = (0..12).map(|i| format!("s{i}")).collect();
        let mut depends: HashMap<usize, Vec<String>> = HashMap::new();
        for (from, to) in edges {
            let to = to % from;
            depends.entry(from).or_default().push(ids[to].clone());
        }
        let workflow = Workflow {
            // Reverse declaration order so the sort has work to do.
            steps: ids.iter().rev().map(|id| workflow_step(id)).collect(),
            dependencies: depends
                .iter()
                .map(|(from, on)| StepDependency {
                    step_id: ids[*from].clone(),
                    depends_on: on.clone(),
                })
                .collect(),
        };

        let order = DependencyResolver::new()
            .execution_order(&workflow)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(order.len(), ids.len());

        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.as_str(), i))
            .collect();
        for dependency in &workflow.dependencies {
            for dep in &dependency.depends_on {
                prop_assert!(
                    position[dep.as_str()] < position[dependency.step_id.as_str()],
                    "{} must run before {}", dep, dependency.step_id
                );
            }
        }
    }
}
