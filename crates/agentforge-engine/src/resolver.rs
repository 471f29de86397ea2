//! C10 — Dependency resolver over a plan's subtask graph.
//!
//! Grounded in
//! `original_source/agent-runtime/app/domain/services/dependency_resolver.py`:
//! ready-set computation, DFS cycle detection with visited/rec-stack sets,
//! level-based execution order, and dependents lookup for failure propagation.

use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::plan::{Plan, Subtask, SubtaskStatus};
use crate::types::SubtaskId;

/// `getReadySubtasks` (§4.C10): pending subtasks whose every dependency is `done`.
pub fn get_ready_subtasks(plan: &Plan) -> Vec<&Subtask> {
    plan.subtasks
        .iter()
        .filter(|s| s.status == SubtaskStatus::Pending)
        .filter(|s| {
            s.dependencies
                .iter()
                .all(|dep| plan.get_subtask(dep).is_some_and(|d| d.status == SubtaskStatus::Done))
        })
        .collect()
}

/// `hasCycles` (§4.C10): DFS with visited + on-current-path (rec-stack) sets.
pub fn has_cycles(plan: &Plan) -> bool {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();

    for subtask in &plan.subtasks {
        if !visited.contains(&subtask.id) && visit(plan, &subtask.id, &mut visited, &mut rec_stack) {
            return true;
        }
    }
    false
}

fn visit(plan: &Plan, id: &SubtaskId, visited: &mut HashSet<SubtaskId>, rec_stack: &mut HashSet<SubtaskId>) -> bool {
    visited.insert(id.clone());
    rec_stack.insert(id.clone());

    if let Some(subtask) = plan.get_subtask(id) {
        for dep in &subtask.dependencies {
            if rec_stack.contains(dep) {
                return true;
            }
            if !visited.contains(dep) && visit(plan, dep, visited, rec_stack) {
                return true;
            }
        }
    }

    rec_stack.remove(id);
    false
}

/// `getExecutionOrder` (§4.C10): levels where level *k* contains exactly the
/// subtasks whose every dependency is satisfied by levels 0..*k*-1.
pub fn get_execution_order<'a>(plan: &'a Plan) -> Result<Vec<Vec<&'a Subtask>>, CoreError> {
    if has_cycles(plan) {
        return Err(CoreError::InvalidPlan(format!("plan {} has a cyclic dependency graph", plan.id)));
    }

    let mut satisfied: HashSet<SubtaskId> = HashSet::new();
    let mut remaining: Vec<&Subtask> = plan.subtasks.iter().collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let (ready, not_ready): (Vec<&Subtask>, Vec<&Subtask>) = remaining
            .into_iter()
            .partition(|s| s.dependencies.iter().all(|d| satisfied.contains(d)));

        if ready.is_empty() {
            return Err(CoreError::PlanDeadlock(plan.id.to_string()));
        }

        for s in &ready {
            satisfied.insert(s.id.clone());
        }
        levels.push(ready);
        remaining = not_ready;
    }

    Ok(levels)
}

/// `validateDependencies` (§4.C10): human-readable error strings for cycles,
/// missing dependency ids, and self-dependencies.
pub fn validate_dependencies(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let ids: HashSet<&SubtaskId> = plan.subtasks.iter().map(|s| &s.id).collect();

    for subtask in &plan.subtasks {
        for dep in &subtask.dependencies {
            if dep == &subtask.id {
                errors.push(format!("subtask {} depends on itself", subtask.id));
            } else if !ids.contains(dep) {
                errors.push(format!("subtask {} depends on unknown subtask {}", subtask.id, dep));
            }
        }
    }

    if has_cycles(plan) {
        errors.push(format!("plan {} has a cyclic dependency graph", plan.id));
    }

    errors
}

/// `getDependents` (§4.C10): subtasks whose dependency set contains `subtask_id`.
pub fn get_dependents<'a>(plan: &'a Plan, subtask_id: &SubtaskId) -> Vec<&'a Subtask> {
    plan.subtasks
        .iter()
        .filter(|s| s.dependencies.contains(subtask_id))
        .collect()
}

/// Transitive dependents of `subtask_id` (used for upstream-failure propagation, §4.C11).
pub fn get_transitive_dependents<'a>(plan: &'a Plan, subtask_id: &SubtaskId) -> Vec<&'a Subtask> {
    let mut out: HashMap<SubtaskId, &Subtask> = HashMap::new();
    let mut frontier = vec![subtask_id.clone()];

    while let Some(current) = frontier.pop() {
        for dependent in get_dependents(plan, &current) {
            if !out.contains_key(&dependent.id) {
                frontier.push(dependent.id.clone());
                out.insert(dependent.id.clone(), dependent);
            }
        }
    }

    out.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;
    use crate::plan::{create_plan, mark_subtask, SubtaskSpec};
    use crate::types::ConversationId;

    fn spec(id: &str, deps: &[&str]) -> SubtaskSpec {
        SubtaskSpec {
            id: SubtaskId::from(id),
            description: format!("do {id}"),
            target_agent: AgentType::Coder,
            dependencies: deps.iter().map(|d| SubtaskId::from(*d)).collect(),
            estimated_duration: None,
        }
    }

    #[test]
    fn ready_subtasks_respect_dependency_completion() {
        let mut plan = create_plan(
            ConversationId::from("c1"),
            "goal",
            vec![spec("s1", &[]), spec("s2", &["s1"])],
        )
        .unwrap();
        assert_eq!(get_ready_subtasks(&plan).len(), 1);
        let s1 = plan.subtasks[0].id.clone();
        mark_subtask(&mut plan, &s1, SubtaskStatus::Running, None, None).unwrap();
        mark_subtask(&mut plan, &s1, SubtaskStatus::Done, Some("ok".into()), None).unwrap();
        let ready = get_ready_subtasks(&plan);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id.as_str(), "s2");
    }

    #[test]
    fn execution_order_produces_levels() {
        let plan = create_plan(
            ConversationId::from("c1"),
            "goal",
            vec![spec("s1", &[]), spec("s2", &[]), spec("s3", &["s1", "s2"])],
        )
        .unwrap();
        let levels = get_execution_order(&plan).unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].len(), 2);
        assert_eq!(levels[1].len(), 1);
        assert_eq!(levels[1][0].id.as_str(), "s3");
    }

    #[test]
    fn dependents_and_transitive_dependents_for_failure_propagation() {
        let plan = create_plan(
            ConversationId::from("c1"),
            "goal",
            vec![spec("s1", &[]), spec("s2", &["s1"]), spec("s3", &["s2"])],
        )
        .unwrap();
        let s1 = SubtaskId::from("s1");
        let direct = get_dependents(&plan, &s1);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].id.as_str(), "s2");

        let transitive = get_transitive_dependents(&plan, &s1);
        let mut ids: Vec<&str> = transitive.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s2", "s3"]);
    }

    #[test]
    fn validate_dependencies_reports_missing_and_self_deps() {
        let plan = create_plan(ConversationId::from("c1"), "goal", vec![spec("s1", &[])]).unwrap();
        let mut plan = plan;
        plan.subtasks[0].dependencies.push(SubtaskId::from("s1"));
        let errors = validate_dependencies(&plan);
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
    }
}
