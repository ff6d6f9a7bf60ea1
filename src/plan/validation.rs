//! 计划校验
//!
//! 任何计划生成（初始或重规划）之后立即校验；不合法的计划永不执行。

use std::collections::HashSet;

use crate::core::PlanError;
use crate::plan::types::Plan;

/// 默认的最大任务数
pub const DEFAULT_MAX_TASKS: usize = 8;

/// 非空、任务数 ≤ max、task_id 与 node 非空、task_id 唯一
pub fn validate(plan: &Plan, max_tasks: usize) -> Result<(), PlanError> {
    if plan.tasks.is_empty() {
        return Err(PlanError::Empty);
    }
    validate_tasks(plan, max_tasks)
}

/// 与 validate 相同，但允许空计划（有意终止，如确定性重规划删掉了最后一个任务）
pub fn validate_terminal(plan: &Plan, max_tasks: usize) -> Result<(), PlanError> {
    validate_tasks(plan, max_tasks)
}

fn validate_tasks(plan: &Plan, max_tasks: usize) -> Result<(), PlanError> {
    if plan.tasks.len() > max_tasks {
        return Err(PlanError::TooManyTasks {
            count: plan.tasks.len(),
            max: max_tasks,
        });
    }

    let mut seen = HashSet::new();
    for (index, task) in plan.tasks.iter().enumerate() {
        if task.task_id.trim().is_empty() {
            return Err(PlanError::MissingTaskId(index));
        }
        if task.node.trim().is_empty() {
            return Err(PlanError::MissingNode(task.task_id.clone()));
        }
        if !seen.insert(task.task_id.as_str()) {
            return Err(PlanError::DuplicateTaskId(task.task_id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::{nodes, Task};

    fn plan_of(n: usize) -> Plan {
        Plan::new(
            "test",
            (0..n)
                .map(|i| Task::new(format!("t{}", i + 1), nodes::FOOD))
                .collect(),
        )
    }

    #[test]
    fn test_valid_plans_up_to_max() {
        for n in 1..=DEFAULT_MAX_TASKS {
            assert!(validate(&plan_of(n), DEFAULT_MAX_TASKS).is_ok(), "n = {}", n);
        }
    }

    #[test]
    fn test_too_many_tasks() {
        let err = validate(&plan_of(9), DEFAULT_MAX_TASKS).unwrap_err();
        assert_eq!(err, PlanError::TooManyTasks { count: 9, max: 8 });
    }

    #[test]
    fn test_duplicate_ids() {
        let mut plan = plan_of(3);
        plan.tasks[2].task_id = "t1".to_string();
        assert_eq!(
            validate(&plan, DEFAULT_MAX_TASKS),
            Err(PlanError::DuplicateTaskId("t1".to_string()))
        );
    }

    #[test]
    fn test_empty_fields() {
        let mut plan = plan_of(2);
        plan.tasks[1].task_id = " ".to_string();
        assert_eq!(validate(&plan, 8), Err(PlanError::MissingTaskId(1)));

        let mut plan = plan_of(2);
        plan.tasks[0].node = String::new();
        assert_eq!(validate(&plan, 8), Err(PlanError::MissingNode("t1".to_string())));
    }

    #[test]
    fn test_empty_plan() {
        let plan = plan_of(0);
        assert_eq!(validate(&plan, 8), Err(PlanError::Empty));
        assert!(validate_terminal(&plan, 8).is_ok());
    }
}
