//! Plan, task and XP presentation.

use super::shared::{ellipsize, format_section_heading, format_status};
use crate::cli::output::to_json;
use crate::error::ApiError;
use crate::service::PlanWithTasks;
use crate::store::{Task, UserXp};
use crate::types::UserId;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::json;

fn plan_value(entry: &PlanWithTasks) -> serde_json::Value {
    json!({ "plan": entry.plan, "tasks": entry.tasks })
}

pub fn format_plan_json(entry: &PlanWithTasks) -> Result<String, ApiError> {
    to_json(&plan_value(entry))
}

pub fn format_plan_list_json(entries: &[PlanWithTasks]) -> Result<String, ApiError> {
    let plans: Vec<_> = entries.iter().map(plan_value).collect();
    to_json(&json!({ "plans": plans, "total": entries.len() }))
}

pub fn format_plan_text(entry: &PlanWithTasks) -> String {
    let plan = &entry.plan;
    let mut out = format!("{}\n", format_section_heading(&plan.title));
    out.push_str(&format!("  Plan:    {}\n", plan.id));
    out.push_str(&format!("  User:    {}\n", plan.user_id));
    out.push_str(&format!("  Status:  {}\n", format_status(plan.status)));
    out.push_str(&format!("  XP:      {}\n", plan.xp_earned));
    out.push_str(&format!("  Created: {}\n", plan.created_at.to_rfc3339()));
    if let Some(completed_at) = plan.completed_at {
        out.push_str(&format!("  Done:    {}\n", completed_at.to_rfc3339()));
    }
    if !plan.description.is_empty() {
        out.push_str(&format!("\n{}\n", plan.description));
    }
    if let Some(error) = plan
        .content
        .as_ref()
        .and_then(|content| content.get("error"))
        .and_then(|error| error.as_str())
    {
        out.push_str(&format!("\nError: {}\n", error));
    }

    if entry.tasks.is_empty() {
        return out;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["#", "Task", "Title", "XP", "Status"]);
    for task in &entry.tasks {
        table.add_row(vec![
            task.order.to_string(),
            task.id.to_string(),
            ellipsize(&task.title, 48),
            task.xp_value.to_string(),
            format_status(task.status),
        ]);
    }
    out.push_str(&format!("\n{}\n", table));
    out
}

pub fn format_plan_list_text(user_id: &UserId, entries: &[PlanWithTasks]) -> String {
    if entries.is_empty() {
        return format!(
            "No plans for {}.\n\nUse 'praxis submit --user {} \"<goal>\"' to create one.",
            user_id, user_id
        );
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Plan", "Title", "Status", "Tasks", "XP", "Created"]);
    for entry in entries {
        table.add_row(vec![
            entry.plan.id.to_string(),
            ellipsize(&entry.plan.title, 40),
            format_status(entry.plan.status),
            entry.tasks.len().to_string(),
            entry.plan.xp_earned.to_string(),
            entry.plan.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    format!("{}\n\nTotal: {} plan(s)", table, entries.len())
}

pub fn format_task_text(task: &Task) -> String {
    let mut out = format!("{}\n", format_section_heading(&task.title));
    out.push_str(&format!("  Task:   {}\n", task.id));
    out.push_str(&format!("  Plan:   {}\n", task.plan_id));
    out.push_str(&format!("  Order:  {}\n", task.order));
    out.push_str(&format!("  XP:     {}\n", task.xp_value));
    out.push_str(&format!("  Status: {}\n", format_status(task.status)));
    if !task.description.is_empty() {
        out.push_str(&format!("\n{}\n", task.description));
    }
    if let Some(regenerated) = task
        .content
        .as_ref()
        .and_then(|content| content.get("regenerated"))
        .and_then(|text| text.as_str())
    {
        out.push_str(&format!("\nRegenerated:\n{}\n", regenerated));
    }
    out
}

pub fn format_xp_text(user_id: &UserId, xp: Option<&UserXp>) -> String {
    match xp {
        Some(xp) => format!(
            "{}: {} XP (recalculated {})",
            user_id,
            xp.total_xp,
            xp.recalculated_at.to_rfc3339()
        ),
        None => format!(
            "{}: no XP total yet. Run 'praxis xp recalc --user {}'.",
            user_id, user_id
        ),
    }
}
