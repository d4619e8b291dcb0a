//! CLI presentation: text and json formatters per command family.

mod plan;
mod provider;
mod queue;
mod shared;

pub use plan::{
    format_plan_json, format_plan_list_json, format_plan_list_text, format_plan_text,
    format_task_text, format_xp_text,
};
pub use provider::{format_provider_check_result, format_resolved_config};
pub use queue::{format_dead_letters_text, format_queue_stats_json, format_queue_stats_text};
pub use shared::{format_section_heading, format_status};
