//! Queue presentation: counts and dead letters.

use super::shared::ellipsize;
use crate::cli::output::to_json;
use crate::error::ApiError;
use crate::queue::{Job, QueueCounts, QueueName};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::json;

pub fn format_queue_stats_text(rows: &[(QueueName, QueueCounts)]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Queue", "Waiting", "Delayed", "Active", "Completed", "Dead"]);
    for (queue, counts) in rows {
        table.add_row(vec![
            queue.to_string(),
            counts.waiting.to_string(),
            counts.delayed.to_string(),
            counts.active.to_string(),
            counts.completed.to_string(),
            counts.dead_lettered.to_string(),
        ]);
    }
    table.to_string()
}

pub fn format_queue_stats_json(rows: &[(QueueName, QueueCounts)]) -> Result<String, ApiError> {
    let queues: Vec<_> = rows
        .iter()
        .map(|(queue, counts)| json!({ "queue": queue, "counts": counts }))
        .collect();
    to_json(&json!({ "queues": queues }))
}

pub fn format_dead_letters_text(queue: QueueName, jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return format!("No dead-lettered jobs in {}.", queue);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Job", "Attempts", "Failed At", "Error", "Payload"]);
    for job in jobs {
        table.add_row(vec![
            job.id.to_string(),
            job.attempts.to_string(),
            job.finished_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            ellipsize(job.last_error.as_deref().unwrap_or("-"), 60),
            ellipsize(&job.payload.to_string(), 60),
        ]);
    }
    format!("{}\n\nTotal: {} job(s)", table, jobs.len())
}
