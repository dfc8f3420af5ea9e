use crate::core::command::encode;
use crate::core::job::{JobRecord, JobStatus};

pub fn format_list_header(count: usize, filter: Option<JobStatus>) -> String {
    let suffix = filter
        .map(|status| format!(" with status: {status}"))
        .unwrap_or_default();
    if count == 0 {
        format!("No jobs found{suffix}")
    } else {
        format!("Found {count} jobs{suffix}:")
    }
}

/// `position` is 1-based.
pub fn format_list_line(position: usize, record: &JobRecord) -> String {
    format!("{position}. [{}] {}", record.status, encode(record).invocation)
}

pub fn format_added_message(record: &JobRecord) -> String {
    format!("Added job: {}", record.program)
}

pub fn format_claim_message(record: &JobRecord) -> String {
    format_status_message("Started", record)
}

pub fn format_finish_message(record: &JobRecord, succeeded: bool) -> String {
    format_status_message(if succeeded { "Finished" } else { "Failed" }, record)
}

pub fn format_results_message(record: &JobRecord) -> String {
    let args = if record.positional_args.is_empty() {
        "no_args".to_string()
    } else {
        record.positional_args.join("_")
    };
    format!("Add results for {}_{args}", record.program)
}

fn format_status_message(verb: &str, record: &JobRecord) -> String {
    let encoded = encode(record);
    [verb, encoded.script.as_str(), encoded.args.as_str(), encoded.kwargs.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
