use crate::loadtest::controller::{QuestionReport, RunError};
use crate::loadtest::metrics::MetricsSnapshot;
use crate::loadtest::{RunAbort, RunReport};
use crate::models::VoteTally;
use std::fmt::Write;

const RULE: &str = "═════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "─────────────────────────────────────────────────────────────────";

// A, B, ..., Z, then 27, 28, ...
fn option_label(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => char::from(b'A' + i).to_string(),
        _ => (index + 1).to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max.saturating_sub(3)).collect::<String>())
    } else {
        text.to_string()
    }
}

fn write_question(out: &mut String, question: &QuestionReport) {
    let _ = writeln!(
        out,
        "  Question {}: \"{}\"",
        question.question_index + 1,
        truncate(&question.text, 50)
    );
    let _ = writeln!(
        out,
        "    Successful: {} | Failed: {} | Batches: {} | {}ms",
        question.successes, question.failures, question.batches, question.elapsed_ms
    );
    let distribution: Vec<String> = question
        .distribution
        .iter()
        .enumerate()
        .map(|(i, count)| format!("{}:{}", option_label(i), count))
        .collect();
    let _ = writeln!(out, "    Votes: {}", distribution.join(" "));
}

fn write_metrics(out: &mut String, metrics: &MetricsSnapshot, unreconciled: &VoteTally) {
    let _ = writeln!(out, "  Duration:             {:.2}s", metrics.elapsed_secs);
    let _ = writeln!(out, "{}", THIN_RULE);
    let _ = writeln!(out, "  Total Reads:          {:>6}", metrics.reads);
    let _ = writeln!(out, "  Total Writes:         {:>6}", metrics.writes);
    let _ = writeln!(out, "  Successful Votes:     {:>6}", metrics.successes);
    let _ = writeln!(out, "  Errors:               {:>6}", metrics.errors);
    let _ = writeln!(out, "  Total Operations:     {:>6}", metrics.total_operations());
    let _ = writeln!(out, "  Votes/Second:         {:>6.1}", metrics.votes_per_second());
    let _ = writeln!(
        out,
        "  Count merges:         {:>6} ok, {} failed",
        metrics.reconciliations, metrics.failed_reconciliations
    );
    if !unreconciled.is_empty() {
        let keys: Vec<String> = unreconciled
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(key, count)| format!("{}:{}", key, count))
            .collect();
        let _ = writeln!(out, "  Not merged:           {}", keys.join(" "));
    }
    let _ = writeln!(out, "{}", RULE);

    if !metrics.sample_errors.is_empty() {
        let _ = writeln!(out, "\n  Sample Errors:");
        for err in &metrics.sample_errors {
            let _ = writeln!(out, "    - {}", err);
        }
    }
}

pub fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  LOAD TEST REPORT");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Poll ID:              {}", report.poll_id);
    let _ = writeln!(out, "  Title:                {}", truncate(&report.title, 40));
    let _ = writeln!(out, "  Participants:         {}", report.participants);
    let _ = writeln!(out, "  Questions:            {}", report.questions.len());
    let _ = writeln!(out, "{}", THIN_RULE);
    for question in &report.questions {
        write_question(&mut out, question);
    }
    let _ = writeln!(out, "{}", THIN_RULE);
    write_metrics(&mut out, &report.metrics, &report.unreconciled);
    out
}

pub fn render_abort(abort: &RunAbort) -> String {
    let reason = match &abort.reason {
        RunError::NotFound(_) => "Poll not found! Check the poll ID.".to_string(),
        RunError::Inactive(_) => "Voting is NOT open. Start voting from the presenter view first.".to_string(),
        other => other.to_string(),
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  LOAD TEST ABORTED");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Poll ID:              {}", abort.poll_id);
    let _ = writeln!(out, "  Reason:               {}", reason);
    let _ = writeln!(out, "{}", THIN_RULE);
    for question in &abort.questions {
        write_question(&mut out, question);
    }
    if !abort.questions.is_empty() {
        let _ = writeln!(out, "{}", THIN_RULE);
    }
    write_metrics(&mut out, &abort.metrics, &abort.unreconciled);
    out
}
