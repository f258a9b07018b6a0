//! Console and JSON renderings of run results

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fmt::Write;

use crate::discovery::RepositoryDescriptor;
use crate::orchestrator::RunOutcome;
use crate::summary::{RunSummary, TaskStatus};

/// Human-readable summary of a completed run
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let dry_run = summary.dry_run > 0 && summary.dry_run == summary.total;

    let _ = writeln!(
        out,
        "\n{}",
        if dry_run {
            "🔍 Backup Dry Run Complete"
        } else {
            "🎉 Backup Run Complete"
        }
    );
    let _ = writeln!(out, "   📊 Total backups: {}", summary.total);
    let _ = writeln!(out, "   ✅ Successful: {}", summary.successful);
    let _ = writeln!(out, "   ❌ Failed: {}", summary.failed);
    if summary.dry_run > 0 {
        let _ = writeln!(out, "   🔍 Dry run: {}", summary.dry_run);
    }
    let _ = writeln!(out, "   ⏱️  Duration: {:.2}s", summary.duration_seconds);

    if !summary.per_target.is_empty() {
        let _ = writeln!(out, "\n🎯 Targets:");
        for (target, stats) in &summary.per_target {
            if stats.dry_run > 0 {
                let _ = writeln!(out, "   {}: {} planned", target, stats.dry_run);
            } else {
                let _ = writeln!(
                    out,
                    "   {}: {} ✓ {} ✗",
                    target, stats.success, stats.failed
                );
            }
        }
    }

    if summary.has_failures() {
        let _ = writeln!(out, "\n🔍 Failed Backups:");
        for outcome in summary.failures() {
            let _ = writeln!(
                out,
                "   ❌ {} → {}: {}",
                outcome.repository,
                outcome.target,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if dry_run {
        let _ = writeln!(out, "\n📝 Planned tasks:");
        for outcome in summary.results.iter().filter(|o| o.status == TaskStatus::DryRun) {
            let _ = writeln!(out, "   {} → {}", outcome.repository, outcome.target);
        }
    }

    out
}

/// Text for any run outcome, including the early exits
pub fn render_outcome(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::NoRepositories => {
            "⚠️  No repositories found to backup. Check the organization and repository filters.\n"
                .to_string()
        }
        RunOutcome::NoTargets => {
            "⚠️  No backup targets enabled. Enable at least one entry under backup_targets.\n"
                .to_string()
        }
        RunOutcome::Completed(summary) => render_summary(summary),
    }
}

pub fn print_summary(outcome: &RunOutcome) {
    print!("{}", render_outcome(outcome));
}

/// Machine-readable outcome: `status` plus the summary fields when completed
pub fn outcome_json(outcome: &RunOutcome) -> Result<Value> {
    let mut value = match outcome {
        RunOutcome::Completed(summary) => {
            serde_json::to_value(summary).context("Failed to serialize run summary")?
        }
        _ => json!({}),
    };

    if let Value::Object(map) = &mut value {
        map.insert("status".to_string(), json!(outcome.status()));
    }
    Ok(value)
}

pub fn print_json(outcome: &RunOutcome) -> Result<()> {
    let value = outcome_json(outcome)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("Failed to format JSON")?
    );
    Ok(())
}

/// Repository listing for `orgbackup list`
pub fn render_repositories(repos: &[RepositoryDescriptor], details: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Repositories ({}):", repos.len());

    for repo in repos {
        if details {
            let mut flags = vec![repo.visibility()];
            if repo.archived {
                flags.push("archived");
            }
            if repo.fork {
                flags.push("fork");
            }
            let _ = writeln!(out, "📁 {} [{}]", repo.full_name, flags.join(", "));
            if !repo.description.is_empty() {
                let _ = writeln!(out, "   📝 {}", repo.description);
            }
            let _ = writeln!(out, "   🔗 {}", repo.source_url());
            let _ = writeln!(out);
        } else {
            let _ = writeln!(out, "  📁 {}", repo.full_name);
        }
    }

    out
}
