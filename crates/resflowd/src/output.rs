use colored::Colorize;
use resflow_container::{ReconcileReport, ReconciledEntity};
use resflow_core::{JobRecord, JobStatus};

fn entity_line(marker: colored::ColoredString, entity: &ReconciledEntity) {
    let id = match entity.resource_id {
        Some(id) => format!("#{id}"),
        None => "-".to_string(),
    };
    println!(
        "    {} {:<24} {:<32} {}",
        marker,
        entity.ext_id,
        entity.name,
        id.dimmed()
    );
}

/// Print one block per resource type; clean types get a single line
pub fn print_reports(container: &str, reports: &[ReconcileReport]) {
    println!("{} {}", "Container".bold(), container.cyan());
    for report in reports {
        if report.is_clean() {
            println!("  {} {}", "✓".green(), report.resource_type.to_string().dimmed());
            continue;
        }

        let mode = if report.applied { "" } else { " (dry run)" };
        println!(
            "  {} {}{}",
            "●".yellow(),
            report.resource_type.to_string().bold(),
            mode.dimmed()
        );
        for entity in &report.new {
            entity_line("+".green(), entity);
        }
        for entity in &report.changed {
            entity_line("~".cyan(), entity);
        }
        for entity in &report.revived {
            entity_line("↺".blue(), entity);
        }
        for entity in &report.died {
            entity_line("-".red(), entity);
        }
        for failure in &report.failures {
            println!(
                "    {} {:<24} {}",
                "✗".red(),
                failure.ext_id.as_deref().unwrap_or("(listing)"),
                failure.error.red()
            );
        }
    }
}

pub fn print_jobs(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("{}", "No jobs recorded".dimmed());
        return;
    }

    println!(
        "{}",
        format!(
            "{:<10} {:<10} {:<10} {:<10} {:<40} {:>8}",
            "JOB", "STATUS", "RESOURCE", "OPERATION", "NAME", "MS"
        )
        .bold()
    );
    println!("{}", "─".repeat(93).dimmed());

    for job in jobs {
        let id = job.id.to_string();
        let status = job.status.to_string();
        let status = match job.status {
            JobStatus::Success => status.green(),
            JobStatus::Failure => status.red(),
            JobStatus::Cancelled => status.yellow(),
            JobStatus::Pending | JobStatus::Running => status.cyan(),
        };
        let elapsed = job
            .elapsed_ms
            .map(|ms| ms.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<10} {:<10} {:<10} {:<40} {:>8}",
            &id[..8],
            status,
            job.resource_id,
            job.operation.to_string(),
            job.name,
            elapsed
        );
        if let Some(error) = &job.error {
            println!("           {}", error.dimmed());
        }
    }
}
