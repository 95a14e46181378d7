//! Console output helpers

use autoup_engine::Supervisor;
use console::style;
use std::path::Path;
use std::time::Duration;

/// Report which projects came up
pub fn print_startup(supervisor: &Supervisor, quiet: bool) {
    if quiet {
        return;
    }

    for name in supervisor.project_names() {
        let local = supervisor
            .project(name)
            .map(|project| project.settings().local_base_dir.display().to_string())
            .unwrap_or_default();
        println!(
            "{} {} {}",
            style("✓").green().bold(),
            style(name).bold(),
            style(local).cyan()
        );
    }
    for (name, error) in supervisor.failures() {
        println!(
            "{} {} {}",
            style("✗").red().bold(),
            style(name).bold(),
            style(error).red()
        );
    }
}

/// Print a status dump, one styled line per entry
pub fn print_status(project: &str, path: &Path, dump: &str) {
    println!(
        "{} {} {}",
        style("⟲").blue().bold(),
        style(project).bold(),
        style(path.display()).cyan()
    );
    for line in dump.lines() {
        let (entry, code) = line.rsplit_once(':').unwrap_or((line, ""));
        println!("{}:{}", entry, style_code(code));
    }
}

fn style_code(code: &str) -> console::StyledObject<&str> {
    match code {
        "0" => style(code).green(),
        "1" | "2" => style(code).yellow(),
        _ => style(code).red(),
    }
}

/// Human readable duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
