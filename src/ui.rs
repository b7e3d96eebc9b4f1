use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use converge::{ActionKind, ActionResult, Status};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Domain Rendering
// ============================================================================

/// Resource status in its conventional colour
pub fn status(status: Status) -> ColoredString {
    match status {
        Status::Implemented => status.as_str().green(),
        Status::Partial => status.as_str().yellow(),
        Status::Missing => status.as_str().red(),
        Status::Broken => status.as_str().red().bold(),
        Status::Deprecated => status.as_str().dimmed(),
    }
}

/// Plan symbol for an action kind
pub fn action_symbol(kind: ActionKind) -> ColoredString {
    match kind {
        ActionKind::Create => kind.symbol().green(),
        ActionKind::Update => kind.symbol().yellow(),
        ActionKind::Delete => kind.symbol().red(),
        ActionKind::NoOp => kind.symbol().dimmed(),
    }
}

/// Marker for a resolved apply action
pub fn result_symbol(result: &ActionResult) -> ColoredString {
    match result {
        ActionResult::Implemented { .. } | ActionResult::Removed => "✓".green(),
        ActionResult::Preview { .. } => "ℹ".blue(),
        ActionResult::Partial { .. } => "◐".yellow(),
        ActionResult::Skipped { .. } => "⊘".dimmed(),
        ActionResult::Failed { .. } => "✗".red(),
    }
}

/// Text bar for a 0-100 percentage, e.g. `[█████░░░░░] 50.0%`
pub fn convergence_bar(percent: f64, width: usize) -> String {
    let clamped = percent.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * width as f64).round() as usize;
    format!(
        "[{}{}] {clamped:.1}%",
        "█".repeat(filled),
        "░".repeat(width - filled)
    )
}

/// Truncate a path string for display, keeping the end
pub fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        path.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        format!("...{}", &path[path.len() - max_len + 3..])
    }
}

/// Relative age of `ts` as of `now`, e.g. "3 hours ago"
pub fn time_ago(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);
    let (count, unit) = if duration.num_days() > 0 {
        (duration.num_days(), "day")
    } else if duration.num_hours() > 0 {
        (duration.num_hours(), "hour")
    } else if duration.num_minutes() > 0 {
        (duration.num_minutes(), "minute")
    } else {
        return "just now".to_string();
    };
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_bar() {
        assert_eq!(convergence_bar(0.0, 4), "[░░░░] 0.0%");
        assert_eq!(convergence_bar(50.0, 4), "[██░░] 50.0%");
        assert_eq!(convergence_bar(100.0, 4), "[████] 100.0%");
    }

    #[test]
    fn test_convergence_bar_clamps() {
        assert_eq!(convergence_bar(140.0, 2), "[██] 100.0%");
        assert_eq!(convergence_bar(-3.0, 2), "[░░] 0.0%");
    }

    #[test]
    fn test_truncate_path_short() {
        assert_eq!(truncate_path("short.txt", 20), "short.txt");
        assert_eq!(truncate_path("exact", 5), "exact");
    }

    #[test]
    fn test_truncate_path_long() {
        assert_eq!(
            truncate_path("/very/long/path/to/file.txt", 15),
            ".../to/file.txt"
        );
    }

    #[test]
    fn test_time_ago() {
        let now = Utc::now();
        assert_eq!(time_ago(now, now), "just now");
        assert_eq!(time_ago(now - chrono::Duration::minutes(1), now), "1 minute ago");
        assert_eq!(time_ago(now - chrono::Duration::hours(5), now), "5 hours ago");
        assert_eq!(time_ago(now - chrono::Duration::days(2), now), "2 days ago");
    }
}
