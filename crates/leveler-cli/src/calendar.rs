//! Text calendar of a leveled schedule
//!
//! ```text
//! ----------+-1234567890
//! T1 100 R1 |   ==
//! T2 200 R1 | ==>T1
//! ----------+-1234567890
//! ```

use chrono::Datelike;
use leveler_core::{Project, Schedule, Task};

/// One row per task sorted by id, one column per project day
pub fn render(project: &Project, tasks: &[Task], schedule: &Schedule) -> String {
    let mut rows: Vec<(&Task, String)> = tasks
        .iter()
        .map(|task| {
            let resources: Vec<&str> = task.resources.keys().map(String::as_str).collect();
            (task, format!("{} {} {}", task.id, task.priority, resources.join(", ")))
        })
        .collect();
    rows.sort_by(|a, b| a.0.id.cmp(&b.0.id));

    let width = rows.iter().map(|(_, header)| header.len()).max().unwrap_or(0);
    let days: Vec<_> = project.start.iter_days().take_while(|d| *d <= project.end).collect();
    let digits: String = days
        .iter()
        .filter_map(|d| char::from_digit(d.day() % 10, 10))
        .collect();
    let legend = format!("{}-+-{}", "-".repeat(width), digits);

    let mut out = String::new();
    out.push_str(&legend);
    out.push('\n');
    for (task, header) in rows {
        let scheduled = schedule.get(&task.id);
        let cells: String = days
            .iter()
            .map(|d| if scheduled.is_some_and(|s| s.works_on(*d)) { '=' } else { ' ' })
            .collect();
        let mut line = format!("{:>width$} | {}", header, cells.trim_end(), width = width);
        if !task.successors.is_empty() {
            line.push('>');
            line.push_str(&task.successors.join(", "));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str(&legend);
    out.push('\n');
    out
}
