//! Formatted output helpers for CLI commands.

use std::fmt::Write;

use kapsel_net::model::Network;
use kapsel_runtime::container::ContainerRecord;

/// Renders rows as left-aligned columns separated by two spaces.
fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = header.iter().map(|h| (*h).to_string()).collect();
    for row in std::iter::once(&header).chain(rows) {
        let mut line = String::new();
        for (cell, width) in row.iter().zip(&widths) {
            let _ = write!(line, "{cell:<width$}  ");
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Formats the `ps` table.
#[must_use]
pub fn container_table(containers: &[ContainerRecord]) -> String {
    let rows: Vec<Vec<String>> = containers
        .iter()
        .map(|c| {
            vec![
                c.id.to_string(),
                c.name.clone(),
                c.pid.clone(),
                c.status.to_string(),
                c.command.clone(),
                c.create_time.clone(),
            ]
        })
        .collect();
    table(&["ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"], &rows)
}

/// Formats the `network list` table.
#[must_use]
pub fn network_table(networks: &[Network]) -> String {
    let rows: Vec<Vec<String>> = networks
        .iter()
        .map(|n| vec![n.name.clone(), n.ip_range.to_string(), n.driver.clone()])
        .collect();
    table(&["NAME", "IpRange", "Driver"], &rows)
}
