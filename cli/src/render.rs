//! Terminal table and JSON export for an [`AuditResult`].

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use owo_colors::OwoColorize;
use repo_audit_core::AuditResult;
use repo_audit_core::CellState;
use repo_audit_core::config::DisplayConfig;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStyle {
    pub show_updated_at: bool,
    /// Paint drift cells. Only honored when the terminal supports color.
    pub color: bool,
}

impl TableStyle {
    pub fn new(display: &DisplayConfig, color_supported: bool) -> Self {
        Self {
            show_updated_at: display.show_updated_at,
            color: display.highlight_missing && color_supported,
        }
    }
}

pub fn stdout_supports_color() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

pub fn cell_text(state: CellState) -> &'static str {
    match state {
        CellState::Present => "yes",
        CellState::Absent => "no",
        CellState::Drift => "MISSING",
        CellState::Unknown => "?",
    }
}

/// The table followed by a short summary. Never fails on an empty result.
pub fn render_table(result: &AuditResult, style: TableStyle) -> String {
    if result.is_empty() {
        return format!("No repositories found for {}.\n", result.user());
    }

    let mut columns: Vec<String> = vec!["Repository".to_string()];
    if style.show_updated_at {
        columns.push("Updated".to_string());
    }
    columns.extend(result.check_items().iter().cloned());

    let rows: Vec<Vec<(String, Option<CellState>)>> = result
        .repositories()
        .iter()
        .map(|repo| {
            let mut row = vec![(repo.name().to_string(), None)];
            if style.show_updated_at {
                row.push((
                    repo.repository().updated_at.format(DATE_FORMAT).to_string(),
                    None,
                ));
            }
            for item in result.check_items() {
                let state = result.cell(repo, item);
                row.push((cell_text(state).to_string(), Some(state)));
            }
            row
        })
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &rows {
        for (width, (text, _)) in widths.iter_mut().zip(row) {
            *width = (*width).max(text.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(column, &width)| format!("{column:<width$}"))
        .collect();
    out.push_str(header.join(" | ").trim_end());
    out.push('\n');
    let divider: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&divider.join("-+-"));
    out.push('\n');

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|((text, state), &width)| {
                let padded = format!("{text:<width$}");
                paint(padded, *state, style.color)
            })
            .collect();
        out.push_str(cells.join(" | ").trim_end());
        out.push('\n');
    }

    out.push('\n');
    if let Some(baseline) = result.baseline() {
        out.push_str(&format!(
            "Baseline: {} (updated {})\n",
            baseline.name,
            baseline.updated_at.format(DATE_FORMAT)
        ));
    }
    let total = result.repositories().len();
    let missing: Vec<String> = result
        .missing_counts()
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(item, count)| format!("{item} {count}/{total}"))
        .collect();
    if !missing.is_empty() {
        out.push_str(&format!("Missing: {}\n", missing.join(", ")));
    }
    let unknown = result.unknown_cells();
    if unknown > 0 {
        out.push_str(&format!(
            "Unknown: {unknown} check(s) could not be completed and will be retried next run\n"
        ));
    }
    for warning in result.cache_warnings() {
        out.push_str(&format!("Cache warning: {warning}\n"));
    }
    out
}

fn paint(text: String, state: Option<CellState>, color: bool) -> String {
    if !color {
        return text;
    }
    match state {
        Some(CellState::Drift) => text.red().bold().to_string(),
        Some(CellState::Unknown) => text.yellow().to_string(),
        Some(CellState::Present) => text.green().to_string(),
        _ => text,
    }
}

pub fn write_table<W: Write>(out: &mut W, result: &AuditResult, style: TableStyle) -> std::io::Result<()> {
    out.write_all(render_table(result, style).as_bytes())?;
    out.flush()
}

/// Pretty JSON of the whole result.
pub fn to_json(result: &AuditResult) -> anyhow::Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize audit result")
}

pub fn write_json_file(path: &Path, result: &AuditResult) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut json = to_json(result)?;
    json.push('\n');
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote JSON report");
    Ok(())
}
