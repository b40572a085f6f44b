//! Tool/scope table printed before review.

use crossterm::style::{Attribute, Color, SetAttribute, SetForegroundColor};
use std::fmt::Write;
use tether_declare::ClassifiedTool;

const HEADERS: [&str; 3] = ["TOOL", "SCOPES", "RISK"];

/// Render one row per tool. High-risk rows are drawn in bold red.
pub fn render(tools: &[ClassifiedTool]) -> String {
    let rows: Vec<[String; 3]> = tools
        .iter()
        .map(|t| {
            let risk = if t.high_risk { "high" } else { "-" };
            [t.name().to_string(), t.scope_label(), risk.to_string()]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header = format_row(&HEADERS.map(String::from), &widths);
    let _ = writeln!(
        out,
        "{}{}{}",
        SetAttribute(Attribute::Bold),
        header,
        SetAttribute(Attribute::Reset)
    );

    for (tool, row) in tools.iter().zip(&rows) {
        let line = format_row(row, &widths);
        if tool.high_risk {
            let _ = writeln!(
                out,
                "{}{}{}{}",
                SetForegroundColor(Color::Red),
                SetAttribute(Attribute::Bold),
                line,
                SetAttribute(Attribute::Reset)
            );
        } else {
            let _ = writeln!(out, "{line}");
        }
    }
    out
}

fn format_row(cells: &[String; 3], widths: &[usize; 3]) -> String {
    format!(
        "  {:<w0$}  {:<w1$}  {}",
        cells[0],
        cells[1],
        cells[2],
        w0 = widths[0],
        w1 = widths[1]
    )
    .trim_end()
    .to_string()
}
