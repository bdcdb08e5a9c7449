use std::borrow::Cow;
use std::fmt::Write as _;

use crate::parse::TableData;

/// Cells wider than this are cut and suffixed with `…`.
pub const MAX_CELL_WIDTH: usize = 40;

/// Renders an aligned plain-text table. Short rows are padded, long rows cut to the header width.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let header_cells = headers
        .iter()
        .map(|h| prepare_cell(h))
        .collect::<Vec<_>>();
    let body = rows
        .iter()
        .map(|row| {
            (0..headers.len())
                .map(|idx| prepare_cell(row.get(idx).map(String::as_str).unwrap_or("")))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut widths = header_cells
        .iter()
        .map(|cell| display_width(cell).max(3))
        .collect::<Vec<_>>();
    for row in &body {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let separator = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in &body {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

/// Renders the first `limit` rows of `table` with a leading row-number column.
pub fn render_preview(table: &TableData, limit: usize) -> String {
    let mut headers = Vec::with_capacity(table.headers.len() + 1);
    headers.push("#".to_string());
    headers.extend(table.headers.iter().cloned());
    let rows = table
        .rows
        .iter()
        .take(limit)
        .enumerate()
        .map(|(idx, cells)| {
            let mut row = Vec::with_capacity(cells.len() + 1);
            row.push((idx + 1).to_string());
            row.extend(cells.iter().cloned());
            row
        })
        .collect::<Vec<_>>();
    let mut output = render_table(&headers, &rows);
    let _ = writeln!(
        output,
        "({} of {} row(s), {} column(s))",
        rows.len(),
        table.row_count(),
        table.headers.len()
    );
    output
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let mut line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let padding = width.saturating_sub(display_width(cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn prepare_cell(value: &str) -> String {
    let flattened = flatten_whitespace(value);
    if display_width(&flattened) <= MAX_CELL_WIDTH {
        return flattened.into_owned();
    }
    let mut cut = flattened
        .chars()
        .take(MAX_CELL_WIDTH - 1)
        .collect::<String>();
    cut.push('…');
    cut
}

fn flatten_whitespace(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn render_table_pads_short_rows_and_aligns_columns() {
        let rendered = render_table(
            &strings(&["name", "price"]),
            &[strings(&["Widget", "10"]), strings(&["Gadget"])],
        );
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "name    price");
        assert_eq!(lines[1], "------  -----");
        assert_eq!(lines[2], "Widget  10");
        assert_eq!(lines[3], "Gadget");
    }

    #[test]
    fn long_and_multiline_cells_are_flattened_and_cut() {
        let long = "x".repeat(MAX_CELL_WIDTH + 10);
        let rendered = render_table(&strings(&["a"]), &[vec![long], strings(&["one\ntwo"])]);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert!(lines[2].ends_with('…'));
        assert_eq!(lines[2].chars().count(), MAX_CELL_WIDTH);
        assert_eq!(lines[3], "one two");
    }

    #[test]
    fn preview_numbers_rows_and_reports_counts() {
        let table = TableData {
            headers: strings(&["sku"]),
            rows: vec![strings(&["A"]), strings(&["B"]), strings(&["C"])],
        };
        let rendered = render_preview(&table, 2);
        assert_eq!(rendered.lines().nth(2), Some("1    A"));
        assert!(!rendered.contains("C"));
        assert!(rendered.ends_with("(2 of 3 row(s), 1 column(s))\n"));
    }
}
