//! Position mapping and code frames for parse diagnostics.

/// Convert a byte offset into 1-based line and column numbers.
pub fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Render the offending line with two lines of context and a caret under
/// the reported column. Line and column are 1-based.
pub fn code_frame(source: &str, line: usize, column: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if line == 0 || line > lines.len() {
        return String::new();
    }
    let start = line.saturating_sub(2).max(1);
    let end = (line + 2).min(lines.len());
    let gutter = end.to_string().len();

    let mut out = String::new();
    for n in start..=end {
        let marker = if n == line { '>' } else { ' ' };
        out.push_str(&format!("{marker} {n:>gutter$} | {}\n", lines[n - 1]));
        if n == line {
            out.push_str(&format!(
                "  {:>gutter$} | {}^\n",
                "",
                " ".repeat(column.saturating_sub(1))
            ));
        }
    }
    out.pop();
    out
}
