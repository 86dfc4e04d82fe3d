//! Plain text rendering of ranked results for terminals.

use std::fmt::Write;

use snipbench_core::RankedResult;

const HEADERS: [&str; 7] = ["#", "name", "avg (µs)", "p75 (µs)", "p99 (µs)", "ops/s", "relative"];

/// Render ranked results as an aligned table.
///
/// Errored snippets are listed last with their message; snippets whose
/// measurement is indistinguishable from an empty one are flagged.
pub fn render_table(ranked: &[RankedResult]) -> String {
    let rows: Vec<[String; 7]> = ranked.iter().map(row).collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_line(&mut out, &HEADERS.map(str::to_string), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("  "));

    for (row, ranked) in rows.iter().zip(ranked) {
        push_line(&mut out, row, &widths);
        if let Some(error) = &ranked.result.error {
            let _ = writeln!(out, "   error: {}", error);
        } else if ranked.result.optimized_out == Some(true) {
            let _ = writeln!(out, "   note: likely optimized out (close to an empty snippet)");
        }
    }
    out
}

/// One line naming the fastest snippet and its lead over the runner-up.
pub fn summary_line(ranked: &[RankedResult]) -> Option<String> {
    let fastest = ranked.first().filter(|r| r.rank == Some(1))?;
    let line = match ranked.get(1).filter(|r| r.rank.is_some()) {
        Some(second) if second.result.ops_or_zero() > 0 => format!(
            "{} is fastest, {:.2}x faster than {}",
            fastest.result.name,
            fastest.result.ops_or_zero() as f64 / second.result.ops_or_zero() as f64,
            second.result.name
        ),
        _ => format!("{} is fastest", fastest.result.name),
    };
    Some(line)
}

fn row(ranked: &RankedResult) -> [String; 7] {
    let result = &ranked.result;
    let rank = ranked.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
    if result.is_error() {
        return [
            rank,
            result.name.clone(),
            "-".into(),
            "-".into(),
            "-".into(),
            "-".into(),
            "failed".into(),
        ];
    }
    [
        rank,
        result.name.clone(),
        format!("{:.3}", result.avg),
        format!("{:.3}", result.p75),
        format!("{:.3}", result.p99),
        group_thousands(result.ops_or_zero()),
        format!("{:.1}%", ranked.relative),
    ]
}

fn push_line(out: &mut String, cells: &[String; 7], widths: &[usize; 7]) {
    let mut line = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i > 0 {
            line.push_str("  ");
        }
        let pad = width.saturating_sub(cell.chars().count());
        // Name column is left aligned, numbers right aligned.
        if i == 1 {
            line.push_str(cell);
            line.push_str(&" ".repeat(pad));
        } else {
            line.push_str(&" ".repeat(pad));
            line.push_str(cell);
        }
    }
    let _ = writeln!(out, "{}", line.trim_end());
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use snipbench_core::{BenchmarkResult, rank};

    fn sample() -> Vec<RankedResult> {
        rank(&[
            BenchmarkResult::measured("Array.reduce", 4.0, 4.2, 5.0, false),
            BenchmarkResult::failed("broken", "Code compilation error: Unexpected end of input (1:5)"),
            BenchmarkResult::measured("For Loop", 2.0, 2.1, 3.0, false),
            BenchmarkResult::measured("empty", 0.01, 0.01, 0.02, true),
        ])
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_table_lists_fastest_first() {
        let table = render_table(&sample());
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].contains("avg (µs)"));
        assert!(lines[2].contains("empty"));
        assert!(lines[2].contains("100.0%"));
        assert!(table.contains("likely optimized out"));

        let loop_line = lines.iter().position(|l| l.contains("For Loop")).unwrap();
        let reduce_line = lines.iter().position(|l| l.contains("Array.reduce")).unwrap();
        assert!(loop_line < reduce_line);
        assert!(lines[reduce_line].contains("250,000"));
    }

    #[test]
    fn test_errors_rendered_last() {
        let table = render_table(&sample());
        let last_row = table.lines().rev().nth(1).unwrap();
        assert!(last_row.contains("broken"));
        assert!(last_row.contains("failed"));
        assert!(table.trim_end().ends_with("Code compilation error: Unexpected end of input (1:5)"));
    }

    #[test]
    fn test_summary_line() {
        let ranked = rank(&[
            BenchmarkResult::measured("a", 1.0, 1.0, 1.0, false),
            BenchmarkResult::measured("b", 2.0, 2.0, 2.0, false),
        ]);
        assert_eq!(summary_line(&ranked).unwrap(), "a is fastest, 2.00x faster than b");

        let only_errors = rank(&[BenchmarkResult::failed("x", "boom")]);
        assert_eq!(summary_line(&only_errors), None);
    }
}
