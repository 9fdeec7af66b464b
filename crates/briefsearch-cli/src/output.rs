//! Output formatting for search results.
//!
//! Supports both human-readable terminal output and JSON for scripting.

use briefsearch_core::search::{ConsistencyReport, IndexStats, SearchResult};
use serde::Serialize;

/// Maximum characters to show in abstract snippet
const SNIPPET_MAX_LEN: usize = 200;

/// JSON output structure for search results
#[derive(Serialize)]
pub struct JsonOutput<'a> {
    pub query: &'a str,
    pub results: &'a [SearchResult],
}

/// JSON output structure for `--status`
#[derive(Serialize)]
pub struct JsonStatus<'a> {
    pub stats: &'a IndexStats,
    pub consistency: &'a ConsistencyReport,
    pub consistent: bool,
}

/// Formats search results as JSON.
pub fn format_json(query: &str, results: &[SearchResult]) -> String {
    let output = JsonOutput { query, results };
    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}

/// Formats search results for human-readable terminal output.
pub fn format_human(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("No results found for \"{}\"", query);
    }

    let mut output = String::new();
    output.push_str(&format!(
        "Found {} document{} for \"{}\":\n\n",
        results.len(),
        if results.len() == 1 { "" } else { "s" },
        query
    ));

    for (i, result) in results.iter().enumerate() {
        let doc = &result.document;
        output.push_str(&format!(
            "{}. {} [{}] (score: {:.4})\n",
            i + 1,
            doc.title,
            doc.id,
            result.score()
        ));

        let mut score_parts = vec![format!("fused: {:.4}", result.fused_score)];
        if let Some(ks) = result.lexical_score {
            score_parts.push(format!("keyword: {:.2}", ks));
        }
        if let Some(vs) = result.semantic_score {
            score_parts.push(format!("semantic: {:.2}", vs));
        }
        if let Some(rs) = result.rerank_score {
            score_parts.push(format!("rerank: {:.2}", rs));
        }
        output.push_str(&format!("   [{}]\n", score_parts.join(", ")));

        output.push_str(&format!(
            "   {} | quality {:.2}",
            doc.source_type, doc.quality_score
        ));
        if !doc.authors.is_empty() {
            output.push_str(&format!(" | {}", format_authors(&doc.authors)));
        }
        output.push('\n');

        let snippet = truncate_text(&doc.abstract_text, SNIPPET_MAX_LEN);
        output.push_str(&format!("   {}\n", indent_text(&snippet, "   ")));

        output.push('\n');
    }

    output.trim_end().to_string()
}

/// Formats index statistics and consistency for `--status`.
pub fn format_status(stats: &IndexStats, report: &ConsistencyReport, json: bool) -> String {
    if json {
        let status = JsonStatus {
            stats,
            consistency: report,
            consistent: report.is_consistent(),
        };
        return serde_json::to_string_pretty(&status).unwrap_or_else(|_| "{}".to_string());
    }

    let mut output = format!(
        "Documents: {}\n\
         Lexical entries: {}\n\
         Semantic entries: {}\n\
         Tombstones: {}\n",
        stats.documents, stats.lexical_entries, stats.semantic_entries, stats.tombstones
    );
    output.push_str(&format_report(report));
    output
}

/// Summarizes a consistency report.
pub fn format_report(report: &ConsistencyReport) -> String {
    if report.is_consistent() {
        return "Indexes are consistent".to_string();
    }

    let mut lines = vec!["Indexes are inconsistent:".to_string()];
    let sections = [
        ("Lexical only", &report.lexical_only),
        ("Semantic only", &report.semantic_only),
        ("Pending repair", &report.pending_repair),
    ];
    for (label, ids) in sections {
        if !ids.is_empty() {
            let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
            lines.push(format!("  {}: {}", label, ids.join(", ")));
        }
    }
    lines.join("\n")
}

/// "A", "A, B", or "A, B et al." for three or more authors.
fn format_authors(authors: &[String]) -> String {
    match authors {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{}, {}", a, b),
        [a, b, ..] => format!("{}, {} et al.", a, b),
    }
}

/// Truncates text to a maximum length, adding ellipsis if needed.
fn truncate_text(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_len)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let truncated = &text[..cut];
    // Prefer a word boundary near max_len
    match truncated.rfind(' ') {
        Some(last_space) => format!("{}...", &truncated[..last_space]),
        None => format!("{}...", truncated),
    }
}

/// Indents all lines of text after the first line.
fn indent_text(text: &str, indent: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 {
                line.to_string()
            } else {
                format!("{}{}", indent, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
