//! Output formatting and the console notification sink

use comfy_table::{Cell, Color, Table};
use harforge_core::{NotificationSink, PricingTable, TokenUsage};
use indicatif::ProgressBar;

/// Notification sink that prints above the run spinner
pub struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl NotificationSink for ConsoleSink {
    fn sync_flash(&self, message: &str) {
        self.bar.println(format!("⟳ {message}"));
    }

    fn sync_error(&self, message: &str) {
        self.bar.println(format!("✗ sync: {message}"));
    }
}

/// Render the pricing table; the fallback model is marked with `*`
pub fn format_pricing_table(table: &PricingTable) -> String {
    let mut out = Table::new();
    out.set_header(vec![
        Cell::new("Model").fg(Color::Cyan),
        Cell::new("Input $/M").fg(Color::Cyan),
        Cell::new("Output $/M").fg(Color::Cyan),
        Cell::new("Cache write $/M").fg(Color::Cyan),
        Cell::new("Cache read $/M").fg(Color::Cyan),
        Cell::new("Reasoning $/M").fg(Color::Cyan),
    ]);

    let mut entries: Vec<_> = table.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (model, rates) in entries {
        let name = if model == table.fallback_model() {
            format!("{model} *")
        } else {
            model.to_string()
        };
        out.add_row(vec![
            name,
            format_rate(rates.input),
            format_rate(rates.output),
            format_rate(rates.cache_creation),
            format_rate(rates.cache_read),
            format_rate(rates.reasoning),
        ]);
    }

    format!("{out}\n* fallback for unknown models")
}

/// Render the end-of-run usage and cost summary
pub fn format_cost_summary(usage: &TokenUsage, cost: f64) -> String {
    let mut lines = vec![];
    lines.push("Token usage".to_string());
    lines.push(format!("  Input:          {}", format_tokens(usage.input)));
    lines.push(format!("  Output:         {}", format_tokens(usage.output)));
    lines.push(format!(
        "  Cache creation: {}",
        format_tokens(usage.cache_creation)
    ));
    lines.push(format!(
        "  Cache read:     {}",
        format_tokens(usage.cache_read)
    ));
    if usage.reasoning > 0 {
        lines.push(format!(
            "  Reasoning:      {}",
            format_tokens(usage.reasoning)
        ));
    }
    lines.push(format!("  Total:          {}", format_tokens(usage.total())));
    lines.push(format!("Estimated cost:   ${cost:.4}"));
    lines.join("\n")
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{rate}"),
        None => "-".to_string(),
    }
}

fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        tokens.to_string()
    }
}
