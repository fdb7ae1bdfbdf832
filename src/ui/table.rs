use serde_json::Value;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

use crate::query::Row;
use crate::storage::LayerStats;

#[derive(Tabled)]
pub struct LayerRow {
    #[tabled(rename = "Layer")]
    pub layer: String,
    #[tabled(rename = "Rows")]
    pub rows: usize,
}

/// Per-layer row counts with a total line
pub fn layer_table(stats: &LayerStats) -> String {
    if stats.layers.is_empty() {
        return String::new();
    }

    let mut rows: Vec<LayerRow> = stats
        .layers
        .iter()
        .map(|(layer, rows)| LayerRow {
            layer: layer.clone(),
            rows: *rows,
        })
        .collect();
    rows.push(LayerRow {
        layer: "total".to_string(),
        rows: stats.total,
    });

    Table::new(&rows).with(Style::rounded()).to_string()
}

/// Query results; columns come from the first row. Long cells are cut at `max_width`.
pub fn results_table(rows: &[Row], max_width: usize) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };

    let columns: Vec<String> = first.keys().cloned().collect();
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());

    for row in rows {
        builder.push_record(columns.iter().map(|c| {
            let cell = match row.get(c) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            truncate(&cell, max_width)
        }));
    }

    builder.build().with(Style::rounded()).to_string()
}

fn truncate(text: &str, max_width: usize) -> String {
    if text.chars().count() <= max_width {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", cut)
}
