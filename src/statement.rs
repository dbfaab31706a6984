use crate::engine::AggregateTable;
use crate::schema::LineItem;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRow {
    pub label: String,
    pub field_name: String,
    pub indent: u8,
    pub is_total: bool,
    pub is_margin: bool,
    /// One value per statement period, in period order.
    pub values: Vec<f64>,
}

/// A single aggregate row laid out as a P&L: line items down, periods across, with the
/// computed Margin and Margin % rows at the bottom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlStatement {
    pub row_key: String,
    pub periods: Vec<String>,
    pub rows: Vec<StatementRow>,
}

impl PnlStatement {
    /// Returns `None` when `row_key` is not in the table.
    pub fn build(
        line_items: &[LineItem],
        table: &AggregateTable,
        row_key: &str,
        periods: &[String],
    ) -> Option<Self> {
        table.row(row_key)?;

        let margin_rows = [LineItem::margin(), LineItem::margin_pct()];
        let rows = line_items
            .iter()
            .filter(|item| !item.is_margin)
            .chain(margin_rows.iter())
            .map(|item| StatementRow {
                label: item.label.clone(),
                field_name: item.field_name.clone(),
                indent: item.indent,
                is_total: item.is_total,
                is_margin: item.is_margin,
                values: periods
                    .iter()
                    .map(|period| table.get(row_key, period, &item.field_name).unwrap_or(0.0))
                    .collect(),
            })
            .collect();

        Some(Self {
            row_key: row_key.to_string(),
            periods: periods.to_vec(),
            rows,
        })
    }

    pub fn row(&self, field_name: &str) -> Option<&StatementRow> {
        self.rows.iter().find(|row| row.field_name == field_name)
    }

    pub fn value(&self, field_name: &str, period: &str) -> Option<f64> {
        let index = self.periods.iter().position(|p| p == period)?;
        self.row(field_name)?.values.get(index).copied()
    }

    /// Direction of `field_name` in `period` against the period before it in the statement.
    /// The first period has no trend.
    pub fn trend(&self, field_name: &str, period: &str) -> Option<Trend> {
        let index = self.periods.iter().position(|p| p == period)?;
        let previous_index = index.checked_sub(1)?;
        let row = self.row(field_name)?;
        let current = *row.values.get(index)?;
        let previous = *row.values.get(previous_index)?;

        Some(if current > previous {
            Trend::Up
        } else if current < previous {
            Trend::Down
        } else {
            Trend::Flat
        })
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::new();
        output.push_str("Line Item,Field,Indent");
        for period in &self.periods {
            output.push(',');
            output.push_str(&csv_field(period));
        }
        output.push('\n');

        for row in &self.rows {
            output.push_str(&format!(
                "{},{},{}",
                csv_field(&row.label),
                csv_field(&row.field_name),
                row.indent
            ));
            for value in &row.values {
                output.push_str(&format!(",{:.2}", value));
            }
            output.push('\n');
        }

        output
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("# Profit & Loss - {}\n\n", self.row_key));

        output.push_str("| Line Item |");
        for period in &self.periods {
            output.push_str(&format!(" {} |", period));
        }
        output.push('\n');
        output.push_str("|---|");
        for _ in &self.periods {
            output.push_str("---:|");
        }
        output.push('\n');

        for row in &self.rows {
            let indent = "&nbsp;&nbsp;".repeat(row.indent as usize);
            let label = if row.is_total {
                format!("**{}**", row.label)
            } else {
                row.label.clone()
            };
            output.push_str(&format!("| {}{} |", indent, label));
            for value in &row.values {
                if row.field_name == crate::engine::MARGIN_PCT_FIELD {
                    output.push_str(&format!(" {:.1}% |", value));
                } else {
                    output.push_str(&format!(" {:.2} |", value));
                }
            }
            output.push('\n');
        }

        output
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
