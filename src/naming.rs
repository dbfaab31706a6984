//! Derives the P&L line-item hierarchy from a naming-convention sheet.

use crate::resolver::normalize;
use crate::schema::{find_key_ignore_case, LineItem, Record, Section};
use indexmap::IndexSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub const TOTAL_REVENUE_FIELD: &str = "TotalRevenue_$mm";
pub const TOTAL_EXPENSE_FIELD: &str = "TotalExpense_$mm";
pub const TOTAL_COMPENSATION_FIELD: &str = "TotalCompensation_$mm";
pub const BASE_COMPENSATION_FIELD: &str = "BaseCompensation_$mm";
pub const VARIABLE_COMPENSATION_FIELD: &str = "VariableCompensation_$mm";

const FINANCIAL_RESULT_CATEGORY: &str = "financial result";

const SUBTOTAL_INDENT: u8 = 1;
const DETAIL_INDENT: u8 = 2;

const NAMING_HEADERS: [&str; 9] = [
    "Fact_Margin naming",
    "Fact Margin naming",
    "Fact_Margin_naming",
    "FactMargin naming",
    "Fact_Margin name",
    "Fact_Margin",
    "Fact Margin",
    "Fact Field Name",
    "Field Name",
];
const CATEGORY_HEADERS: [&str; 4] = ["Category", "Field Category", "Metric Category", "Type"];
const IMPACT_HEADERS: [&str; 6] = [
    "P&L Impact",
    "P&L_Impact",
    "PnL Impact",
    "PL Impact",
    "P and L Impact",
    "Impact",
];
const LABEL_HEADERS: [&str; 4] = ["Display Name", "Label", "Line Item", "Description"];

const UNIT_SUFFIXES: [&str; 6] = ["_$mm", "$mm", "_pct", "_bps", "_annual", "_fte"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PnlImpact {
    Revenue,
    Expense,
    Margin,
    Unclassified,
}

/// Columns of a naming-convention sheet, discovered from the first row's headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingColumns {
    pub naming: Option<String>,
    pub category: Option<String>,
    pub impact: Option<String>,
    pub label: Option<String>,
}

impl NamingColumns {
    pub fn discover(records: &[Record]) -> Self {
        let Some(first) = records.first() else {
            return Self::default();
        };

        let find = |variants: &[&str]| {
            variants
                .iter()
                .find_map(|variant| find_key_ignore_case(first, variant))
                .map(str::to_string)
        };

        Self {
            naming: find(&NAMING_HEADERS),
            category: find(&CATEGORY_HEADERS),
            impact: find(&IMPACT_HEADERS),
            label: find(&LABEL_HEADERS),
        }
    }
}

/// Line items plus the rows that needed a guess or were set aside.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineItemSchema {
    pub items: Vec<LineItem>,
    pub columns: NamingColumns,
    /// Rows kept after the "Financial Result" category filter.
    pub retained_rows: usize,
    /// Fields placed under expenses only because nothing classified them.
    pub unclassified: Vec<String>,
    /// Fields classified as margin; margins are always computed, never read from a row.
    pub margin_fields: Vec<String>,
}

impl LineItemSchema {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Field names the aggregation accumulates, in line-item order.
    pub fn field_names(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| !item.is_margin)
            .map(|item| item.field_name.as_str())
            .collect()
    }
}

pub fn build_line_items(naming_records: &[Record]) -> Vec<LineItem> {
    build_schema(naming_records).items
}

/// Builds the ordered line-item hierarchy:
/// `Revenue, revenue details, Expenses, expense details, Total Compensation, Base, Variable`.
pub fn build_schema(naming_records: &[Record]) -> LineItemSchema {
    let columns = NamingColumns::discover(naming_records);

    let Some(naming_column) = columns.naming.clone() else {
        info!("Naming convention sheet has no fact field name column, no line items built");
        return LineItemSchema {
            columns,
            ..LineItemSchema::default()
        };
    };

    let retained: Vec<&Record> = naming_records
        .iter()
        .filter(|row| match &columns.category {
            Some(category) => row
                .get(category)
                .and_then(|v| v.as_key())
                .is_some_and(|v| v.to_lowercase() == FINANCIAL_RESULT_CATEGORY),
            None => true,
        })
        .collect();

    debug!(
        "Naming convention: {} of {} rows retained (naming column '{}')",
        retained.len(),
        naming_records.len(),
        naming_column
    );

    let mut schema = LineItemSchema {
        retained_rows: retained.len(),
        columns: columns.clone(),
        ..LineItemSchema::default()
    };
    if retained.is_empty() {
        return schema;
    }

    let mut seen: IndexSet<String> = IndexSet::new();
    let mut revenue = Vec::new();
    let mut expenses = Vec::new();
    let mut total_compensation: Option<LineItem> = None;
    let mut base_compensation: Option<LineItem> = None;
    let mut variable_compensation: Option<LineItem> = None;

    for row in retained {
        let Some(field) = row.get(&naming_column).and_then(|v| v.as_key()) else {
            continue;
        };
        let lower = field.to_lowercase();
        if !seen.insert(lower.clone()) {
            debug!("Duplicate naming convention row for '{}' ignored", field);
            continue;
        }

        if lower == TOTAL_REVENUE_FIELD.to_lowercase() || lower == TOTAL_EXPENSE_FIELD.to_lowercase()
        {
            continue;
        }

        let label = columns
            .label
            .as_ref()
            .and_then(|column| row.get(column))
            .and_then(|v| v.as_key())
            .unwrap_or_else(|| humanize_field_name(&field));

        if lower == TOTAL_COMPENSATION_FIELD.to_lowercase() {
            total_compensation = Some(LineItem {
                label: "Total Compensation".to_string(),
                field_name: field,
                indent: SUBTOTAL_INDENT,
                is_total: true,
                is_margin: false,
                section: Section::Expenses,
            });
            continue;
        }
        if lower == BASE_COMPENSATION_FIELD.to_lowercase() {
            base_compensation = Some(LineItem::detail(label, field, DETAIL_INDENT, Section::Expenses));
            continue;
        }
        if lower == VARIABLE_COMPENSATION_FIELD.to_lowercase() {
            variable_compensation = Some(LineItem::detail(label, field, DETAIL_INDENT, Section::Expenses));
            continue;
        }

        let impact = columns
            .impact
            .as_ref()
            .and_then(|column| row.get(column))
            .and_then(|v| v.as_key());

        match classify(impact.as_deref(), &field) {
            PnlImpact::Revenue => {
                revenue.push(LineItem::detail(label, field, DETAIL_INDENT, Section::Revenue));
            }
            PnlImpact::Expense => {
                expenses.push(LineItem::detail(label, field, DETAIL_INDENT, Section::Expenses));
            }
            PnlImpact::Margin => schema.margin_fields.push(field),
            PnlImpact::Unclassified => {
                warn!(
                    "Naming convention field '{}' has no recognizable P&L impact, defaulting to expense",
                    field
                );
                schema.unclassified.push(field.clone());
                expenses.push(LineItem::detail(label, field, DETAIL_INDENT, Section::Expenses));
            }
        }
    }

    let mut items = Vec::with_capacity(revenue.len() + expenses.len() + 5);
    items.push(LineItem::header("Revenue", TOTAL_REVENUE_FIELD, Section::Revenue));
    items.extend(revenue);
    items.push(LineItem::header("Expenses", TOTAL_EXPENSE_FIELD, Section::Expenses));
    items.extend(expenses);

    // Without a compensation sub-total the components follow the other expense details.
    items.extend(total_compensation);
    items.extend([base_compensation, variable_compensation].into_iter().flatten());

    info!("Built {} P&L line items from naming convention", items.len());
    schema.items = items;
    schema
}

/// Classifies a row by its P&L impact text, falling back to the field name.
pub fn classify(impact: Option<&str>, field_name: &str) -> PnlImpact {
    if let Some(impact) = impact {
        let impact = impact.to_lowercase();
        if impact.contains("revenue") {
            return PnlImpact::Revenue;
        }
        if impact.contains("expense") {
            return PnlImpact::Expense;
        }
        if impact.contains("margin") {
            return PnlImpact::Margin;
        }
    }

    let normalized = normalize(field_name);
    if normalized == "margin" || normalized == "marginpct" {
        return PnlImpact::Margin;
    }

    let lower = field_name.to_lowercase();
    if lower.contains("rev") {
        PnlImpact::Revenue
    } else if lower.contains("exp") {
        PnlImpact::Expense
    } else {
        PnlImpact::Unclassified
    }
}

/// `Rev_TransactionalFees_$mm` → `Rev Transactional Fees`.
pub fn humanize_field_name(field_name: &str) -> String {
    let mut stem = field_name.trim();
    for suffix in UNIT_SUFFIXES {
        let Some(split) = stem.len().checked_sub(suffix.len()) else {
            continue;
        };
        if stem.is_char_boundary(split) {
            let (head, tail) = stem.split_at(split);
            if tail.eq_ignore_ascii_case(suffix) {
                stem = head;
                break;
            }
        }
    }

    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut previous: Option<char> = None;

    for c in stem.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous = None;
            continue;
        }
        let boundary = matches!(previous, Some(p) if p.is_lowercase() && c.is_uppercase());
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
        previous = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words.join(" ")
}
