//! Aggregation of fact records into the row → period → field table behind the P&L views.
//!
//! Algorithm:
//! 1. Discover the display values of every selected dimension
//! 2. Enumerate row keys as the Cartesian product of those values, plus `"Total"`
//! 3. Zero-initialise every row × period × field cell
//! 4. Fold each fact record into its own row and period
//! 5. Phase 1: derive margin and margin % per partition, trusting source margins
//! 6. Phase 2: re-sum the grand total from the partitions and always compute its margins

use crate::dimensions::{Dimension, DimensionJoiner};
use crate::naming::{TOTAL_EXPENSE_FIELD, TOTAL_REVENUE_FIELD};
use crate::resolver::{resolve_exact, MatchStrategy, PreparedRecord};
use crate::schema::{find_key_ignore_case, DimensionTables, LineItem, Record};
use crate::utils::{sort_periods, CartesianProduct};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const TOTAL_ROW_KEY: &str = "Total";
pub const ROW_KEY_SEPARATOR: &str = " | ";
pub const PERIOD_FIELD: &str = "Quarter";

pub const MARGIN_FIELD: &str = "Margin";
pub const MARGIN_PCT_FIELD: &str = "MarginPct";
pub const SOURCE_MARGIN_FIELD: &str = "Margin_$mm";

/// Columns that carry a precomputed margin in source data.
const SOURCE_MARGIN_ALIASES: [&str; 2] = [SOURCE_MARGIN_FIELD, "Margin"];
const SOURCE_MARGIN_PCT_ALIASES: [&str; 5] =
    [MARGIN_PCT_FIELD, "Margin_pct", "Margin %", "Margin_%", "MarginPercent"];

pub type PeriodValues = IndexMap<String, f64>;

/// `row key → period → field → value`, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateTable {
    rows: IndexMap<String, IndexMap<String, PeriodValues>>,
}

impl AggregateTable {
    pub fn get(&self, row_key: &str, period: &str, field: &str) -> Option<f64> {
        self.rows.get(row_key)?.get(period)?.get(field).copied()
    }

    pub fn period_values(&self, row_key: &str, period: &str) -> Option<&PeriodValues> {
        self.rows.get(row_key)?.get(period)
    }

    pub fn row(&self, row_key: &str) -> Option<&IndexMap<String, PeriodValues>> {
        self.rows.get(row_key)
    }

    pub fn row_keys(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &IndexMap<String, PeriodValues>)> {
        self.rows.iter().map(|(key, periods)| (key.as_str(), periods))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn ensure_row(&mut self, row_key: &str, periods: &IndexSet<String>, fields: &[String]) {
        if self.rows.contains_key(row_key) {
            return;
        }
        let zeroed: PeriodValues = fields.iter().map(|field| (field.clone(), 0.0)).collect();
        let row = periods
            .iter()
            .map(|period| (period.clone(), zeroed.clone()))
            .collect();
        self.rows.insert(row_key.to_string(), row);
    }

    fn cell_mut(&mut self, row_key: &str, period: &str) -> Option<&mut PeriodValues> {
        self.rows.get_mut(row_key)?.get_mut(period)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationFault {
    pub record_index: Option<usize>,
    pub row_key: Option<String>,
    pub period: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowConfidenceMatch {
    pub field_name: String,
    pub matched_key: String,
    pub strategy: MatchStrategy,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationDiagnostics {
    pub records_folded: usize,
    pub records_without_period: usize,
    pub records_outside_selection: usize,
    /// None of the selected dimensions resolved for these records.
    pub records_unattributed: usize,
    /// Folded straight into `"Total"`: the unattributed records plus any whose dimension
    /// labels spell the grand total key.
    pub records_folded_into_total: usize,
    pub faults: Vec<AggregationFault>,
    pub low_confidence: Vec<LowConfidenceMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationOutcome {
    pub table: AggregateTable,
    pub row_keys: Vec<String>,
    /// Dimension name → distinct display values, in first-seen order.
    pub dimension_values: IndexMap<String, Vec<String>>,
    pub diagnostics: AggregationDiagnostics,
}

pub struct Aggregator<'a> {
    line_items: &'a [LineItem],
    joiner: DimensionJoiner<'a>,
    dimensions: Vec<Dimension>,
    periods: IndexSet<String>,
    fields: Vec<String>,
    low_confidence_threshold: f64,
}

impl<'a> Aggregator<'a> {
    pub fn new(
        line_items: &'a [LineItem],
        dimension_tables: &'a DimensionTables,
        selected_dimensions: &[String],
        selected_periods: &[String],
    ) -> Self {
        let mut fields: IndexSet<String> = line_items
            .iter()
            .filter(|item| !item.is_margin)
            .map(|item| item.field_name.clone())
            .collect();
        for derived in [MARGIN_FIELD, MARGIN_PCT_FIELD, SOURCE_MARGIN_FIELD] {
            fields.insert(derived.to_string());
        }

        Self {
            line_items,
            joiner: DimensionJoiner::new(dimension_tables),
            dimensions: selected_dimensions
                .iter()
                .map(|name| Dimension::named(name))
                .collect(),
            periods: selected_periods.iter().map(|p| p.trim().to_string()).collect(),
            fields: fields.into_iter().collect(),
            low_confidence_threshold: 0.5,
        }
    }

    pub fn with_low_confidence_threshold(mut self, threshold: f64) -> Self {
        self.low_confidence_threshold = threshold;
        self
    }

    /// Distinct display values per selected dimension, falling back to raw IDs.
    pub fn discover_dimension_values(&self, fact_records: &[Record]) -> Vec<Vec<String>> {
        self.dimensions
            .iter()
            .map(|dimension| {
                let values: IndexSet<String> = fact_records
                    .iter()
                    .filter_map(|record| self.joiner.resolve_label(record, dimension))
                    .collect();
                values.into_iter().collect()
            })
            .collect()
    }

    /// Table with every row × selected period × field present and zero.
    pub fn initialize(&self, row_keys: &[String]) -> AggregateTable {
        let mut table = AggregateTable::default();
        for row_key in row_keys {
            table.ensure_row(row_key, &self.periods, &self.fields);
        }
        table
    }

    pub fn run(&self, fact_records: &[Record]) -> AggregationOutcome {
        let dimension_values = self.discover_dimension_values(fact_records);
        let enumerated = enumerate_row_keys(&dimension_values);
        let mut table = self.initialize(&enumerated);
        let mut diagnostics = AggregationDiagnostics::default();

        debug!(
            "Aggregating {} fact records into {} rows x {} periods ({} fields)",
            fact_records.len(),
            enumerated.len(),
            self.periods.len(),
            self.fields.len()
        );

        let mut margin_pct_written: HashSet<(String, String)> = HashSet::new();
        let mut low_confidence_seen: HashSet<(String, String)> = HashSet::new();

        for (index, record) in fact_records.iter().enumerate() {
            if let Err(reason) = self.fold_record(
                &mut table,
                record,
                &mut margin_pct_written,
                &mut low_confidence_seen,
                &mut diagnostics,
            ) {
                warn!("Skipping fact record #{}: {}", index, reason);
                diagnostics.faults.push(AggregationFault {
                    record_index: Some(index),
                    row_key: None,
                    period: None,
                    reason,
                });
            }
        }

        self.derive_partition_margins(&mut table, &mut diagnostics);
        self.derive_grand_total(&mut table, &mut diagnostics);

        // Rows created while folding (partly resolved dimensions) are listed too.
        let row_keys: Vec<String> = table
            .row_keys()
            .filter(|key| *key != TOTAL_ROW_KEY)
            .map(str::to_string)
            .chain(std::iter::once(TOTAL_ROW_KEY.to_string()))
            .collect();
        if row_keys.len() > enumerated.len() {
            debug!(
                "{} rows added for partly resolved dimensions",
                row_keys.len() - enumerated.len()
            );
        }

        info!(
            "Aggregation folded {} of {} records ({} faults)",
            diagnostics.records_folded,
            fact_records.len(),
            diagnostics.faults.len()
        );

        AggregationOutcome {
            table,
            row_keys,
            dimension_values: self
                .dimensions
                .iter()
                .map(|d| d.name.clone())
                .zip(dimension_values)
                .collect(),
            diagnostics,
        }
    }

    /// Row key of a single record; dimensions that do not resolve are left out.
    pub fn row_key_for(&self, record: &Record) -> String {
        row_key_from_tokens(&self.row_tokens(record))
    }

    fn row_tokens(&self, record: &Record) -> Vec<String> {
        self.dimensions
            .iter()
            .filter_map(|dimension| self.joiner.resolve_label(record, dimension))
            .collect()
    }

    fn fold_record(
        &self,
        table: &mut AggregateTable,
        record: &Record,
        margin_pct_written: &mut HashSet<(String, String)>,
        low_confidence_seen: &mut HashSet<(String, String)>,
        diagnostics: &mut AggregationDiagnostics,
    ) -> Result<(), String> {
        let Some(period) = record_period(record) else {
            diagnostics.records_without_period += 1;
            return Ok(());
        };
        if !self.periods.contains(&period) {
            diagnostics.records_outside_selection += 1;
            return Ok(());
        }

        let tokens = self.row_tokens(record);
        let row_key = row_key_from_tokens(&tokens);
        if !self.dimensions.is_empty() {
            if tokens.is_empty() {
                diagnostics.records_unattributed += 1;
            } else if row_key == TOTAL_ROW_KEY {
                warn!("Dimension labels of a record spell the grand total key '{}'", row_key);
            }
            if row_key == TOTAL_ROW_KEY {
                diagnostics.records_folded_into_total += 1;
            }
        }

        // Collect first so that a bad record contributes nothing at all.
        let prepared = PreparedRecord::new(record);
        let mut contributions: Vec<(&str, f64)> = Vec::new();
        for item in self.line_items.iter().filter(|item| !item.is_margin) {
            let resolution = prepared.resolve(&item.field_name);
            let Some(matched) = resolution.matched else {
                continue;
            };
            if matched.is_low_confidence(self.low_confidence_threshold)
                && low_confidence_seen.insert((item.field_name.clone(), matched.key.clone()))
            {
                warn!(
                    "Low confidence match for '{}': column '{}' via {:?} ({:.2})",
                    item.field_name, matched.key, matched.strategy, matched.confidence
                );
                diagnostics.low_confidence.push(LowConfidenceMatch {
                    field_name: item.field_name.clone(),
                    matched_key: matched.key.clone(),
                    strategy: matched.strategy,
                    confidence: matched.confidence,
                });
            }
            contributions.push((item.field_name.as_str(), matched.value));
        }

        let source_margin = resolve_exact(record, &SOURCE_MARGIN_ALIASES).map(|m| m.value);
        let source_margin_pct = resolve_exact(record, &SOURCE_MARGIN_PCT_ALIASES).map(|m| m.value);

        table.ensure_row(&row_key, &self.periods, &self.fields);
        let cell = table
            .cell_mut(&row_key, &period)
            .ok_or_else(|| format!("no cell for row '{}' period '{}'", row_key, period))?;

        for (field, value) in &contributions {
            let current = cell.get(*field).copied().unwrap_or(0.0);
            if !(current + value).is_finite() {
                return Err(format!("accumulating {} into '{}' is not finite", value, field));
            }
        }

        for (field, value) in contributions {
            *cell.entry(field.to_string()).or_insert(0.0) += value;
        }
        if let Some(margin) = source_margin {
            *cell.entry(SOURCE_MARGIN_FIELD.to_string()).or_insert(0.0) += margin;
        }
        if let Some(pct) = source_margin_pct.filter(|pct| *pct != 0.0) {
            if margin_pct_written.insert((row_key.clone(), period.clone())) {
                cell.insert(MARGIN_PCT_FIELD.to_string(), pct);
            }
        }

        diagnostics.records_folded += 1;
        Ok(())
    }

    /// Phase 1: every non-Total partition. Source-provided margins are trusted.
    fn derive_partition_margins(
        &self,
        table: &mut AggregateTable,
        diagnostics: &mut AggregationDiagnostics,
    ) {
        for (row_key, periods) in table.rows.iter_mut() {
            if row_key == TOTAL_ROW_KEY {
                continue;
            }
            for (period, values) in periods.iter_mut() {
                let (margin, margin_pct) = partition_margins(values);
                if margin.is_finite() && margin_pct.is_finite() {
                    values.insert(MARGIN_FIELD.to_string(), margin);
                    values.insert(MARGIN_PCT_FIELD.to_string(), margin_pct);
                } else {
                    warn!("Non-finite margin for row '{}' period '{}'", row_key, period);
                    diagnostics.faults.push(AggregationFault {
                        record_index: None,
                        row_key: Some(row_key.clone()),
                        period: Some(period.clone()),
                        reason: "derived margin is not finite".to_string(),
                    });
                }
            }
        }
    }

    /// Phase 2: the grand total is re-summed from the partitions and its margins are always
    /// computed, never taken from source data.
    fn derive_grand_total(&self, table: &mut AggregateTable, diagnostics: &mut AggregationDiagnostics) {
        let summed_fields: Vec<&String> = self
            .fields
            .iter()
            .filter(|field| field.as_str() != MARGIN_FIELD && field.as_str() != MARGIN_PCT_FIELD)
            .collect();

        let mut sums: IndexMap<String, PeriodValues> = IndexMap::new();
        for (row_key, periods) in &table.rows {
            if row_key == TOTAL_ROW_KEY {
                continue;
            }
            for (period, values) in periods {
                let target = sums.entry(period.clone()).or_default();
                for field in &summed_fields {
                    *target.entry((*field).clone()).or_insert(0.0) +=
                        values.get(*field).copied().unwrap_or(0.0);
                }
            }
        }

        table.ensure_row(TOTAL_ROW_KEY, &self.periods, &self.fields);
        let Some(total) = table.rows.get_mut(TOTAL_ROW_KEY) else {
            return;
        };

        for (period, values) in total.iter_mut() {
            if let Some(period_sums) = sums.get(period) {
                for (field, sum) in period_sums {
                    *values.entry(field.clone()).or_insert(0.0) += sum;
                }
            }

            let (margin, margin_pct) = computed_margins(values);
            if margin.is_finite() && margin_pct.is_finite() {
                values.insert(MARGIN_FIELD.to_string(), margin);
                values.insert(MARGIN_PCT_FIELD.to_string(), margin_pct);
            } else {
                warn!("Non-finite grand total margin for period '{}'", period);
                diagnostics.faults.push(AggregationFault {
                    record_index: None,
                    row_key: Some(TOTAL_ROW_KEY.to_string()),
                    period: Some(period.clone()),
                    reason: "derived grand total margin is not finite".to_string(),
                });
            }
        }
    }
}

fn revenue_and_expense(values: &PeriodValues) -> (f64, f64) {
    (
        values.get(TOTAL_REVENUE_FIELD).copied().unwrap_or(0.0),
        values.get(TOTAL_EXPENSE_FIELD).copied().unwrap_or(0.0),
    )
}

fn margin_pct_of(margin: f64, revenue: f64) -> f64 {
    if revenue != 0.0 {
        margin / revenue * 100.0
    } else {
        0.0
    }
}

/// Margin and margin % of one partition, preferring non-zero source figures.
/// Source percentages below 1 in magnitude are fractions and are scaled by 100.
fn partition_margins(values: &PeriodValues) -> (f64, f64) {
    let (revenue, expense) = revenue_and_expense(values);
    let source_margin = values.get(SOURCE_MARGIN_FIELD).copied().unwrap_or(0.0);
    let source_pct = values.get(MARGIN_PCT_FIELD).copied().unwrap_or(0.0);

    let margin = if source_margin != 0.0 {
        source_margin
    } else {
        revenue - expense
    };

    let margin_pct = if source_pct != 0.0 {
        if source_pct.abs() >= 1.0 {
            source_pct
        } else {
            source_pct * 100.0
        }
    } else {
        margin_pct_of(margin, revenue)
    };

    (margin, margin_pct)
}

fn computed_margins(values: &PeriodValues) -> (f64, f64) {
    let (revenue, expense) = revenue_and_expense(values);
    let margin = revenue - expense;
    (margin, margin_pct_of(margin, revenue))
}

/// Period label of a record: the `Quarter` column ignoring case, else any column whose
/// name contains "quarter".
pub fn record_period(record: &Record) -> Option<String> {
    let key = find_key_ignore_case(record, PERIOD_FIELD).or_else(|| {
        record
            .keys()
            .find(|key| key.to_lowercase().contains("quarter"))
            .map(String::as_str)
    })?;
    record.get(key)?.as_key()
}

/// Distinct period labels of the fact table, in chronological order.
pub fn discover_periods(fact_records: &[Record]) -> Vec<String> {
    let periods: IndexSet<String> = fact_records.iter().filter_map(record_period).collect();
    let mut periods: Vec<String> = periods.into_iter().collect();
    sort_periods(&mut periods);
    periods
}

fn row_key_from_tokens(tokens: &[String]) -> String {
    if tokens.is_empty() {
        TOTAL_ROW_KEY.to_string()
    } else {
        tokens.join(ROW_KEY_SEPARATOR)
    }
}

/// Row keys for the given per-dimension values: every distinct combination joined with
/// `" | "`, followed by `"Total"` exactly once. No values at all yields just `"Total"`.
pub fn enumerate_row_keys(dimension_values: &[Vec<String>]) -> Vec<String> {
    let mut keys: IndexSet<String> = CartesianProduct::new(dimension_values.iter().map(Vec::as_slice))
        .map(|combination| {
            combination
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(ROW_KEY_SEPARATOR)
        })
        .filter(|key| key != TOTAL_ROW_KEY)
        .collect();
    keys.insert(TOTAL_ROW_KEY.to_string());
    keys.into_iter().collect()
}

pub fn aggregate(
    line_items: &[LineItem],
    fact_records: &[Record],
    dimension_tables: &DimensionTables,
    selected_dimensions: &[String],
    selected_periods: &[String],
) -> AggregateTable {
    Aggregator::new(
        line_items,
        dimension_tables,
        selected_dimensions,
        selected_periods,
    )
    .run(fact_records)
    .table
}
