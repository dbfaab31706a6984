use crate::engine::{
    AggregateTable, AggregationOutcome, PeriodValues, MARGIN_FIELD, MARGIN_PCT_FIELD,
    SOURCE_MARGIN_FIELD, TOTAL_ROW_KEY,
};
use crate::error::{ReportError, Result};
use crate::naming::{TOTAL_EXPENSE_FIELD, TOTAL_REVENUE_FIELD};
use crate::schema::LineItem;
use log::debug;

/// Checks the arithmetic of an aggregation outcome after the fact.
pub struct ReportVerifier<'a> {
    line_items: &'a [LineItem],
    outcome: &'a AggregationOutcome,
}

impl<'a> ReportVerifier<'a> {
    pub fn new(line_items: &'a [LineItem], outcome: &'a AggregationOutcome) -> Self {
        Self {
            line_items,
            outcome,
        }
    }

    pub fn verify(&self, tolerance: f64) -> Result<()> {
        let table = &self.outcome.table;

        for (row_key, periods) in table.rows() {
            for (period, values) in periods {
                if row_key == TOTAL_ROW_KEY {
                    self.verify_total_margins(period, values, tolerance)?;
                } else {
                    self.verify_partition_margin(row_key, period, values, tolerance)?;
                }
            }
        }

        let partition_count = table.row_keys().filter(|key| *key != TOTAL_ROW_KEY).count();
        if partition_count > 0 && self.outcome.diagnostics.records_folded_into_total == 0 {
            self.verify_total_is_sum_of_partitions(table, tolerance)?;
        } else {
            debug!("Skipping partition sum check ({} partitions)", partition_count);
        }

        Ok(())
    }

    /// A partition without a source margin must carry `revenue - expense`.
    fn verify_partition_margin(
        &self,
        row_key: &str,
        period: &str,
        values: &PeriodValues,
        tolerance: f64,
    ) -> Result<()> {
        if field(values, SOURCE_MARGIN_FIELD) != 0.0 {
            return Ok(());
        }
        let expected = field(values, TOTAL_REVENUE_FIELD) - field(values, TOTAL_EXPENSE_FIELD);
        check(row_key, period, MARGIN_FIELD, expected, field(values, MARGIN_FIELD), tolerance)
    }

    fn verify_total_margins(&self, period: &str, values: &PeriodValues, tolerance: f64) -> Result<()> {
        let revenue = field(values, TOTAL_REVENUE_FIELD);
        let margin = revenue - field(values, TOTAL_EXPENSE_FIELD);
        check(
            TOTAL_ROW_KEY,
            period,
            MARGIN_FIELD,
            margin,
            field(values, MARGIN_FIELD),
            tolerance,
        )?;

        let margin_pct = if revenue != 0.0 {
            margin / revenue * 100.0
        } else {
            0.0
        };
        check(
            TOTAL_ROW_KEY,
            period,
            MARGIN_PCT_FIELD,
            margin_pct,
            field(values, MARGIN_PCT_FIELD),
            tolerance,
        )
    }

    fn verify_total_is_sum_of_partitions(&self, table: &AggregateTable, tolerance: f64) -> Result<()> {
        let Some(total) = table.row(TOTAL_ROW_KEY) else {
            return Err(ReportError::VerificationFailed {
                row: TOTAL_ROW_KEY.to_string(),
                period: String::new(),
                details: "grand total row is missing".to_string(),
            });
        };

        for (period, total_values) in total {
            for item in self.line_items.iter().filter(|item| !item.is_margin) {
                let partition_sum: f64 = table
                    .rows()
                    .filter(|(key, _)| *key != TOTAL_ROW_KEY)
                    .filter_map(|(_, periods)| periods.get(period))
                    .map(|values| field(values, &item.field_name))
                    .sum();
                check(
                    TOTAL_ROW_KEY,
                    period,
                    &item.field_name,
                    partition_sum,
                    field(total_values, &item.field_name),
                    tolerance,
                )?;
            }
        }

        Ok(())
    }
}

fn field(values: &PeriodValues, name: &str) -> f64 {
    values.get(name).copied().unwrap_or(0.0)
}

fn check(
    row: &str,
    period: &str,
    field_name: &str,
    expected: f64,
    actual: f64,
    tolerance: f64,
) -> Result<()> {
    let difference = (expected - actual).abs();
    if difference > tolerance {
        return Err(ReportError::VerificationFailed {
            row: row.to_string(),
            period: period.to_string(),
            details: format!(
                "{} is {} but should be {} (difference {})",
                field_name, actual, expected, difference
            ),
        });
    }
    Ok(())
}

pub fn verify_report(
    line_items: &[LineItem],
    outcome: &AggregationOutcome,
    tolerance: f64,
) -> Result<()> {
    ReportVerifier::new(line_items, outcome).verify(tolerance)
}
