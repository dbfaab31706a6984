//! # Margin Report Builder
//!
//! A library for turning a parsed financial workbook (a fact table of margin records,
//! a set of dimension lookup tables and a naming-convention sheet) into hierarchical
//! P&L aggregates grouped by any combination of dimensions and quarters.
//!
//! ## Core Concepts
//!
//! - **Fact Table**: One record per entity and quarter, with numeric `_$mm` columns and
//!   `<Dimension>ID` foreign keys
//! - **Dimension Tables**: `Dim_<Name>` lookups from synthesized IDs to display values
//! - **Naming Convention**: Rows describing each fact column and its P&L impact, from which
//!   the line-item hierarchy is derived
//! - **Fuzzy Resolution**: Line-item labels are matched to fact columns through a cascade of
//!   increasingly lenient strategies, each with a confidence score
//! - **Grand Total Integrity**: Partitions may carry source-provided margins, but the
//!   `Total` row is always re-summed and its margins recomputed
//!
//! ## Example
//!
//! ```rust,ignore
//! use margin_report_builder::*;
//!
//! let data = WorkbookData::from_json(&std::fs::read_to_string("workbook.json")?)?;
//! let request = ReportRequest::new(&["Geography", "LineOfBusiness"], &["Q1-24", "Q2-24"]);
//!
//! let report = build_report(&data, &request)?;
//! for row_key in &report.outcome.row_keys {
//!     let statement = report.statement(row_key).unwrap();
//!     println!("{}", statement.to_markdown());
//! }
//! ```

pub mod dimensions;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod naming;
pub mod resolver;
pub mod schema;
pub mod statement;
pub mod utils;
pub mod verification;

#[cfg(feature = "remote")]
pub mod remote;

pub use dimensions::{discover_dimensions, Dimension, DimensionJoiner};
pub use engine::{
    aggregate, discover_periods, AggregateTable, AggregationDiagnostics, AggregationOutcome,
    Aggregator,
};
pub use error::{ReportError, Result};
pub use ingestion::*;
pub use naming::{build_line_items, build_schema, LineItemSchema, PnlImpact};
pub use resolver::{resolve, resolve_value, FieldMatch, MatchStrategy, Resolution};
pub use schema::*;
pub use statement::{PnlStatement, Trend};
pub use utils::*;
pub use verification::{verify_report, ReportVerifier};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Whether a workbook can produce a report, and if not, what is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReportReadiness {
    /// Nothing has been uploaded.
    NoWorkbook,
    /// The naming-convention sheet is empty.
    NoNamingConvention,
    /// The naming-convention sheet has no column naming fact fields.
    NoNamingColumn,
    /// No row survived the "Financial Result" category filter.
    NoFinancialResultRows,
    /// The fact table has no quarter labels.
    NoQuarters,
    Ready {
        periods: Vec<String>,
        line_items: Vec<LineItem>,
    },
}

impl ReportReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReportReadiness::Ready { .. })
    }
}

pub fn assess_readiness(data: Option<&WorkbookData>) -> ReportReadiness {
    let Some(data) = data else {
        return ReportReadiness::NoWorkbook;
    };
    if data.naming_convention_records.is_empty() {
        return ReportReadiness::NoNamingConvention;
    }

    let schema = build_schema(&data.naming_convention_records);
    if schema.columns.naming.is_none() {
        return ReportReadiness::NoNamingColumn;
    }
    if schema.retained_rows == 0 || schema.is_empty() {
        return ReportReadiness::NoFinancialResultRows;
    }

    let periods = discover_periods(&data.fact_margin_records);
    if periods.is_empty() {
        return ReportReadiness::NoQuarters;
    }

    ReportReadiness::Ready {
        periods,
        line_items: schema.items,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlReport {
    pub schema: LineItemSchema,
    pub periods: Vec<String>,
    pub outcome: AggregationOutcome,
}

impl PnlReport {
    pub fn statement(&self, row_key: &str) -> Option<PnlStatement> {
        PnlStatement::build(&self.schema.items, &self.outcome.table, row_key, &self.periods)
    }

    pub fn total_statement(&self) -> Option<PnlStatement> {
        self.statement(engine::TOTAL_ROW_KEY)
    }
}

pub struct ReportBuilder;

impl ReportBuilder {
    pub fn build(data: &WorkbookData, request: &ReportRequest) -> Result<PnlReport> {
        validate_request(request)?;

        info!(
            "Building report for {} dimensions over {} periods",
            request.dimensions.len(),
            request.periods.len()
        );
        debug!("Dimensions: {:?}, periods: {:?}", request.dimensions, request.periods);

        let schema = build_schema(&data.naming_convention_records);
        if schema.is_empty() {
            warn!("No line items could be derived from the naming convention sheet");
        }
        for field in &schema.unclassified {
            debug!("Unclassified field treated as expense: {}", field);
        }

        let periods: Vec<String> = request.periods.iter().map(|p| p.trim().to_string()).collect();
        let outcome = Aggregator::new(
            &schema.items,
            &data.dimension_tables,
            &request.dimensions,
            &periods,
        )
        .with_low_confidence_threshold(request.low_confidence_threshold)
        .run(&data.fact_margin_records);

        if !outcome.diagnostics.faults.is_empty() {
            for fault in &outcome.diagnostics.faults {
                debug!("Aggregation fault: {:?}", fault);
            }
        }

        Ok(PnlReport {
            schema,
            periods,
            outcome,
        })
    }

    pub fn build_with_verification(
        data: &WorkbookData,
        request: &ReportRequest,
        tolerance: f64,
    ) -> Result<PnlReport> {
        let report = Self::build(data, request)?;

        verify_report(&report.schema.items, &report.outcome, tolerance)?;

        Ok(report)
    }
}

pub fn build_report(data: &WorkbookData, request: &ReportRequest) -> Result<PnlReport> {
    ReportBuilder::build(data, request)
}

pub fn build_report_with_verification(
    data: &WorkbookData,
    request: &ReportRequest,
    tolerance: f64,
) -> Result<PnlReport> {
    ReportBuilder::build_with_verification(data, request, tolerance)
}

fn validate_request(request: &ReportRequest) -> Result<()> {
    for dimension in &request.dimensions {
        if !dimension.chars().any(|c| c.is_alphanumeric()) {
            return Err(ReportError::InvalidDimension(dimension.clone()));
        }
    }

    for period in &request.periods {
        if period.trim().is_empty() {
            return Err(ReportError::InvalidPeriod(period.clone()));
        }
    }

    let threshold = request.low_confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ReportError::InvalidConfidenceThreshold(threshold));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming_row(name: &str, impact: &str) -> Record {
        let mut row = Record::new();
        row.insert("Category".into(), CellValue::from("Financial Result"));
        row.insert("Fact_Margin naming".into(), CellValue::from(name));
        row.insert("P&L Impact".into(), CellValue::from(impact));
        row
    }

    fn workbook() -> WorkbookData {
        let mut fact = Record::new();
        fact.insert("Quarter".into(), CellValue::from("Q1-24"));
        fact.insert("TotalRevenue_$mm".into(), CellValue::Number(100.0));
        fact.insert("TotalExpense_$mm".into(), CellValue::Number(60.0));

        WorkbookData::new(
            vec![fact],
            DimensionTables::new(),
            vec![
                naming_row("TotalRevenue_$mm", "Revenue"),
                naming_row("TotalExpense_$mm", "Expense"),
            ],
        )
    }

    #[test]
    fn test_end_to_end_total_only() {
        let report = build_report(&workbook(), &ReportRequest::new(&[], &["Q1-24"])).unwrap();

        assert_eq!(report.outcome.row_keys, vec!["Total"]);
        let table = &report.outcome.table;
        assert_eq!(table.get("Total", "Q1-24", "Margin"), Some(40.0));
        assert_eq!(table.get("Total", "Q1-24", "MarginPct"), Some(40.0));

        let statement = report.total_statement().unwrap();
        assert_eq!(statement.value("TotalRevenue_$mm", "Q1-24"), Some(100.0));
    }

    #[test]
    fn test_request_validation() {
        let data = workbook();

        let bad_dimension = ReportRequest::new(&["  "], &["Q1-24"]);
        assert!(matches!(
            build_report(&data, &bad_dimension),
            Err(ReportError::InvalidDimension(_))
        ));

        let bad_period = ReportRequest::new(&[], &[""]);
        assert!(matches!(
            build_report(&data, &bad_period),
            Err(ReportError::InvalidPeriod(_))
        ));

        let mut bad_threshold = ReportRequest::new(&[], &["Q1-24"]);
        bad_threshold.low_confidence_threshold = 1.5;
        assert!(matches!(
            build_report(&data, &bad_threshold),
            Err(ReportError::InvalidConfidenceThreshold(_))
        ));

        bad_threshold.low_confidence_threshold = f64::NAN;
        assert!(build_report(&data, &bad_threshold).is_err());
    }

    #[test]
    fn test_build_with_verification() {
        let report =
            build_report_with_verification(&workbook(), &ReportRequest::new(&[], &["Q1-24"]), 1e-9);
        assert!(report.is_ok());
    }

    #[test]
    fn test_readiness_states() {
        assert_eq!(assess_readiness(None), ReportReadiness::NoWorkbook);

        let mut data = workbook();
        assert!(assess_readiness(Some(&data)).is_ready());

        data.fact_margin_records.clear();
        assert_eq!(assess_readiness(Some(&data)), ReportReadiness::NoQuarters);

        let mut other_category = workbook();
        for row in &mut other_category.naming_convention_records {
            row.insert("Category".into(), CellValue::from("Driver"));
        }
        assert_eq!(
            assess_readiness(Some(&other_category)),
            ReportReadiness::NoFinancialResultRows
        );

        let mut no_column = workbook();
        for row in &mut no_column.naming_convention_records {
            row.shift_remove("Fact_Margin naming");
        }
        assert_eq!(
            assess_readiness(Some(&no_column)),
            ReportReadiness::NoNamingColumn
        );

        let mut no_naming = workbook();
        no_naming.naming_convention_records.clear();
        assert_eq!(
            assess_readiness(Some(&no_naming)),
            ReportReadiness::NoNamingConvention
        );
    }

    #[test]
    fn test_request_schema() {
        let json = ReportRequest::schema_as_json().unwrap();
        assert!(json.contains("low_confidence_threshold"));
        assert!(json.contains("dimensions"));
    }
}
