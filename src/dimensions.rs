//! Joins fact records to their dimension tables.
//!
//! Fact records carry `<Name>ID` foreign keys; dimension tables are keyed by the same
//! synthesized IDs and live under `Dim_<Name>` or `DIM_<NAME>` depending on the workbook.

use crate::schema::{DimensionTables, Record};
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Dimensions whose foreign key does not follow the `<Name>ID` pattern, keyed by the
/// lower-cased compact dimension name.
const FOREIGN_KEY_EXCEPTIONS: [(&str, &str); 1] = [("lineofbusiness", "LOBID")];

/// Canonical display names for the exception keys above, used when discovering dimensions.
const EXCEPTION_DIMENSION_NAMES: [(&str, &str); 1] = [("LOBID", "LineOfBusiness")];

const LABEL_FIELD_HINTS: [&str; 3] = ["name", "description", "code"];

/// A logical grouping axis together with the column and table names it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub foreign_key: String,
    /// Mixed-case then all-caps table name, tried in that order.
    pub table_names: [String; 2],
}

impl Dimension {
    /// Builds the naming conventions for `name`, e.g. `"Cost Center"` becomes foreign key
    /// `CostCenterID` and tables `Dim_CostCenter` / `DIM_COSTCENTER`.
    pub fn named(name: &str) -> Self {
        let compact = compact_name(name);
        let lower = compact.to_lowercase();

        let foreign_key = FOREIGN_KEY_EXCEPTIONS
            .iter()
            .find(|(dimension, _)| *dimension == lower)
            .map(|(_, key)| key.to_string())
            .unwrap_or_else(|| format!("{}ID", compact));

        Self {
            name: name.trim().to_string(),
            foreign_key,
            table_names: [
                format!("Dim_{}", compact),
                format!("DIM_{}", compact.to_uppercase()),
            ],
        }
    }
}

/// `"line of business"` → `"LineOfBusiness"`; already compact names are kept as is.
fn compact_name(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// True for identifier columns (`ID`, `GeographyID`, `lob_id`).
pub fn is_id_field(name: &str) -> bool {
    name.trim().to_lowercase().ends_with("id")
}

pub struct DimensionJoiner<'a> {
    tables: &'a DimensionTables,
}

impl<'a> DimensionJoiner<'a> {
    pub fn new(tables: &'a DimensionTables) -> Self {
        Self { tables }
    }

    /// Looks up `record[foreign_key_field]` in `table_name`.
    ///
    /// Returns `None` when the key is absent or empty, the table does not exist, or the
    /// table has no row for the key.
    pub fn join(
        &self,
        record: &Record,
        foreign_key_field: &str,
        table_name: &str,
    ) -> Option<&'a Record> {
        let key = record.get(foreign_key_field)?.as_key()?;
        let table = self.tables.get(table_name)?;
        table.get(&key)
    }

    /// Joins through every table naming convention of `dimension`, first hit wins.
    pub fn join_dimension(&self, record: &Record, dimension: &Dimension) -> Option<&'a Record> {
        dimension
            .table_names
            .iter()
            .find_map(|table| self.join(record, &dimension.foreign_key, table))
    }

    /// Human readable value of a dimension record.
    ///
    /// Prefers a non-ID field whose name mentions name, description or code, then the first
    /// non-ID field. Empty values are skipped.
    pub fn display_value(dimension_record: &Record) -> Option<String> {
        let attributes = || {
            dimension_record
                .iter()
                .filter(|(field, _)| !is_id_field(field))
                .filter_map(|(field, value)| value.as_key().map(|v| (field, v)))
        };

        attributes()
            .find(|(field, _)| {
                let lower = field.to_lowercase();
                LABEL_FIELD_HINTS.iter().any(|hint| lower.contains(hint))
            })
            .or_else(|| attributes().next())
            .map(|(_, value)| value)
    }

    /// Row label token for `record` along `dimension`: the joined display value, or the raw
    /// foreign-key value when the join or display extraction fails.
    pub fn resolve_label(&self, record: &Record, dimension: &Dimension) -> Option<String> {
        let raw = record.get(&dimension.foreign_key)?.as_key()?;
        match self
            .join_dimension(record, dimension)
            .and_then(Self::display_value)
        {
            Some(label) => Some(label),
            None => {
                debug!(
                    "No display value for {} = {} in {:?}, using raw ID",
                    dimension.foreign_key, raw, dimension.table_names
                );
                Some(raw)
            }
        }
    }
}

/// Dimensions whose foreign keys appear in the fact table, in first-seen column order.
/// Each keeps the column it was discovered from as its foreign key.
pub fn discover_dimensions(fact_records: &[Record]) -> Vec<Dimension> {
    let mut columns: IndexMap<String, String> = IndexMap::new();

    for record in fact_records {
        for key in record.keys() {
            let key = key.trim();
            let name = if let Some((_, name)) = EXCEPTION_DIMENSION_NAMES
                .iter()
                .find(|(exception, _)| key.eq_ignore_ascii_case(exception))
            {
                name.to_string()
            } else if let Some(stem) = key.strip_suffix("ID") {
                let stem = stem.trim_end_matches('_');
                if stem.is_empty() {
                    continue;
                }
                stem.to_string()
            } else {
                continue;
            };
            columns.entry(name).or_insert_with(|| key.to_string());
        }
    }

    columns
        .into_iter()
        .map(|(name, column)| Dimension {
            foreign_key: column,
            ..Dimension::named(&name)
        })
        .collect()
}
