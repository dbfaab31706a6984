//! Deserialization of the persisted workbook payload.
//!
//! The storage endpoint keeps the parsed workbook as an opaque JSON blob. Fact and
//! naming-convention sheets are arrays of records; dimension tables are a mapping of
//! mappings which may arrive either as nested objects or as serialized `Map` entries
//! (`[[key, value], ...]`) at either level.

use crate::error::{ReportError, Result};
use crate::schema::{format_number, DimensionTables, Record};
use indexmap::IndexMap;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

/// The in-memory tables produced by the workbook parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookData {
    #[serde(default)]
    pub fact_margin_records: Vec<Record>,

    #[serde(default, deserialize_with = "deserialize_dimension_tables")]
    #[schemars(with = "IndexMap<String, IndexMap<String, Record>>")]
    pub dimension_tables: DimensionTables,

    #[serde(default)]
    pub naming_convention_records: Vec<Record>,
}

/// Body of `GET /api/excel-data` and `POST /api/excel-data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredWorkbook {
    pub data: Option<WorkbookData>,
}

impl WorkbookData {
    pub fn new(
        fact_margin_records: Vec<Record>,
        dimension_tables: DimensionTables,
        naming_convention_records: Vec<Record>,
    ) -> Self {
        Self {
            fact_margin_records,
            dimension_tables,
            naming_convention_records,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(ReportError::MalformedWorkbook(format!(
                "expected an object with factMarginRecords, dimensionTables and namingConventionRecords, got {}",
                json_kind(&value)
            )));
        }
        let data: WorkbookData = serde_json::from_value(value)?;
        info!(
            "Loaded workbook: {} fact records, {} dimension tables, {} naming convention rows",
            data.fact_margin_records.len(),
            data.dimension_tables.len(),
            data.naming_convention_records.len()
        );
        for (name, table) in &data.dimension_tables {
            debug!("Dimension table '{}' has {} entries", name, table.len());
        }
        Ok(data)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(WorkbookData)
    }

    pub fn is_empty(&self) -> bool {
        self.fact_margin_records.is_empty()
            && self.dimension_tables.is_empty()
            && self.naming_convention_records.is_empty()
    }
}

impl StoredWorkbook {
    /// Parses an endpoint body. A `null` or missing `data` means nothing was stored yet.
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: StoredEnvelope = serde_json::from_str(json)?;
        let data = match envelope.data {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(WorkbookData::from_value(value)?),
        };
        Ok(Self { data })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
struct StoredEnvelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Map keys written by spreadsheet parsers are sometimes numeric IDs.
#[derive(Deserialize)]
#[serde(untagged)]
enum MapKey {
    Text(String),
    Number(f64),
}

impl MapKey {
    fn into_string(self) -> String {
        match self {
            MapKey::Text(text) => text,
            MapKey::Number(n) => format_number(n),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MapShape<T> {
    Object(IndexMap<String, T>),
    Entries(Vec<(MapKey, T)>),
}

impl<T> MapShape<T> {
    fn into_map(self) -> IndexMap<String, T> {
        match self {
            MapShape::Object(map) => map,
            MapShape::Entries(entries) => entries
                .into_iter()
                .map(|(key, value)| (key.into_string(), value))
                .collect(),
        }
    }
}

fn deserialize_dimension_tables<'de, D>(deserializer: D) -> std::result::Result<DimensionTables, D::Error>
where
    D: Deserializer<'de>,
{
    let outer: Option<MapShape<MapShape<Record>>> = Option::deserialize(deserializer)?;
    Ok(outer
        .map(MapShape::into_map)
        .unwrap_or_default()
        .into_iter()
        .map(|(name, table)| (name, table.into_map()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CellValue;

    #[test]
    fn test_object_shaped_payload() {
        let json = r#"{
            "factMarginRecords": [{"Quarter": "Q1-24", "LOBID": 5, "TotalRevenue_$mm": 100}],
            "dimensionTables": {"Dim_LineOfBusiness": {"5": {"LineOfBusiness": "Retail"}}},
            "namingConventionRecords": [{"Category": "Financial Result"}]
        }"#;
        let data = WorkbookData::from_json(json).unwrap();
        assert_eq!(data.fact_margin_records.len(), 1);
        assert_eq!(
            data.fact_margin_records[0]["TotalRevenue_$mm"],
            CellValue::Number(100.0)
        );
        assert_eq!(
            data.dimension_tables["Dim_LineOfBusiness"]["5"]["LineOfBusiness"],
            CellValue::from("Retail")
        );
        assert_eq!(data.naming_convention_records.len(), 1);
    }

    #[test]
    fn test_map_entries_payload() {
        let json = r#"{
            "factMarginRecords": [],
            "dimensionTables": [
                ["Dim_Geography", [[1, {"GeographyName": "EMEA"}], ["2", {"GeographyName": "APAC"}]]],
                ["DIM_COSTCENTER", {"7": {"CostCenterCode": "CC-7"}}]
            ]
        }"#;
        let data = WorkbookData::from_json(json).unwrap();
        let geography = &data.dimension_tables["Dim_Geography"];
        assert_eq!(geography.keys().collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(
            data.dimension_tables["DIM_COSTCENTER"]["7"]["CostCenterCode"],
            CellValue::from("CC-7")
        );
        assert!(data.naming_convention_records.is_empty());
    }

    #[test]
    fn test_round_trip_keeps_order() {
        let json = r#"{"factMarginRecords":[{"Quarter":"Q1-24","B":1.5,"A":2.25,"Note":null}],"dimensionTables":{},"namingConventionRecords":[]}"#;
        let data = WorkbookData::from_json(json).unwrap();
        assert_eq!(data.to_json().unwrap(), json);
    }

    #[test]
    fn test_stored_envelope() {
        let empty = StoredWorkbook::from_json(r#"{"data": null}"#).unwrap();
        assert!(empty.data.is_none());
        let missing = StoredWorkbook::from_json("{}").unwrap();
        assert!(missing.data.is_none());

        let stored =
            StoredWorkbook::from_json(r#"{"data": {"factMarginRecords": [{"Quarter": "Q1-24"}]}}"#)
                .unwrap();
        assert_eq!(stored.data.unwrap().fact_margin_records.len(), 1);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            WorkbookData::from_json("[1, 2]"),
            Err(ReportError::MalformedWorkbook(_))
        ));
        assert!(matches!(
            WorkbookData::from_json("{not json"),
            Err(ReportError::SerializationError(_))
        ));
        assert!(matches!(
            StoredWorkbook::from_json(r#"{"data": "oops"}"#),
            Err(ReportError::MalformedWorkbook(_))
        ));
    }

    #[test]
    fn test_schema_mentions_tables() {
        let schema = serde_json::to_string(&WorkbookData::generate_json_schema()).unwrap();
        assert!(schema.contains("factMarginRecords"));
        assert!(schema.contains("dimensionTables"));
    }
}
