use indexmap::IndexMap;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static NUMERIC_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?(\d+\.?\d*|\.\d+)").expect("valid numeric prefix regex"));

/// A single spreadsheet cell as it arrives from the workbook parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Numeric reading of the cell.
    ///
    /// Numbers pass through when finite. Text keeps only digits, `.` and `-` and the
    /// longest leading numeric prefix is parsed, so `"$1,234.5"` reads as `1234.5`.
    /// Booleans, nulls and text without a numeric prefix read as `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(text) => {
                let stripped: String = text
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                let prefix = NUMERIC_PREFIX.find(&stripped)?;
                prefix
                    .as_str()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    /// String form used for lookups and labels. Empty text and nulls yield `None`.
    pub fn as_key(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::Number(n) => Some(format_number(*n)),
            CellValue::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_key().is_none()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write!(f, "{}", format_number(*n)),
            CellValue::Text(text) => write!(f, "{}", text),
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

/// Integral floats print without a fractional part so that `5.0` looks up key `"5"`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// One row of a fact, dimension or naming-convention sheet, in column order.
pub type Record = IndexMap<String, CellValue>;

/// Dimension ID → dimension record.
pub type DimensionTable = IndexMap<String, Record>;

/// Table name (e.g. `Dim_Geography`) → dimension table.
pub type DimensionTables = IndexMap<String, DimensionTable>;

/// Returns the first key of `record` equal to `name` ignoring ASCII case.
pub fn find_key_ignore_case<'a>(record: &'a Record, name: &str) -> Option<&'a str> {
    record
        .keys()
        .find(|key| key.trim().eq_ignore_ascii_case(name))
        .map(String::as_str)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Section {
    Revenue,
    Expenses,
    Margin,
}

/// One row (or section header) of the rendered P&L.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LineItem {
    pub label: String,
    pub field_name: String,
    /// 0 = section header, 1 = sub-total, 2 = detail.
    pub indent: u8,
    pub is_total: bool,
    pub is_margin: bool,
    pub section: Section,
}

impl LineItem {
    pub fn header(label: &str, field_name: &str, section: Section) -> Self {
        Self {
            label: label.to_string(),
            field_name: field_name.to_string(),
            indent: 0,
            is_total: true,
            is_margin: false,
            section,
        }
    }

    pub fn detail(label: String, field_name: String, indent: u8, section: Section) -> Self {
        Self {
            label,
            field_name,
            indent,
            is_total: false,
            is_margin: false,
            section,
        }
    }

    pub fn margin() -> Self {
        Self {
            label: "Margin".to_string(),
            field_name: crate::engine::MARGIN_FIELD.to_string(),
            indent: 0,
            is_total: true,
            is_margin: true,
            section: Section::Margin,
        }
    }

    pub fn margin_pct() -> Self {
        Self {
            label: "Margin %".to_string(),
            field_name: crate::engine::MARGIN_PCT_FIELD.to_string(),
            indent: 1,
            is_total: false,
            is_margin: true,
            section: Section::Margin,
        }
    }
}

fn default_low_confidence_threshold() -> f64 {
    0.5
}

/// What to aggregate: grouping dimensions and periods, plus resolver tuning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportRequest {
    #[serde(default)]
    #[schemars(
        description = "Dimensions to group by, in display order (e.g. 'Geography', 'CostCenter', 'LineOfBusiness'). Empty means a single 'Total' row."
    )]
    pub dimensions: Vec<String>,

    #[serde(default)]
    #[schemars(
        description = "Quarter labels to include exactly as they appear in the fact table's Quarter column (e.g. 'Q1-24')."
    )]
    pub periods: Vec<String>,

    #[serde(default = "default_low_confidence_threshold")]
    #[schemars(
        description = "Fuzzy matches with a confidence below this value are reported as low-confidence. Range 0.0 to 1.0."
    )]
    pub low_confidence_threshold: f64,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            dimensions: Vec::new(),
            periods: Vec::new(),
            low_confidence_threshold: default_low_confidence_threshold(),
        }
    }
}

impl ReportRequest {
    pub fn new(dimensions: &[&str], periods: &[&str]) -> Self {
        Self {
            dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
            periods: periods.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportRequest)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
