use crate::error::{ReportError, Result};
use crate::ingestion::WorkbookData;
use serde::{Deserialize, Serialize};

/// Request body of `POST /api/excel-data`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreRequest<'a> {
    pub data: &'a WorkbookData,
}

/// Response body of `POST /api/excel-data`: `{ "success": true }` or `{ "error": "..." }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl StoreResponse {
    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(error) => Err(ReportError::Transport(error)),
            None if self.success => Ok(()),
            None => Err(ReportError::Transport(
                "store response reported neither success nor an error".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_response_outcomes() {
        let ok: StoreResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(ok.into_result().is_ok());

        let failed: StoreResponse =
            serde_json::from_str(r#"{"error": "Failed to store data"}"#).unwrap();
        match failed.into_result() {
            Err(ReportError::Transport(message)) => assert_eq!(message, "Failed to store data"),
            other => panic!("expected transport error, got {:?}", other),
        }

        let empty: StoreResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.into_result().is_err());
    }

    #[test]
    fn test_store_request_wraps_payload() {
        let data = WorkbookData::default();
        let body = serde_json::to_value(StoreRequest { data: &data }).unwrap();
        assert!(body["data"]["factMarginRecords"].is_array());
    }
}
