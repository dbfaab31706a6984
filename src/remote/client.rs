use crate::error::{ReportError, Result};
use crate::ingestion::{StoredWorkbook, WorkbookData};
use crate::remote::types::{StoreRequest, StoreResponse};
use log::{debug, info};
use reqwest::Client;

const EXCEL_DATA_PATH: &str = "/api/excel-data";

/// Client for the workbook persistence endpoint. One request per call, no retries.
#[derive(Clone)]
pub struct ExcelDataClient {
    client: Client,
    base_url: String,
}

impl ExcelDataClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, EXCEL_DATA_PATH)
    }

    /// The stored workbook, or `None` when nothing has been uploaded yet.
    pub async fn fetch(&self) -> Result<Option<WorkbookData>> {
        let url = self.endpoint();
        debug!("Fetching workbook from {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ReportError::Transport(format!(
                "GET {} failed (status {}): {}",
                url, status, body
            )));
        }

        let stored = StoredWorkbook::from_json(&body)?;
        if stored.data.is_none() {
            info!("No workbook stored at {}", url);
        }
        Ok(stored.data)
    }

    pub async fn store(&self, data: &WorkbookData) -> Result<()> {
        let url = self.endpoint();
        debug!(
            "Storing workbook with {} fact records to {}",
            data.fact_margin_records.len(),
            url
        );

        let response = self
            .client
            .post(&url)
            .json(&StoreRequest { data })
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: Option<StoreResponse> = serde_json::from_str(&body).ok();
        if !status.is_success() {
            let message = parsed
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(ReportError::Transport(format!(
                "POST {} failed (status {}): {}",
                url, status, message
            )));
        }

        match parsed {
            Some(response) => response.into_result(),
            None => Err(ReportError::Transport(format!(
                "POST {} returned an unreadable body: {}",
                url, body
            ))),
        }
    }
}
