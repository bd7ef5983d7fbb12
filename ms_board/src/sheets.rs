//! Google Sheets v4 values API client.
//!
//! Authentication is out of band: the board reads an OAuth bearer token from
//! a file that an external helper keeps fresh.

use crate::{BoardError, StatusBoard, Table};
use log::debug;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";

pub struct SheetsBoard {
    client: Client,
    api_base: String,
    spreadsheet_id: String,
    token: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: [[&'a str; 1]; 1],
}

fn unavailable(what: &str, err: impl std::fmt::Display) -> BoardError {
    BoardError::Unavailable(format!("{what}: {err}"))
}

impl SheetsBoard {
    /// `timeout` bounds each request; None waits indefinitely.
    pub fn new(
        api_base: &str,
        spreadsheet_id: &str,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<SheetsBoard, BoardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unavailable("building HTTP client", e))?;
        Ok(SheetsBoard {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token: token.trim().to_string(),
        })
    }

    /// Construct with the bearer token read from `token_file`.
    pub fn from_token_file(
        api_base: &str,
        spreadsheet_id: &str,
        token_file: &Path,
        timeout: Option<Duration>,
    ) -> Result<SheetsBoard, BoardError> {
        let token = std::fs::read_to_string(token_file)
            .map_err(|e| unavailable(&format!("reading token {}", token_file.display()), e))?;
        Self::new(api_base, spreadsheet_id, &token, timeout)
    }

    fn values_url(&self, range: &str) -> Result<Url, BoardError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|_| BoardError::BadReference(self.api_base.clone()))?;
        url.path_segments_mut()
            .map_err(|()| BoardError::BadReference(self.api_base.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", range]);
        Ok(url)
    }
}

/// Cells come back as strings unless the sheet holds typed values.
fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl StatusBoard for SheetsBoard {
    fn fetch(&self, range: &str) -> Result<Table, BoardError> {
        let url = self.values_url(range)?;
        debug!("fetching {range}");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(&format!("fetch {range}"), e))?;
        let body: ValueRange = response
            .json()
            .map_err(|e| unavailable(&format!("decoding {range}"), e))?;
        let values = body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        Table::from_values(values).ok_or_else(|| BoardError::EmptyRange {
            range: range.to_string(),
        })
    }

    fn write_cell(&self, cell: &str, value: &str) -> Result<(), BoardError> {
        let mut url = self.values_url(cell)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        debug!("writing {cell} = {value:?}");
        let body = UpdateBody {
            range: cell,
            major_dimension: "ROWS",
            values: [[value]],
        };
        self.client
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(&format!("write {cell}"), e))?;
        Ok(())
    }
}
