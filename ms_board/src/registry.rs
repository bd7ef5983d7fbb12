//! The sample registry: the board's sample list interpreted with the
//! configured column layout.

use crate::a1::ColumnRange;
use crate::{BoardError, StatusBoard, Table};
use log::debug;
use ms_types::{SampleIdentity, SampleStatus, SchemaProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where things live on the board. Header names are compared after
/// normalization, so `Sample ID` and `Sample_ID` are the same column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryLayout {
    pub list_range: String,
    pub project_header: String,
    pub sample_header: String,
    pub protocol_header: String,
    pub organism_header: String,
    pub status_header: String,
    pub uploaded_header: String,
    pub uploaded_value: String,
    pub profile: SchemaProfile,
}

impl Default for RegistryLayout {
    fn default() -> Self {
        RegistryLayout {
            list_range: "List!A:I".to_string(),
            project_header: "Project_title".to_string(),
            sample_header: "Sample_ID".to_string(),
            protocol_header: "Proteolysis_protocol".to_string(),
            organism_header: "Organism".to_string(),
            status_header: "Status".to_string(),
            uploaded_header: "Uploaded".to_string(),
            uploaded_value: "TRUE".to_string(),
            profile: SchemaProfile::Extended,
        }
    }
}

/// One sample row with every cell of the fetched range by header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRow {
    pub identity: SampleIdentity,
    pub cells: BTreeMap<String, String>,
}

impl RegistryRow {
    /// Cell by header name, "" when the column is absent.
    pub fn get(&self, header: &str) -> &str {
        self.cells
            .get(&crate::normalize_header(header))
            .map_or("", String::as_str)
    }
}

pub struct Registry {
    board: Box<dyn StatusBoard>,
    layout: RegistryLayout,
}

impl Registry {
    pub fn new(board: Box<dyn StatusBoard>, layout: RegistryLayout) -> Self {
        Registry { board, layout }
    }

    pub fn layout(&self) -> &RegistryLayout {
        &self.layout
    }

    pub fn board(&self) -> &dyn StatusBoard {
        self.board.as_ref()
    }

    fn required_column(&self, table: &Table, header: &str) -> Result<usize, BoardError> {
        table.column(header).ok_or_else(|| BoardError::MissingColumn {
            column: header.to_string(),
            range: self.layout.list_range.clone(),
        })
    }

    /// Every sample row of the current snapshot. Rows with an empty project or
    /// sample cell are skipped.
    pub fn rows(&self) -> Result<Vec<RegistryRow>, BoardError> {
        let table = self.board.fetch(&self.layout.list_range)?;
        let project_col = self.required_column(&table, &self.layout.project_header)?;
        let sample_col = self.required_column(&table, &self.layout.sample_header)?;
        let (protocol_col, organism_col) = match self.layout.profile {
            SchemaProfile::Minimal => (None, None),
            SchemaProfile::Extended => (
                Some(self.required_column(&table, &self.layout.protocol_header)?),
                Some(self.required_column(&table, &self.layout.organism_header)?),
            ),
        };

        let mut out = Vec::with_capacity(table.rows.len());
        for (i, row) in table.rows.iter().enumerate() {
            let project = table.cell(i, project_col).trim();
            let sample = table.cell(i, sample_col).trim();
            if project.is_empty() || sample.is_empty() {
                debug!("skipping registry row {} without project or sample", i + 2);
                continue;
            }
            let optional = |col: Option<usize>| {
                col.map(|c| table.cell(i, c).trim().to_string())
                    .filter(|v| !v.is_empty())
            };
            let identity = SampleIdentity {
                project: project.to_string(),
                sample: sample.to_string(),
                protocol: optional(protocol_col),
                organism: optional(organism_col),
            };
            let cells = table
                .header
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            out.push(RegistryRow { identity, cells });
        }
        Ok(out)
    }

    /// Rows whose upload flag is set.
    pub fn uploaded_rows(&self) -> Result<Vec<RegistryRow>, BoardError> {
        let header = &self.layout.uploaded_header;
        let value = &self.layout.uploaded_value;
        Ok(self
            .rows()?
            .into_iter()
            .filter(|r| r.get(header) == value)
            .collect())
    }

    pub fn set_status(&self, id: &SampleIdentity, status: &SampleStatus) -> Result<(), BoardError> {
        let status_header = self.layout.status_header.clone();
        self.set_column(id, &status_header, &status.to_string())
    }

    /// Write one cell of the row keyed by `(project, sample)`.
    ///
    /// The row is located with a fresh fetch and then written by address. The
    /// board offers no compare-and-set, so a concurrent insertion or reordering
    /// of rows between the two calls can redirect the write; two processes
    /// updating the same sample race and the last write wins.
    pub fn set_column(
        &self,
        id: &SampleIdentity,
        header: &str,
        value: &str,
    ) -> Result<(), BoardError> {
        let range = ColumnRange::parse(&self.layout.list_range)?;
        let table = self.board.fetch(&self.layout.list_range)?;
        let project_col = self.required_column(&table, &self.layout.project_header)?;
        let sample_col = self.required_column(&table, &self.layout.sample_header)?;
        let target_col = self.required_column(&table, header)?;

        let row = (0..table.rows.len())
            .find(|&i| {
                table.cell(i, project_col).trim() == id.project
                    && table.cell(i, sample_col).trim() == id.sample
            })
            .ok_or_else(|| BoardError::RowNotFound {
                project: id.project.clone(),
                sample: id.sample.clone(),
                range: self.layout.list_range.clone(),
            })?;

        // data row i sits below the header, on 1-based sheet row i + 2
        let cell = range.cell(target_col, row + 2);
        debug!("{id}: {header} -> {value:?} at {cell}");
        self.board.write_cell(&cell, value)
    }
}
