//! Jupyter notebook data model
//!
//! Parses the nbformat JSON a student submits and renders it as the plain-text
//! prompt the judging model sees. Cells are addressed by their stable 0-based
//! index; the notebook is immutable once loaded for a job.

use serde::Deserialize;

/// A parsed notebook: the ordered cell list of an nbformat document.
///
/// Only the fields the grader needs are kept; everything else in the
/// submission JSON is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
}

/// One notebook cell.
#[derive(Debug, Clone, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    pub source: CellSource,
    /// Execution count from the student's own run, if any.
    #[serde(default)]
    pub execution_count: Option<i64>,
}

/// Cell kind. nbformat also allows `raw` and future kinds; anything that is
/// not markdown or code folds into `Other` and is never executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Markdown,
    Code,
    #[serde(other)]
    Other,
}

impl CellType {
    /// Label used when rendering the notebook as prompt text.
    pub fn label(&self) -> &'static str {
        match self {
            CellType::Markdown => "markdown",
            CellType::Code => "code",
            CellType::Other => "raw",
        }
    }
}

/// Cell source as stored in nbformat: either a single string or an array of
/// line strings (line breaks included in the lines).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CellSource {
    Text(String),
    Lines(Vec<String>),
}

impl CellSource {
    /// The cell source as one joined string.
    pub fn text(&self) -> String {
        match self {
            CellSource::Text(s) => s.clone(),
            CellSource::Lines(lines) => lines.concat(),
        }
    }
}

impl Cell {
    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }
}

impl Notebook {
    /// Parse a notebook from its JSON text.
    ///
    /// Called at the upload boundary; the core never sees an invalid notebook.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Render the notebook as the plain-text representation the judging model
    /// is prompted with: index, type and source per cell, newline-joined.
    pub fn render_prompt(&self) -> String {
        self.cells
            .iter()
            .enumerate()
            .map(|(index, cell)| {
                format!(
                    "CELL {} [{}]:\n{}\n",
                    index,
                    cell.cell_type.label(),
                    cell.source.text()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
