use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

/// Rows handed over by the tabular ingestion collaborator. Each row is a
/// JSON object keyed by column name; how the file was parsed is not our
/// concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabularBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl TabularBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Map<String, Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Which columns hold the address parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl ColumnMapping {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            city: None,
            state: None,
            postal_code: None,
        }
    }

    pub fn with_city(mut self, column: impl Into<String>) -> Self {
        self.city = Some(column.into());
        self
    }

    pub fn with_state(mut self, column: impl Into<String>) -> Self {
        self.state = Some(column.into());
        self
    }

    pub fn with_postal_code(mut self, column: impl Into<String>) -> Self {
        self.postal_code = Some(column.into());
        self
    }

    pub fn validate(&self, columns: &[String]) -> AppResult<()> {
        if self.address.trim().is_empty() {
            return Err(AppError::Config("address column must be selected".into()));
        }
        for column in self.mapped_columns() {
            if !columns.iter().any(|c| c == column) {
                return Err(AppError::MissingColumn(column.to_string()));
            }
        }
        Ok(())
    }

    pub fn extract(&self, index: usize, row: &Map<String, Value>) -> RawRecord {
        let passthrough = row
            .iter()
            .filter(|(key, _)| !self.mapped_columns().any(|column| column == key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        RawRecord {
            index,
            address: cell_text(row.get(&self.address)),
            city: self.city.as_ref().and_then(|c| cell_text(row.get(c))),
            state: self.state.as_ref().and_then(|c| cell_text(row.get(c))),
            postal_code: self.postal_code.as_ref().and_then(|c| cell_text(row.get(c))),
            passthrough,
        }
    }

    fn mapped_columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.address.as_str())
            .chain(self.city.as_deref())
            .chain(self.state.as_deref())
            .chain(self.postal_code.as_deref())
    }
}

/// One input row. Never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub index: usize,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    #[serde(default)]
    pub passthrough: Map<String, Value>,
}

impl RawRecord {
    pub fn new(index: usize, address: impl Into<String>) -> Self {
        Self {
            index,
            address: Some(address.into()),
            city: None,
            state: None,
            postal_code: None,
            passthrough: Map::new(),
        }
    }
}

pub fn records_from_batch(
    batch: &TabularBatch,
    mapping: &ColumnMapping,
) -> AppResult<Vec<RawRecord>> {
    mapping.validate(&batch.columns)?;
    Ok(batch
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| mapping.extract(index, row))
        .collect())
}

/// Spreadsheet exports often carry postal codes as floats (`40111.0`), so
/// integral numbers lose their fractional part here.
fn cell_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(int), _) => int.to_string(),
            (None, Some(float)) if float.fract() == 0.0 && float.abs() < 1e15 => {
                format!("{}", float as i64)
            }
            _ => number.to_string(),
        },
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(text)
    }
}
