use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// ColumnData – the storage of one catalog column
// ---------------------------------------------------------------------------

/// Column storage mirroring the FITS binary-table types we care about.
///
/// Integer columns keep their raw bit pattern in an `i64`; flag tests
/// reinterpret it as `u64`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    /// Fixed-width integer arrays stored row-major (`width` values per row).
    IntArray { width: usize, values: Vec<i64> },
}

impl ColumnData {
    /// Number of rows held by this column.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::IntArray { width, values } => {
                if *width == 0 {
                    0
                } else {
                    values.len() / width
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type label used in schema errors and logs.
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Float(_) => ColumnKind::Float,
            ColumnData::Int(_) => ColumnKind::Int,
            ColumnData::IntArray { width, .. } => ColumnKind::IntArray(*width),
        }
    }

    /// Keep only the rows whose mask entry is `true`, preserving order.
    pub fn select(&self, keep: &[bool]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(select_rows(v, keep)),
            ColumnData::Int(v) => ColumnData::Int(select_rows(v, keep)),
            ColumnData::IntArray { width, values } => {
                let mut out = Vec::new();
                for (chunk, _) in values
                    .chunks_exact(*width)
                    .zip(keep)
                    .filter(|(_, k)| **k)
                {
                    out.extend_from_slice(chunk);
                }
                ColumnData::IntArray {
                    width: *width,
                    values: out,
                }
            }
        }
    }
}

fn select_rows<T: Copy>(values: &[T], keep: &[bool]) -> Vec<T> {
    values
        .iter()
        .zip(keep)
        .filter(|(_, k)| **k)
        .map(|(v, _)| *v)
        .collect()
}

/// The shape of a column, independent of its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Float,
    Int,
    IntArray(usize),
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Float => write!(f, "float"),
            ColumnKind::Int => write!(f, "int"),
            ColumnKind::IntArray(w) => write!(f, "int[{w}]"),
        }
    }
}

// ---------------------------------------------------------------------------
// Column – a named column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Column {
            name: name.into(),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog – the complete loaded table
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("column '{column}' has {rows} rows, expected {expected}")]
    RowCount {
        column: String,
        rows: usize,
        expected: usize,
    },

    #[error("column '{column}' has {values} values, not a multiple of width {width}")]
    RaggedArray {
        column: String,
        values: usize,
        width: usize,
    },
}

/// A column-oriented stellar catalog. All columns have the same number of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    columns: Vec<Column>,
    n_rows: usize,
    /// Set once the flag columns have been tested and projected away.
    pub flags_screened: bool,
}

impl Catalog {
    /// Build a catalog, checking that all columns agree on the row count.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, CatalogError> {
        let n_rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        for col in &columns {
            if let ColumnData::IntArray { width, values } = &col.data {
                if *width == 0 || values.len() % width != 0 {
                    return Err(CatalogError::RaggedArray {
                        column: col.name.clone(),
                        values: values.len(),
                        width: *width,
                    });
                }
            }
            if col.data.len() != n_rows {
                return Err(CatalogError::RowCount {
                    column: col.name.clone(),
                    rows: col.data.len(),
                    expected: n_rows,
                });
            }
        }
        Ok(Catalog {
            columns,
            n_rows,
            flags_screened: false,
        })
    }

    /// Number of rows (stars).
    pub fn len(&self) -> usize {
        self.n_rows
    }

    /// Whether the catalog has no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Ordered list of column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Rows whose mask entry is `true`, in their original order.
    pub fn select_rows(&self, keep: &[bool]) -> Catalog {
        debug_assert_eq!(keep.len(), self.n_rows);
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.data.select(keep)))
            .collect();
        Catalog {
            columns,
            n_rows: keep.iter().filter(|k| **k).count(),
            flags_screened: self.flags_screened,
        }
    }

    /// A copy of the catalog without the named columns.
    pub fn without_columns(&self, names: &[&str]) -> Catalog {
        Catalog {
            columns: self
                .columns
                .iter()
                .filter(|c| !names.contains(&c.name.as_str()))
                .cloned()
                .collect(),
            n_rows: self.n_rows,
            flags_screened: self.flags_screened,
        }
    }
}
