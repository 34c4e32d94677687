use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, FixedSizeListBuilder, Float64Array, Int64Array, Int64Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use super::model::{Catalog, ColumnData};

/// Schema metadata key recording that flag columns were already screened.
pub const SCREENED_KEY: &str = "quality_screened";

/// Convert a catalog into a single Arrow record batch.
///
/// Float columns map to `Float64`, integers to `Int64`, and flag arrays to
/// `FixedSizeList<Int64>`.
pub fn to_record_batch(catalog: &Catalog) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(catalog.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(catalog.columns().len());

    for col in catalog.columns() {
        match &col.data {
            ColumnData::Float(v) => {
                fields.push(Field::new(&col.name, DataType::Float64, false));
                arrays.push(Arc::new(Float64Array::from(v.clone())));
            }
            ColumnData::Int(v) => {
                fields.push(Field::new(&col.name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from(v.clone())));
            }
            ColumnData::IntArray { width, values } => {
                let mut builder = FixedSizeListBuilder::new(
                    Int64Builder::with_capacity(values.len()),
                    *width as i32,
                );
                for chunk in values.chunks_exact(*width) {
                    builder.values().append_slice(chunk);
                    builder.append(true);
                }
                let item = Arc::new(Field::new("item", DataType::Int64, true));
                fields.push(Field::new(
                    &col.name,
                    DataType::FixedSizeList(item, *width as i32),
                    false,
                ));
                arrays.push(Arc::new(builder.finish()));
            }
        }
    }

    let metadata = HashMap::from([(
        SCREENED_KEY.to_string(),
        catalog.flags_screened.to_string(),
    )]);
    let schema = Arc::new(Schema::new_with_metadata(fields, metadata));
    let options = RecordBatchOptions::new().with_row_count(Some(catalog.len()));
    RecordBatch::try_new_with_options(schema, arrays, &options)
        .context("assembling record batch")
}

/// Write the catalog as one Snappy-compressed Parquet file.
///
/// An empty catalog still produces a valid file with the full schema.
pub fn write_parquet(catalog: &Catalog, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let batch = to_record_batch(catalog)?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;

    log::info!("Wrote {} rows to {}", catalog.len(), path.display());
    Ok(())
}
