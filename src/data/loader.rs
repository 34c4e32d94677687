use std::path::Path;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type, Schema, UInt64Type};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::fits;
use super::model::{Catalog, Column, ColumnData};
use super::rules::QualityRules;
use super::writer::SCREENED_KEY;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load the named columns of a catalog file.  Dispatch by extension.
///
/// Supported formats:
/// * `.fits` / `.fit` – binary table in HDU `hdu` (APOGEE `allStar` files use 1)
/// * `.parquet`       – flat numeric columns, flag arrays as (fixed-size) lists
/// * `.csv`           – header row; flag arrays as semicolon-separated integers
///
/// An empty `columns` slice loads every column (Parquet and CSV only).
pub fn load_catalog(path: &Path, columns: &[&str], hdu: usize) -> Result<Catalog> {
    let catalog = match extension(path).as_str() {
        "fits" | "fit" | "fts" => load_fits(path, columns, hdu),
        "parquet" | "pq" => load_parquet(path, columns),
        "csv" => load_csv(path, columns),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading {}", path.display()))?;

    log::info!(
        "Loaded {} rows x {} columns from {}",
        catalog.len(),
        catalog.columns().len(),
        path.display()
    );
    Ok(catalog)
}

/// Load the columns `rules` read from `path`.
///
/// A Parquet file already screened by [`super::filter`] has no flag columns,
/// so they are not requested; its validity and label cuts still apply.
pub fn load_for_rules(path: &Path, rules: &QualityRules, hdu: usize) -> Result<Catalog> {
    let screened = matches!(extension(path).as_str(), "parquet" | "pq")
        && parquet_screened(path).with_context(|| format!("loading {}", path.display()))?;
    let flags = rules.flag_columns();
    let columns: Vec<String> = rules
        .required_columns()
        .into_iter()
        .filter(|c| !(screened && flags.contains(&c.as_str())))
        .collect();
    let names: Vec<&str> = columns.iter().map(String::as_str).collect();
    load_catalog(path, &names, hdu)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn build(columns: Vec<Column>) -> Result<Catalog> {
    Ok(Catalog::from_columns(columns)?)
}

// ---------------------------------------------------------------------------
// FITS loader
// ---------------------------------------------------------------------------

fn load_fits(path: &Path, columns: &[&str], hdu: usize) -> Result<Catalog> {
    if columns.is_empty() {
        bail!("FITS catalogs are read column by column; name the columns to load");
    }
    let cols = fits::read_bintable(path, hdu, columns).context("reading FITS binary table")?;
    build(cols)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// Array columns hold semicolon-separated integers: `"0;4;0;0;0;0;0;0;0"`.
/// Empty or `nan` cells in float columns become NaN.
fn load_csv(path: &Path, columns: &[&str]) -> Result<Catalog> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let wanted: Vec<(usize, String)> = if columns.is_empty() {
        headers.iter().cloned().enumerate().collect()
    } else {
        columns
            .iter()
            .map(|name| {
                headers
                    .iter()
                    .position(|h| h == name)
                    .map(|i| (i, name.to_string()))
                    .with_context(|| format!("CSV missing '{name}' column"))
            })
            .collect::<Result<_>>()?
    };

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); wanted.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (slot, (idx, _)) in cells.iter_mut().zip(&wanted) {
            slot.push(record.get(*idx).unwrap_or("").trim().to_string());
        }
    }

    let cols = wanted
        .into_iter()
        .zip(cells)
        .map(|((_, name), values)| {
            let data = csv_column(&name, &values)?;
            Ok(Column::new(name, data))
        })
        .collect::<Result<Vec<_>>>()?;
    build(cols)
}

fn csv_column(name: &str, values: &[String]) -> Result<ColumnData> {
    if values.iter().any(|v| v.contains(';')) {
        let mut width = None;
        let mut flat = Vec::new();
        for (row, cell) in values.iter().enumerate() {
            let parsed = parse_semicolon_ints(cell, row, name)?;
            match width {
                None => width = Some(parsed.len()),
                Some(w) if w != parsed.len() => {
                    bail!("Row {row}, {name}: expected {w} values, found {}", parsed.len())
                }
                _ => {}
            }
            flat.extend(parsed);
        }
        return Ok(ColumnData::IntArray {
            width: width.unwrap_or(1),
            values: flat,
        });
    }

    let ints: Option<Vec<i64>> = values.iter().map(|v| v.parse::<i64>().ok()).collect();
    if let Some(ints) = ints {
        if !ints.is_empty() {
            return Ok(ColumnData::Int(ints));
        }
    }

    values
        .iter()
        .enumerate()
        .map(|(row, v)| {
            if v.is_empty() {
                Ok(f64::NAN)
            } else {
                v.parse::<f64>()
                    .with_context(|| format!("Row {row}, {name}: '{v}' is not a number"))
            }
        })
        .collect::<Result<Vec<_>>>()
        .map(ColumnData::Float)
}

fn parse_semicolon_ints(s: &str, row: usize, col: &str) -> Result<Vec<i64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<i64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not an integer"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet catalog.
///
/// Float columns of any width become `f64` (nulls → NaN), integer columns
/// become `i64`, and `List` / `LargeList` / `FixedSizeList` integer columns
/// become fixed-width flag arrays. Files written by [`super::writer`] carry
/// the flag-screened marker in their schema metadata.
fn load_parquet(path: &Path, columns: &[&str]) -> Result<Catalog> {
    let builder = parquet_builder(path)?;
    let schema = builder.schema().clone();
    let screened = screened_marker(&schema);

    let wanted: Vec<(usize, String)> = if columns.is_empty() {
        schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| (i, f.name().clone()))
            .collect()
    } else {
        columns
            .iter()
            .map(|name| {
                schema
                    .index_of(name)
                    .map(|i| (i, name.to_string()))
                    .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))
            })
            .collect::<Result<_>>()?
    };

    let reader = builder.build().context("building parquet reader")?;
    let mut data: Vec<Option<ColumnData>> = vec![None; wanted.len()];

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (slot, (idx, name)) in data.iter_mut().zip(&wanted) {
            let chunk = arrow_column(batch.column(*idx), name)?;
            match slot {
                None => *slot = Some(chunk),
                Some(acc) => append(acc, chunk, name)?,
            }
        }
    }

    let cols = wanted
        .into_iter()
        .zip(data)
        .map(|((idx, name), d)| {
            let d = match d {
                Some(d) => d,
                // No batches at all: an empty column of the declared type.
                None => empty_column(schema.field(idx).data_type(), &name)?,
            };
            Ok(Column::new(name, d))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut catalog = build(cols)?;
    catalog.flags_screened = screened;
    Ok(catalog)
}

fn parquet_builder(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<std::fs::File>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")
}

fn screened_marker(schema: &Schema) -> bool {
    schema
        .metadata()
        .get(SCREENED_KEY)
        .is_some_and(|v| v == "true")
}

/// Whether a Parquet file carries the flag-screened marker. Reads metadata only.
fn parquet_screened(path: &Path) -> Result<bool> {
    Ok(screened_marker(parquet_builder(path)?.schema()))
}

// -- Arrow helpers --

fn empty_column(data_type: &DataType, name: &str) -> Result<ColumnData> {
    Ok(match data_type {
        t if t.is_floating() => ColumnData::Float(Vec::new()),
        t if t.is_integer() => ColumnData::Int(Vec::new()),
        DataType::FixedSizeList(_, w) => ColumnData::IntArray {
            width: (*w).max(1) as usize,
            values: Vec::new(),
        },
        DataType::List(_) | DataType::LargeList(_) => ColumnData::IntArray {
            width: 1,
            values: Vec::new(),
        },
        other => bail!("Column '{name}': unsupported type {other:?}"),
    })
}

fn append(acc: &mut ColumnData, chunk: ColumnData, name: &str) -> Result<()> {
    match (acc, chunk) {
        (ColumnData::Float(a), ColumnData::Float(b)) => a.extend(b),
        (ColumnData::Int(a), ColumnData::Int(b)) => a.extend(b),
        (ColumnData::IntArray { width, values }, ColumnData::IntArray { width: w, values: b }) => {
            if values.is_empty() {
                *width = w;
            } else if *width != w && !b.is_empty() {
                bail!("Column '{name}' changes array width between batches ({width} vs {w})");
            }
            values.extend(b);
        }
        (a, b) => bail!(
            "Column '{name}' changes type between batches ({} vs {})",
            a.kind(),
            b.kind()
        ),
    }
    Ok(())
}

/// Convert one Arrow column chunk into catalog storage.
fn arrow_column(col: &ArrayRef, name: &str) -> Result<ColumnData> {
    match col.data_type() {
        t if t.is_floating() => float_values(col, name).map(ColumnData::Float),
        t if t.is_integer() => int_values(col, name).map(ColumnData::Int),
        DataType::List(_) => {
            let list = col.as_list::<i32>();
            let rows = (0..list.len()).map(|i| (list.is_null(i), list.value(i)));
            int_array(rows, name)
        }
        DataType::LargeList(_) => {
            let list = col.as_list::<i64>();
            let rows = (0..list.len()).map(|i| (list.is_null(i), list.value(i)));
            int_array(rows, name)
        }
        DataType::FixedSizeList(_, _) => {
            let list = col.as_fixed_size_list();
            let rows = (0..list.len()).map(|i| (list.is_null(i), list.value(i)));
            int_array(rows, name)
        }
        other => bail!("Column '{name}': unsupported type {other:?}"),
    }
}

fn int_array(rows: impl Iterator<Item = (bool, ArrayRef)>, name: &str) -> Result<ColumnData> {
    let mut width = None;
    let mut values = Vec::new();
    for (row, (is_null, arr)) in rows.enumerate() {
        if is_null {
            bail!("Row {row}: null value in array column '{name}'");
        }
        let row_values = int_values(&arr, name)?;
        match width {
            None => width = Some(row_values.len()),
            Some(w) if w != row_values.len() => bail!(
                "Row {row}: '{name}' has {} values, expected {w}",
                row_values.len()
            ),
            _ => {}
        }
        values.extend(row_values);
    }
    Ok(ColumnData::IntArray {
        width: width.unwrap_or(1).max(1),
        values,
    })
}

fn int_values(arr: &ArrayRef, name: &str) -> Result<Vec<i64>> {
    if arr.null_count() > 0 {
        bail!("Column '{name}' contains null integers");
    }
    // Keep the bit pattern of unsigned 64-bit flags.
    if arr.data_type() == &DataType::UInt64 {
        return Ok(arr
            .as_primitive::<UInt64Type>()
            .values()
            .iter()
            .map(|v| *v as i64)
            .collect());
    }
    let converted = cast(arr, &DataType::Int64)
        .with_context(|| format!("Column '{name}': casting to Int64"))?;
    Ok(converted.as_primitive::<Int64Type>().values().to_vec())
}

fn float_values(arr: &ArrayRef, name: &str) -> Result<Vec<f64>> {
    let converted = cast(arr, &DataType::Float64)
        .with_context(|| format!("Column '{name}': casting to Float64"))?;
    Ok(converted
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fits::fixture;
    use crate::data::writer::write_parquet;

    fn sample() -> Catalog {
        Catalog::from_columns(vec![
            Column::new("TEFF", ColumnData::Float(vec![4800.0, f64::NAN, 5100.0])),
            Column::new("ASPCAPFLAG", ColumnData::Int(vec![0, 1 << 16, i64::MIN])),
            Column::new(
                "PARAMFLAG",
                ColumnData::IntArray {
                    width: 2,
                    values: vec![0, 1, 2, 3, 4, 5],
                },
            ),
        ])
        .unwrap()
    }

    #[test]
    fn parquet_round_trip_keeps_columns_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.parquet");
        let mut cat = sample();
        cat.flags_screened = true;
        write_parquet(&cat, &path).unwrap();

        let back = load_catalog(&path, &[], 1).unwrap();
        assert!(back.flags_screened);
        assert_eq!(back.column_names(), vec!["TEFF", "ASPCAPFLAG", "PARAMFLAG"]);
        assert_eq!(back.column("ASPCAPFLAG"), cat.column("ASPCAPFLAG"));
        assert_eq!(back.column("PARAMFLAG"), cat.column("PARAMFLAG"));
        match back.column("TEFF") {
            Some(ColumnData::Float(v)) => {
                assert_eq!(v[0], 4800.0);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected {other:?}"),
        }

        let only = load_catalog(&path, &["PARAMFLAG", "TEFF"], 1).unwrap();
        assert_eq!(only.column_names(), vec!["PARAMFLAG", "TEFF"]);
    }

    #[test]
    fn screened_parquet_loads_without_flag_columns() {
        use crate::data::filter::filter_catalog;

        let rules = QualityRules::apogee_dr17();
        let raw = Catalog::from_columns(vec![
            Column::new("TEFF", ColumnData::Float(vec![4800.0, 5200.0])),
            Column::new("TEFF_ERR", ColumnData::Float(vec![50.0, 400.0])),
            Column::new("LOGG", ColumnData::Float(vec![2.5, 4.4])),
            Column::new("LOGG_ERR", ColumnData::Float(vec![0.05, 0.05])),
            Column::new("FE_H", ColumnData::Float(vec![-0.3, 0.1])),
            Column::new("FE_H_ERR", ColumnData::Float(vec![0.02, 0.02])),
            Column::new(
                "PARAMFLAG",
                ColumnData::IntArray {
                    width: 9,
                    values: vec![0; 18],
                },
            ),
            Column::new("ASPCAPFLAG", ColumnData::Int(vec![0, 0])),
        ])
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let raw_path = dir.path().join("raw.parquet");
        write_parquet(&raw, &raw_path).unwrap();
        let loaded = load_for_rules(&raw_path, &rules, 1).unwrap();
        assert!(loaded.has_column("PARAMFLAG"));

        let clean = filter_catalog(&loaded, &rules).unwrap();
        let clean_path = dir.path().join("clean.parquet");
        write_parquet(&clean, &clean_path).unwrap();

        let reloaded = load_for_rules(&clean_path, &rules, 1).unwrap();
        assert!(reloaded.flags_screened);
        assert!(!reloaded.has_column("PARAMFLAG"));
        assert_eq!(filter_catalog(&reloaded, &rules).unwrap(), clean);
    }

    #[test]
    fn unscreened_parquet_still_needs_flag_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.parquet");
        let cat = Catalog::from_columns(vec![
            Column::new("TEFF", ColumnData::Float(vec![4800.0])),
            Column::new("TEFF_ERR", ColumnData::Float(vec![50.0])),
            Column::new("LOGG", ColumnData::Float(vec![2.5])),
            Column::new("LOGG_ERR", ColumnData::Float(vec![0.05])),
            Column::new("FE_H", ColumnData::Float(vec![-0.3])),
            Column::new("FE_H_ERR", ColumnData::Float(vec![0.02])),
        ])
        .unwrap();
        write_parquet(&cat, &path).unwrap();

        let err = load_for_rules(&path, &QualityRules::apogee_dr17(), 1).unwrap_err();
        assert!(format!("{err:#}").contains("missing 'PARAMFLAG'"));
    }

    #[test]
    fn parquet_missing_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.parquet");
        write_parquet(&sample(), &path).unwrap();
        let err = load_catalog(&path, &["LOGG"], 1).unwrap_err();
        assert!(format!("{err:#}").contains("missing 'LOGG'"));
    }

    #[test]
    fn csv_infers_column_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.csv");
        std::fs::write(
            &path,
            "TEFF,ASPCAPFLAG,PARAMFLAG\n4800.5,0,0;1;2\n,65536,3;4;5\nnan,3,6;7;8\n",
        )
        .unwrap();

        let cat = load_catalog(&path, &["PARAMFLAG", "TEFF", "ASPCAPFLAG"], 1).unwrap();
        assert_eq!(
            cat.column("PARAMFLAG"),
            Some(&ColumnData::IntArray {
                width: 3,
                values: (0..9).collect()
            })
        );
        assert_eq!(cat.column("ASPCAPFLAG"), Some(&ColumnData::Int(vec![0, 65536, 3])));
        match cat.column("TEFF") {
            Some(ColumnData::Float(v)) => {
                assert_eq!(v[0], 4800.5);
                assert!(v[1].is_nan() && v[2].is_nan());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn csv_ragged_arrays_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.csv");
        std::fs::write(&path, "PARAMFLAG\n0;1\n0;1;2\n").unwrap();
        assert!(load_catalog(&path, &[], 1).is_err());
    }

    #[test]
    fn fits_file_loads_requested_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.fits");
        let mut row = Vec::new();
        row.extend_from_slice(&4321.0f32.to_be_bytes());
        row.extend_from_slice(&7i32.to_be_bytes());
        row.extend_from_slice(&9i32.to_be_bytes());
        let bytes = fixture::bintable_file(
            &[("TEFF", "E", vec![]), ("PARAMFLAG", "2J", vec![])],
            &[row],
        );
        std::fs::write(&path, bytes).unwrap();

        let cat = load_catalog(&path, &["PARAMFLAG", "TEFF"], 1).unwrap();
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.column("TEFF"), Some(&ColumnData::Float(vec![4321.0])));
        assert_eq!(
            cat.column("PARAMFLAG"),
            Some(&ColumnData::IntArray {
                width: 2,
                values: vec![7, 9]
            })
        );
        assert!(!cat.flags_screened);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_catalog(Path::new("cat.txt"), &[], 1).unwrap_err();
        assert!(format!("{err:#}").contains("Unsupported file extension"));
    }
}
