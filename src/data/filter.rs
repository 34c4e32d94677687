use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use super::model::{Catalog, ColumnData};
use super::rules::{
    BitmaskSpec, EmptyResultPolicy, LabelThreshold, QualityRules, QuantityRule, ValidityRule,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum QualityError {
    /// A column the rules need is absent or has the wrong shape.
    #[error("schema error in column '{column}': {reason}")]
    Schema { column: String, reason: String },

    /// No rows survived and the rules ask for this to be fatal.
    #[error("no rows passed the quality cuts ({input_rows} rows in)")]
    EmptyResult { input_rows: usize },
}

impl QualityError {
    fn schema(column: &str, reason: impl Into<String>) -> Self {
        QualityError::Schema {
            column: column.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Row counts through the cut stages, for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreeningReport {
    pub input_rows: usize,
    /// Rows left after the flag and validity stages.
    pub clean_rows: usize,
    pub output_rows: usize,
    /// Rows failing each individual rule, in rule order. A row failing
    /// several rules is counted once per rule.
    pub rejected: Vec<(String, usize)>,
}

impl ScreeningReport {
    fn record(&mut self, label: String, keep: &[bool]) {
        let failed = keep.iter().filter(|k| !**k).count();
        self.rejected.push((label, failed));
    }
}

impl fmt::Display for ScreeningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows in, {} after flag/validity cuts, {} after label cuts",
            self.input_rows, self.clean_rows, self.output_rows
        )?;
        for (label, n) in &self.rejected {
            write!(f, "\n  {label:<20} rejected {n}")?;
        }
        Ok(())
    }
}

/// A filtered catalog together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Screening {
    pub catalog: Catalog,
    pub report: ScreeningReport,
}

// ---------------------------------------------------------------------------
// Column access
// ---------------------------------------------------------------------------

/// Measurement columns; integer columns (e.g. from a CSV) are widened.
fn float_column<'a>(catalog: &'a Catalog, name: &str) -> Result<Cow<'a, [f64]>, QualityError> {
    match catalog.column(name) {
        Some(ColumnData::Float(v)) => Ok(Cow::Borrowed(v)),
        Some(ColumnData::Int(v)) => Ok(Cow::Owned(v.iter().map(|&i| i as f64).collect())),
        Some(other) => Err(QualityError::schema(
            name,
            format!("expected a numeric column, found {}", other.kind()),
        )),
        None => Err(QualityError::schema(name, "column is missing")),
    }
}

fn scalar_flags<'a>(catalog: &'a Catalog, name: &str) -> Result<&'a [i64], QualityError> {
    match catalog.column(name) {
        Some(ColumnData::Int(v)) => Ok(v),
        Some(other) => Err(QualityError::schema(
            name,
            format!("expected an integer flag column, found {}", other.kind()),
        )),
        None => Err(QualityError::schema(name, "column is missing")),
    }
}

fn array_flags<'a>(catalog: &'a Catalog, name: &str) -> Result<(usize, &'a [i64]), QualityError> {
    match catalog.column(name) {
        Some(ColumnData::IntArray { width, values }) => Ok((*width, values)),
        Some(other) => Err(QualityError::schema(
            name,
            format!("expected an integer array flag column, found {}", other.kind()),
        )),
        None => Err(QualityError::schema(name, "column is missing")),
    }
}

/// Verify every column the rules touch before evaluating any predicate.
fn check_schema(catalog: &Catalog, rules: &QualityRules) -> Result<(), QualityError> {
    for rule in &rules.quantities {
        float_column(catalog, &rule.quantity)?;
        float_column(catalog, &rule.error_column)?;
    }
    if catalog.flags_screened || !rules.uses_bitmasks() {
        return Ok(());
    }
    let (width, _) = array_flags(catalog, &rules.array_flag_column)?;
    scalar_flags(catalog, &rules.scalar_flag_column)?;
    for rule in &rules.quantities {
        if let Some(spec) = &rule.bitmask {
            if spec.flag_index >= width {
                return Err(QualityError::schema(
                    &rules.array_flag_column,
                    format!(
                        "{} uses flag slot {} but the array has width {width}",
                        rule.quantity, spec.flag_index
                    ),
                ));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-rule keep masks
// ---------------------------------------------------------------------------

/// Rows whose flags carry none of the quantity's bad bits.
pub fn bitmask_keep(
    catalog: &Catalog,
    rules: &QualityRules,
    spec: &BitmaskSpec,
) -> Result<Vec<bool>, QualityError> {
    let (width, array) = array_flags(catalog, &rules.array_flag_column)?;
    let scalar = scalar_flags(catalog, &rules.scalar_flag_column)?;
    if spec.flag_index >= width {
        return Err(QualityError::schema(
            &rules.array_flag_column,
            format!("flag slot {} out of range for width {width}", spec.flag_index),
        ));
    }
    Ok(array
        .chunks_exact(width)
        .zip(scalar)
        .map(|(slots, &global)| !spec.rejects(slots[spec.flag_index], global))
        .collect())
}

/// Rows whose measurement and uncertainty are present and physical.
pub fn validity_keep(
    catalog: &Catalog,
    rule: &QuantityRule,
    validity: &ValidityRule,
) -> Result<Vec<bool>, QualityError> {
    let values = float_column(catalog, &rule.quantity)?;
    let errors = float_column(catalog, &rule.error_column)?;
    Ok(values
        .iter()
        .zip(errors.iter())
        .map(|(&v, &e)| validity.accepts(v, e))
        .collect())
}

/// Rows meeting the quantity's signal-to-noise or uncertainty ceiling.
pub fn label_keep(
    catalog: &Catalog,
    rule: &QuantityRule,
    threshold: &LabelThreshold,
) -> Result<Vec<bool>, QualityError> {
    let values = float_column(catalog, &rule.quantity)?;
    let errors = float_column(catalog, &rule.error_column)?;
    Ok(values
        .iter()
        .zip(errors.iter())
        .map(|(&v, &e)| threshold.accepts(v, e))
        .collect())
}

fn and_into(keep: &mut [bool], other: &[bool]) {
    for (k, o) in keep.iter_mut().zip(other) {
        *k &= *o;
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Apply every rule and return the surviving rows without flag columns.
///
/// Stages, all combined with logical AND and preserving row order:
/// 1. bitmask tests (skipped when the catalog is already flag-screened),
/// 2. validity tests,
/// 3. flag column projection,
/// 4. label thresholds on the clean subset.
pub fn screen_catalog(catalog: &Catalog, rules: &QualityRules) -> Result<Screening, QualityError> {
    check_schema(catalog, rules)?;

    let mut report = ScreeningReport {
        input_rows: catalog.len(),
        ..Default::default()
    };
    let mut keep = vec![true; catalog.len()];

    if !catalog.flags_screened {
        for rule in &rules.quantities {
            if let Some(spec) = &rule.bitmask {
                let mask = bitmask_keep(catalog, rules, spec)?;
                report.record(format!("{} flags", rule.quantity), &mask);
                and_into(&mut keep, &mask);
            }
        }
    }
    for rule in &rules.quantities {
        if let Some(validity) = &rule.validity {
            let mask = validity_keep(catalog, rule, validity)?;
            report.record(format!("{} validity", rule.quantity), &mask);
            and_into(&mut keep, &mask);
        }
    }

    let mut clean = catalog
        .select_rows(&keep)
        .without_columns(&rules.flag_columns());
    clean.flags_screened = catalog.flags_screened || rules.uses_bitmasks();
    report.clean_rows = clean.len();

    let mut good = vec![true; clean.len()];
    for rule in &rules.quantities {
        if let Some(threshold) = &rule.threshold {
            let mask = label_keep(&clean, rule, threshold)?;
            report.record(format!("{} label", rule.quantity), &mask);
            and_into(&mut good, &mask);
        }
    }
    let output = clean.select_rows(&good);
    report.output_rows = output.len();

    if output.is_empty() {
        match rules.on_empty {
            EmptyResultPolicy::Warn => {
                log::warn!("No rows passed the quality cuts ({} rows in)", catalog.len())
            }
            EmptyResultPolicy::Error => {
                return Err(QualityError::EmptyResult {
                    input_rows: catalog.len(),
                })
            }
        }
    }
    log::debug!("Quality cuts: {report}");

    Ok(Screening {
        catalog: output,
        report,
    })
}

/// [`screen_catalog`] without the report.
pub fn filter_catalog(catalog: &Catalog, rules: &QualityRules) -> Result<Catalog, QualityError> {
    screen_catalog(catalog, rules).map(|s| s.catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Column;

    const WIDTH: usize = 9;

    /// (teff, teff_err, logg, logg_err, feh, feh_err, paramflag slots, aspcapflag)
    type Row = (f64, f64, f64, f64, f64, f64, [i64; WIDTH], i64);

    fn good_row() -> Row {
        (4800.0, 50.0, 2.5, 0.05, -0.3, 0.01, [0; WIDTH], 0)
    }

    fn catalog(rows: &[Row]) -> Catalog {
        let col = |f: fn(&Row) -> f64| ColumnData::Float(rows.iter().map(f).collect());
        Catalog::from_columns(vec![
            Column::new("LOGG", col(|r| r.2)),
            Column::new("TEFF", col(|r| r.0)),
            Column::new("LOGG_ERR", col(|r| r.3)),
            Column::new("TEFF_ERR", col(|r| r.1)),
            Column::new("FE_H", col(|r| r.4)),
            Column::new("FE_H_ERR", col(|r| r.5)),
            Column::new(
                "PARAMFLAG",
                ColumnData::IntArray {
                    width: WIDTH,
                    values: rows.iter().flat_map(|r| r.6).collect(),
                },
            ),
            Column::new("ASPCAPFLAG", ColumnData::Int(rows.iter().map(|r| r.7).collect())),
        ])
        .unwrap()
    }

    fn floats<'a>(cat: &'a Catalog, name: &str) -> &'a [f64] {
        match cat.column(name) {
            Some(ColumnData::Float(v)) => v,
            other => panic!("{name}: {other:?}"),
        }
    }

    /// The reference cuts written out literally, one row at a time.
    fn oracle(r: &Row) -> bool {
        let (teff, teff_err, logg, logg_err, feh, feh_err, pf, af) = *r;
        let (pf, af) = (pf.map(|v| v as u64), af as u64);
        let teff_issues = pf[0] & 0b100_0111 != 0 || af & ((1 << 16) | (1 << 25) | (1 << 23)) != 0;
        let logg_issues = pf[1] & 0b111 != 0 || af & ((1 << 17) | (1 << 23)) != 0;
        let metal_issues = pf[3] & 0b111 != 0 || af & (1 << 19) != 0;
        let abnormal = |v: f64, e: f64, bad_high: bool| {
            v.is_nan() || bad_high || v == 0.0 || e == 0.0 || e.is_nan()
        };
        let feh_abnormal = abnormal(feh, feh_err, feh > 10.0);
        let logg_abnormal = abnormal(logg, logg_err, logg >= 6.0);
        let teff_abnormal = abnormal(teff, teff_err, teff > 10000.0);
        let clean = !(teff_issues
            || logg_issues
            || metal_issues
            || feh_abnormal
            || logg_abnormal
            || teff_abnormal);
        clean && teff / teff_err > 30.0 && logg_err < 0.4 && feh_err < 0.2
    }

    fn mixed_rows() -> Vec<Row> {
        let teffs = [4800.0, 0.0, f64::NAN, 10000.0, 10000.5, 2900.0, 6100.0];
        let teff_errs = [50.0, 100.0, 0.0, f64::NAN, 333.0];
        let loggs = [2.5, 6.0, 5.999, 0.0, -0.2, f64::NAN];
        let logg_errs = [0.05, 0.4, 0.39, 0.0, 0.5];
        let fehs = [-0.3, 0.0, 10.0, 10.5, f64::NAN, -2.1];
        let feh_errs = [0.01, 0.2, 0.199, 0.0];
        let param_bits = [0, 1, 2, 4, 64, 8, 128];
        let aspcap_bits = [0, 1 << 16, 1 << 17, 1 << 19, 1 << 23, 1 << 25, 1 << 18, 1 << 40];

        (0..2000usize)
            .map(|i| {
                let mut pf = [0i64; WIDTH];
                pf[i % WIDTH] = param_bits[i % param_bits.len()];
                (
                    teffs[i % teffs.len()],
                    teff_errs[i / 3 % teff_errs.len()],
                    loggs[i / 5 % loggs.len()],
                    logg_errs[i / 7 % logg_errs.len()],
                    fehs[i / 11 % fehs.len()],
                    feh_errs[i / 13 % feh_errs.len()],
                    pf,
                    aspcap_bits[i / 17 % aspcap_bits.len()],
                )
            })
            .collect()
    }

    #[test]
    fn output_matches_oracle_mask() {
        let rows = mixed_rows();
        let out = filter_catalog(&catalog(&rows), &QualityRules::apogee_dr17()).unwrap();

        let expected: Vec<&Row> = rows.iter().filter(|r| oracle(r)).collect();
        assert!(!expected.is_empty());
        assert!(expected.len() < rows.len());
        assert_eq!(out.len(), expected.len());
        // Same rows in the same order.
        let teff = floats(&out, "TEFF");
        let logg = floats(&out, "LOGG");
        let feh_err = floats(&out, "FE_H_ERR");
        for (i, r) in expected.iter().enumerate() {
            assert_eq!(teff[i], r.0);
            assert_eq!(logg[i], r.2);
            assert_eq!(feh_err[i], r.5);
        }
    }

    #[test]
    fn five_row_scenario() {
        let mut rows = vec![good_row(); 5];
        rows[0].7 = 1 << 16;
        rows[1].4 = 0.0;
        rows[2].0 = 2900.0;
        rows[2].1 = 100.0;
        rows[3].0 = 5123.0;
        rows[4].3 = 0.5;

        let screening = screen_catalog(&catalog(&rows), &QualityRules::apogee_dr17()).unwrap();
        let out = screening.catalog;
        assert_eq!(out.len(), 1);
        assert_eq!(floats(&out, "TEFF"), &[5123.0]);
        assert!(!out.has_column("PARAMFLAG"));
        assert!(!out.has_column("ASPCAPFLAG"));

        let report = screening.report;
        assert_eq!(report.input_rows, 5);
        assert_eq!(report.clean_rows, 3);
        assert_eq!(report.output_rows, 1);
        assert!(report.rejected.contains(&("TEFF flags".to_string(), 1)));
        assert!(report.rejected.contains(&("FE_H validity".to_string(), 1)));
        assert!(report.rejected.contains(&("TEFF label".to_string(), 1)));
        assert!(report.rejected.contains(&("LOGG label".to_string(), 1)));
    }

    #[test]
    fn boundary_values_are_dropped() {
        let mut rows = vec![good_row(); 5];
        rows[0].0 = f64::NAN;
        rows[1].2 = 6.0;
        rows[2].1 = 0.0;
        rows[3].5 = 0.0;
        let out = filter_catalog(&catalog(&rows), &QualityRules::apogee_dr17()).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn preserves_order_and_column_layout() {
        let rows: Vec<Row> = (0..6)
            .map(|i| {
                let mut r = good_row();
                r.0 = 4000.0 + i as f64 * 100.0;
                if i % 2 == 1 {
                    r.6[1] = 1 << 2;
                }
                r
            })
            .collect();
        let out = filter_catalog(&catalog(&rows), &QualityRules::apogee_dr17()).unwrap();
        assert_eq!(floats(&out, "TEFF"), &[4000.0, 4200.0, 4400.0]);
        assert_eq!(
            out.column_names(),
            vec!["LOGG", "TEFF", "LOGG_ERR", "TEFF_ERR", "FE_H", "FE_H_ERR"]
        );
    }

    #[test]
    fn filtering_is_idempotent() {
        let rules = QualityRules::apogee_dr17();
        let once = filter_catalog(&catalog(&mixed_rows()), &rules).unwrap();
        assert!(once.flags_screened);
        let twice = filter_catalog(&once, &rules).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn flag_columns_dropped_even_without_bitmask_rules() {
        let mut rules = QualityRules::apogee_dr17();
        for q in &mut rules.quantities {
            q.bitmask = None;
        }
        let out = filter_catalog(&catalog(&[good_row()]), &rules).unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out.has_column("PARAMFLAG"));
        assert!(!out.has_column("ASPCAPFLAG"));
        assert!(!out.flags_screened);
    }

    #[test]
    fn missing_column_is_schema_error() {
        let cat = catalog(&[good_row()]).without_columns(&["LOGG_ERR"]);
        let err = filter_catalog(&cat, &QualityRules::apogee_dr17()).unwrap_err();
        assert!(matches!(err, QualityError::Schema { ref column, .. } if column == "LOGG_ERR"));

        // Unscreened catalog without its flags cannot be screened.
        let cat = catalog(&[good_row()]).without_columns(&["ASPCAPFLAG"]);
        let err = filter_catalog(&cat, &QualityRules::apogee_dr17()).unwrap_err();
        assert!(matches!(err, QualityError::Schema { ref column, .. } if column == "ASPCAPFLAG"));
    }

    #[test]
    fn narrow_flag_array_is_schema_error() {
        let cat = Catalog::from_columns(vec![
            Column::new("TEFF", ColumnData::Float(vec![4800.0])),
            Column::new("TEFF_ERR", ColumnData::Float(vec![50.0])),
            Column::new("LOGG", ColumnData::Float(vec![2.5])),
            Column::new("LOGG_ERR", ColumnData::Float(vec![0.05])),
            Column::new("FE_H", ColumnData::Float(vec![-0.3])),
            Column::new("FE_H_ERR", ColumnData::Float(vec![0.01])),
            Column::new(
                "PARAMFLAG",
                ColumnData::IntArray {
                    width: 2,
                    values: vec![0, 0],
                },
            ),
            Column::new("ASPCAPFLAG", ColumnData::Int(vec![0])),
        ])
        .unwrap();
        let err = filter_catalog(&cat, &QualityRules::apogee_dr17()).unwrap_err();
        assert!(err.to_string().contains("FE_H uses flag slot 3"));
    }

    #[test]
    fn empty_result_follows_policy() {
        let mut rows = vec![good_row(); 2];
        rows[0].7 = 1 << 23;
        rows[1].2 = f64::NAN;
        let cat = catalog(&rows);

        let mut rules = QualityRules::apogee_dr17();
        let out = filter_catalog(&cat, &rules).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.column_names().len(), 6);

        rules.on_empty = EmptyResultPolicy::Error;
        assert_eq!(
            filter_catalog(&cat, &rules).unwrap_err(),
            QualityError::EmptyResult { input_rows: 2 }
        );
    }

    /// Column-by-column equality where NaN matches NaN.
    fn bitwise_eq(a: &Catalog, b: &Catalog) -> bool {
        let bits = |d: &ColumnData| -> Vec<i64> {
            match d {
                ColumnData::Float(v) => v.iter().map(|x| x.to_bits() as i64).collect(),
                ColumnData::Int(v) => v.clone(),
                ColumnData::IntArray { values, .. } => values.clone(),
            }
        };
        a.flags_screened == b.flags_screened
            && a.column_names() == b.column_names()
            && a.columns()
                .iter()
                .zip(b.columns())
                .all(|(x, y)| x.data.kind() == y.data.kind() && bits(&x.data) == bits(&y.data))
    }

    #[test]
    fn input_is_not_modified() {
        let cat = catalog(&mixed_rows());
        assert!(cat
            .column("TEFF")
            .is_some_and(|d| matches!(d, ColumnData::Float(v) if v.iter().any(|x| x.is_nan()))));
        let before = cat.clone();
        let _ = filter_catalog(&cat, &QualityRules::apogee_dr17()).unwrap();
        assert!(bitwise_eq(&cat, &before));
        assert!(!bitwise_eq(&cat, &cat.without_columns(&["ASPCAPFLAG"])));
    }
}
