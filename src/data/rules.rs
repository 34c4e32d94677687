use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// APOGEE flag bits
// ---------------------------------------------------------------------------

/// Bits of the per-parameter `PARAMFLAG` array (one bitmask per parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParamFlagBit {
    GridedgeBad,
    CalrangeBad,
    OtherBad,
    TeffCut,
}

impl ParamFlagBit {
    pub fn bit(self) -> u32 {
        match self {
            ParamFlagBit::GridedgeBad => 0,
            ParamFlagBit::CalrangeBad => 1,
            ParamFlagBit::OtherBad => 2,
            ParamFlagBit::TeffCut => 6,
        }
    }
}

/// Bits of the global `ASPCAPFLAG` bitmask that mark a parameter as unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AspcapFlagBit {
    TeffBad,
    LoggBad,
    VmicroBad,
    MHBad,
    AlphaMBad,
    CMBad,
    NMBad,
    StarBad,
    Chi2Bad,
    ColorteBad,
    RotationBad,
    SnBad,
}

impl AspcapFlagBit {
    pub fn bit(self) -> u32 {
        match self {
            AspcapFlagBit::TeffBad => 16,
            AspcapFlagBit::LoggBad => 17,
            AspcapFlagBit::VmicroBad => 18,
            AspcapFlagBit::MHBad => 19,
            AspcapFlagBit::AlphaMBad => 20,
            AspcapFlagBit::CMBad => 21,
            AspcapFlagBit::NMBad => 22,
            AspcapFlagBit::StarBad => 23,
            AspcapFlagBit::Chi2Bad => 24,
            AspcapFlagBit::ColorteBad => 25,
            AspcapFlagBit::RotationBad => 26,
            AspcapFlagBit::SnBad => 27,
        }
    }
}

/// `PARAMFLAG` slot of each ASPCAP parameter.
pub mod param_index {
    pub const TEFF: usize = 0;
    pub const LOGG: usize = 1;
    pub const VMICRO: usize = 2;
    pub const M_H: usize = 3;
    pub const ALPHA_M: usize = 4;
    pub const C_M: usize = 5;
    pub const N_M: usize = 6;
}

// ---------------------------------------------------------------------------
// Per-quantity rule pieces
// ---------------------------------------------------------------------------

/// Bits that disqualify a quantity, tested against its slot in the array
/// flag column and against the scalar flag column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmaskSpec {
    /// Slot of this quantity in the array flag column.
    pub flag_index: usize,
    #[serde(default)]
    pub array_bits: Vec<ParamFlagBit>,
    #[serde(default)]
    pub scalar_bits: Vec<AspcapFlagBit>,
}

impl BitmaskSpec {
    pub fn array_mask(&self) -> u64 {
        self.array_bits.iter().fold(0, |m, b| m | 1u64 << b.bit())
    }

    pub fn scalar_mask(&self) -> u64 {
        self.scalar_bits.iter().fold(0, |m, b| m | 1u64 << b.bit())
    }

    /// `true` when either flag carries one of the bad bits.
    pub fn rejects(&self, array_flag: i64, scalar_flag: i64) -> bool {
        (array_flag as u64 & self.array_mask()) != 0
            || (scalar_flag as u64 & self.scalar_mask()) != 0
    }
}

/// One side of a physical range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub value: f64,
    /// Whether a value exactly at the limit is still acceptable.
    #[serde(default)]
    pub inclusive: bool,
}

impl Limit {
    pub fn inclusive(value: f64) -> Self {
        Limit {
            value,
            inclusive: true,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Limit {
            value,
            inclusive: false,
        }
    }
}

/// Rejects missing or physically implausible measurements.
///
/// A value passes when it is not NaN, not the exact zero sentinel, and
/// inside the declared limits; its uncertainty must be neither NaN nor
/// exactly zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidityRule {
    #[serde(default)]
    pub lower: Option<Limit>,
    #[serde(default)]
    pub upper: Option<Limit>,
}

impl ValidityRule {
    pub fn accepts(&self, value: f64, error: f64) -> bool {
        if value.is_nan() || value == 0.0 || error.is_nan() || error == 0.0 {
            return false;
        }
        let above_lower = match self.lower {
            Some(l) if l.inclusive => value >= l.value,
            Some(l) => value > l.value,
            None => true,
        };
        let below_upper = match self.upper {
            Some(u) if u.inclusive => value <= u.value,
            Some(u) => value < u.value,
            None => true,
        };
        above_lower && below_upper
    }
}

/// Secondary "good label" cut applied after the flag and validity stages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LabelThreshold {
    /// `value / error` must be strictly above this ratio.
    MinSnr(f64),
    /// `error` must be strictly below this ceiling.
    MaxError(f64),
}

impl LabelThreshold {
    pub fn accepts(&self, value: f64, error: f64) -> bool {
        match *self {
            LabelThreshold::MinSnr(min) => value / error > min,
            LabelThreshold::MaxError(max) => error < max,
        }
    }
}

// ---------------------------------------------------------------------------
// The rule table
// ---------------------------------------------------------------------------

/// All cuts for one physical quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityRule {
    /// Quantity name, also the value column (e.g. `TEFF`).
    pub quantity: String,
    /// Uncertainty column (e.g. `TEFF_ERR`).
    pub error_column: String,
    #[serde(default)]
    pub bitmask: Option<BitmaskSpec>,
    #[serde(default)]
    pub validity: Option<ValidityRule>,
    #[serde(default)]
    pub threshold: Option<LabelThreshold>,
}

/// What to do when no rows survive the cuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyResultPolicy {
    /// Log a warning and return an empty catalog.
    #[default]
    Warn,
    /// Fail with [`QualityError::EmptyResult`](super::filter::QualityError::EmptyResult).
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityRules {
    /// Per-quantity array flag column (`PARAMFLAG`).
    pub array_flag_column: String,
    /// Global scalar flag column (`ASPCAPFLAG`).
    pub scalar_flag_column: String,
    pub quantities: Vec<QuantityRule>,
    pub on_empty: EmptyResultPolicy,
}

impl QualityRules {
    /// Cuts used for the APOGEE DR17 training sample.
    pub fn apogee_dr17() -> Self {
        use AspcapFlagBit::*;
        use ParamFlagBit::*;

        let base_param = vec![GridedgeBad, CalrangeBad, OtherBad];

        QualityRules {
            array_flag_column: "PARAMFLAG".to_string(),
            scalar_flag_column: "ASPCAPFLAG".to_string(),
            quantities: vec![
                QuantityRule {
                    quantity: "TEFF".to_string(),
                    error_column: "TEFF_ERR".to_string(),
                    bitmask: Some(BitmaskSpec {
                        flag_index: param_index::TEFF,
                        array_bits: vec![GridedgeBad, CalrangeBad, OtherBad, TeffCut],
                        scalar_bits: vec![TeffBad, ColorteBad, StarBad],
                    }),
                    validity: Some(ValidityRule {
                        lower: None,
                        upper: Some(Limit::inclusive(10_000.0)),
                    }),
                    threshold: Some(LabelThreshold::MinSnr(30.0)),
                },
                QuantityRule {
                    quantity: "LOGG".to_string(),
                    error_column: "LOGG_ERR".to_string(),
                    bitmask: Some(BitmaskSpec {
                        flag_index: param_index::LOGG,
                        array_bits: base_param.clone(),
                        scalar_bits: vec![LoggBad, StarBad],
                    }),
                    validity: Some(ValidityRule {
                        lower: None,
                        upper: Some(Limit::exclusive(6.0)),
                    }),
                    threshold: Some(LabelThreshold::MaxError(0.4)),
                },
                QuantityRule {
                    quantity: "FE_H".to_string(),
                    error_column: "FE_H_ERR".to_string(),
                    bitmask: Some(BitmaskSpec {
                        flag_index: param_index::M_H,
                        array_bits: base_param,
                        scalar_bits: vec![MHBad],
                    }),
                    validity: Some(ValidityRule {
                        lower: None,
                        upper: Some(Limit::inclusive(10.0)),
                    }),
                    threshold: Some(LabelThreshold::MaxError(0.2)),
                },
            ],
            on_empty: EmptyResultPolicy::Warn,
        }
    }

    /// The flag columns removed from the output.
    pub fn flag_columns(&self) -> [&str; 2] {
        [&self.array_flag_column, &self.scalar_flag_column]
    }

    pub fn uses_bitmasks(&self) -> bool {
        self.quantities.iter().any(|q| q.bitmask.is_some())
    }

    /// Every column the rules read, in a stable order: measurements first,
    /// then the flag columns when any bitmask is configured.
    pub fn required_columns(&self) -> Vec<String> {
        let mut cols = Vec::new();
        for q in &self.quantities {
            for name in [&q.quantity, &q.error_column] {
                if !cols.contains(name) {
                    cols.push(name.clone());
                }
            }
        }
        if self.uses_bitmasks() {
            cols.push(self.array_flag_column.clone());
            cols.push(self.scalar_flag_column.clone());
        }
        cols
    }
}

impl Default for QualityRules {
    fn default() -> Self {
        QualityRules::apogee_dr17()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_masks_match_apogee_bits() {
        let rules = QualityRules::apogee_dr17();
        let teff = rules.quantities[0].bitmask.as_ref().unwrap();
        assert_eq!(teff.array_mask(), 0b100_0111);
        assert_eq!(teff.scalar_mask(), (1 << 16) | (1 << 25) | (1 << 23));

        let feh = rules.quantities[2].bitmask.as_ref().unwrap();
        assert_eq!(feh.flag_index, 3);
        assert_eq!(feh.array_mask(), 0b111);
        assert_eq!(feh.scalar_mask(), 1 << 19);
    }

    #[test]
    fn bitmask_ignores_unrelated_bits() {
        let logg = QualityRules::apogee_dr17().quantities[1].bitmask.clone().unwrap();
        // TEFF_CUT and TEFF_BAD do not concern surface gravity.
        assert!(!logg.rejects(1 << 6, 1 << 16));
        assert!(logg.rejects(1 << 1, 0));
        assert!(logg.rejects(0, 1 << 23));
    }

    #[test]
    fn bitmask_handles_high_scalar_bits() {
        let spec = BitmaskSpec {
            flag_index: 0,
            array_bits: vec![],
            scalar_bits: vec![AspcapFlagBit::StarBad],
        };
        // Sign bit set alongside STAR_BAD still rejects.
        assert!(spec.rejects(0, i64::MIN | (1 << 23)));
        assert!(!spec.rejects(0, i64::MIN));
    }

    #[test]
    fn validity_limits_and_sentinels() {
        let logg = ValidityRule {
            lower: None,
            upper: Some(Limit::exclusive(6.0)),
        };
        assert!(logg.accepts(5.99, 0.1));
        assert!(!logg.accepts(6.0, 0.1));
        assert!(!logg.accepts(0.0, 0.1));
        assert!(!logg.accepts(f64::NAN, 0.1));
        assert!(!logg.accepts(2.5, 0.0));
        assert!(!logg.accepts(2.5, f64::NAN));
        // Negative values are physical for log g.
        assert!(logg.accepts(-0.3, 0.1));

        let teff = ValidityRule {
            lower: Some(Limit::exclusive(3000.0)),
            upper: Some(Limit::inclusive(10_000.0)),
        };
        assert!(teff.accepts(10_000.0, 50.0));
        assert!(!teff.accepts(10_000.5, 50.0));
        assert!(!teff.accepts(3000.0, 50.0));
    }

    #[test]
    fn label_thresholds_are_strict() {
        assert!(!LabelThreshold::MinSnr(30.0).accepts(3000.0, 100.0));
        assert!(LabelThreshold::MinSnr(30.0).accepts(3100.0, 100.0));
        assert!(!LabelThreshold::MaxError(0.4).accepts(2.0, 0.4));
        assert!(LabelThreshold::MaxError(0.4).accepts(2.0, 0.39));
    }

    #[test]
    fn required_columns_lists_flags_last() {
        let cols = QualityRules::apogee_dr17().required_columns();
        assert_eq!(
            cols,
            vec![
                "TEFF", "TEFF_ERR", "LOGG", "LOGG_ERR", "FE_H", "FE_H_ERR", "PARAMFLAG",
                "ASPCAPFLAG"
            ]
        );
    }

    #[test]
    fn rules_round_trip_through_json() {
        let rules = QualityRules::apogee_dr17();
        let text = serde_json::to_string(&rules).unwrap();
        assert!(text.contains("\"TEFF_CUT\""));
        assert!(text.contains("\"M_H_BAD\""));
        let back: QualityRules = serde_json::from_str(&text).unwrap();
        assert_eq!(back, rules);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let rules: QualityRules = serde_json::from_str(r#"{"on_empty": "error"}"#).unwrap();
        assert_eq!(rules.on_empty, EmptyResultPolicy::Error);
        assert_eq!(rules.quantities.len(), 3);
    }
}
