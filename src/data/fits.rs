//! Minimal FITS binary-table (BINTABLE) reader.
//!
//! Only what catalog files need: header cards, HDU skipping, and scalar or
//! fixed-length numeric columns (`B`, `I`, `J`, `K`, `E`, `D`). Rows are
//! streamed so only the requested columns are held in memory.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::model::{Column, ColumnData};

const BLOCK: usize = 2880;
const CARD: usize = 80;

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed header: {0}")]
    Header(String),
    #[error("HDU {0} not found")]
    MissingHdu(usize),
    #[error("HDU {0} is not a binary table")]
    NotBinaryTable(usize),
    #[error("column '{0}' not found")]
    MissingColumn(String),
    #[error("column '{column}' has unsupported format '{tform}'")]
    UnsupportedFormat { column: String, tform: String },
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.cards.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            HeaderValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            HeaderValue::Int(i) => Some(*i as f64),
            HeaderValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn require_int(&self, key: &str) -> Result<i64, FitsError> {
        self.get_int(key)
            .ok_or_else(|| FitsError::Header(format!("missing integer keyword {key}")))
    }

    /// Size in bytes of the data unit following this header, before padding.
    fn data_len(&self) -> Result<u64, FitsError> {
        let bitpix = self.require_int("BITPIX")?;
        let naxis = self.require_int("NAXIS")?;
        if naxis == 0 {
            return Ok(0);
        }
        let mut elements: u64 = 1;
        for i in 1..=naxis {
            elements *= self.require_int(&format!("NAXIS{i}"))?.max(0) as u64;
        }
        let pcount = self.get_int("PCOUNT").unwrap_or(0).max(0) as u64;
        let gcount = self.get_int("GCOUNT").unwrap_or(1).max(0) as u64;
        Ok(bitpix.unsigned_abs() / 8 * gcount * (pcount + elements))
    }
}

fn parse_value(raw: &str) -> Option<HeaderValue> {
    let raw = raw.trim_start();
    if let Some(rest) = raw.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return Some(HeaderValue::Str(out.trim_end().to_string()));
    }

    let token = raw.split('/').next().unwrap_or("").trim();
    match token {
        "" => None,
        "T" => Some(HeaderValue::Bool(true)),
        "F" => Some(HeaderValue::Bool(false)),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                Some(HeaderValue::Int(i))
            } else {
                token
                    .replace(['D', 'd'], "E")
                    .parse::<f64>()
                    .ok()
                    .map(HeaderValue::Float)
            }
        }
    }
}

/// Read header blocks up to and including the one holding `END`.
fn read_header<R: Read>(reader: &mut R) -> Result<Header, FitsError> {
    let mut header = Header::default();
    let mut block = [0u8; BLOCK];
    loop {
        reader.read_exact(&mut block)?;
        for card in block.chunks_exact(CARD) {
            let card = std::str::from_utf8(card)
                .map_err(|_| FitsError::Header("non-ASCII header card".to_string()))?;
            let key = card[..8].trim_end();
            if key == "END" {
                return Ok(header);
            }
            if &card[8..10] != "= " {
                continue;
            }
            if let Some(value) = parse_value(&card[10..]) {
                header.cards.push((key.to_string(), value));
            }
        }
    }
}

fn padded(len: u64) -> u64 {
    len.div_ceil(BLOCK as u64) * BLOCK as u64
}

// ---------------------------------------------------------------------------
// Binary table layout
// ---------------------------------------------------------------------------

/// One field of a binary table as described by its `TTYPEn`/`TFORMn` cards.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub tform: String,
    pub repeat: usize,
    pub code: char,
    /// Byte offset within a row.
    pub offset: usize,
    pub scale: f64,
    pub zero: f64,
    pub null: Option<i64>,
}

impl FieldInfo {
    fn element_size(code: char) -> Option<usize> {
        match code {
            'L' | 'B' | 'A' => Some(1),
            'I' => Some(2),
            'J' | 'E' => Some(4),
            'K' | 'D' | 'C' | 'P' => Some(8),
            'M' | 'Q' => Some(16),
            'X' => Some(0),
            _ => None,
        }
    }

    fn width_bytes(&self) -> usize {
        match self.code {
            'X' => self.repeat.div_ceil(8),
            'P' | 'Q' => FieldInfo::element_size(self.code).unwrap_or(0),
            c => self.repeat * FieldInfo::element_size(c).unwrap_or(0),
        }
    }

    fn is_integer(&self) -> bool {
        matches!(self.code, 'B' | 'I' | 'J' | 'K')
    }

    fn unsupported(&self) -> FitsError {
        FitsError::UnsupportedFormat {
            column: self.name.clone(),
            tform: self.tform.clone(),
        }
    }
}

fn parse_tform(tform: &str) -> Option<(usize, char)> {
    let tform = tform.trim();
    let digits = tform.chars().take_while(|c| c.is_ascii_digit()).count();
    let repeat = if digits == 0 {
        1
    } else {
        tform[..digits].parse().ok()?
    };
    let code = tform[digits..].chars().next()?;
    FieldInfo::element_size(code)?;
    Some((repeat, code))
}

#[derive(Debug, Clone)]
pub struct BinTable {
    pub n_rows: usize,
    pub row_len: usize,
    pub fields: Vec<FieldInfo>,
}

impl BinTable {
    fn from_header(header: &Header, hdu: usize) -> Result<Self, FitsError> {
        if header.get_str("XTENSION").map(str::trim) != Some("BINTABLE") {
            return Err(FitsError::NotBinaryTable(hdu));
        }
        let row_len = header.require_int("NAXIS1")? as usize;
        let n_rows = header.require_int("NAXIS2")? as usize;
        let n_fields = header.require_int("TFIELDS")? as usize;

        let mut fields = Vec::with_capacity(n_fields);
        let mut offset = 0;
        for i in 1..=n_fields {
            let tform = header
                .get_str(&format!("TFORM{i}"))
                .ok_or_else(|| FitsError::Header(format!("missing TFORM{i}")))?
                .to_string();
            let name = header
                .get_str(&format!("TTYPE{i}"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("COL{i}"));
            let (repeat, code) = parse_tform(&tform)
                .ok_or_else(|| FitsError::Header(format!("bad TFORM{i} '{tform}'")))?;
            let field = FieldInfo {
                name,
                tform,
                repeat,
                code,
                offset,
                scale: header.get_float(&format!("TSCAL{i}")).unwrap_or(1.0),
                zero: header.get_float(&format!("TZERO{i}")).unwrap_or(0.0),
                null: header.get_int(&format!("TNULL{i}")),
            };
            offset += field.width_bytes();
            fields.push(field);
        }
        if offset != row_len {
            return Err(FitsError::Header(format!(
                "fields span {offset} bytes but NAXIS1 is {row_len}"
            )));
        }
        Ok(BinTable {
            n_rows,
            row_len,
            fields,
        })
    }

    /// Look up a field by name, exactly first and then case-insensitively.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
    }
}

// ---------------------------------------------------------------------------
// Column decoding
// ---------------------------------------------------------------------------

/// How a field's raw integers map to stored values.
#[derive(Debug, Clone, Copy)]
enum IntMapping {
    Raw,
    /// Unsigned convention: `TZERO` is 2^(bits-1) (or -128 for signed bytes).
    Offset(i64),
    /// Any other scaling turns the column into floats.
    Scaled,
}

fn int_mapping(field: &FieldInfo) -> IntMapping {
    if field.scale != 1.0 {
        return IntMapping::Scaled;
    }
    match (field.code, field.zero) {
        (_, z) if z == 0.0 => IntMapping::Raw,
        ('K', z) if z == 9_223_372_036_854_775_808.0 => IntMapping::Offset(i64::MIN),
        (_, z) if z.fract() == 0.0 && z.abs() < 9.0e15 => IntMapping::Offset(z as i64),
        _ => IntMapping::Scaled,
    }
}

fn read_int(code: char, bytes: &[u8]) -> i64 {
    match code {
        'B' => bytes[0] as i64,
        'I' => BigEndian::read_i16(bytes) as i64,
        'J' => BigEndian::read_i32(bytes) as i64,
        _ => BigEndian::read_i64(bytes),
    }
}

fn read_float(code: char, bytes: &[u8]) -> f64 {
    match code {
        'E' => BigEndian::read_f32(bytes) as f64,
        _ => BigEndian::read_f64(bytes),
    }
}

/// Accumulates one requested column while rows stream past.
struct ColumnReader {
    name: String,
    field: FieldInfo,
    elem: usize,
    mapping: IntMapping,
    data: ColumnData,
}

impl ColumnReader {
    fn new(name: &str, field: &FieldInfo, n_rows: usize) -> Result<Self, FitsError> {
        if field.repeat == 0 || !matches!(field.code, 'B' | 'I' | 'J' | 'K' | 'E' | 'D') {
            return Err(field.unsupported());
        }
        let mapping = int_mapping(field);
        let data = match (field.is_integer(), field.repeat, mapping) {
            (true, 1, IntMapping::Raw | IntMapping::Offset(_)) => {
                ColumnData::Int(Vec::with_capacity(n_rows))
            }
            (true, width, IntMapping::Raw | IntMapping::Offset(_)) => ColumnData::IntArray {
                width,
                values: Vec::with_capacity(n_rows * width),
            },
            (_, 1, _) => ColumnData::Float(Vec::with_capacity(n_rows)),
            _ => return Err(field.unsupported()),
        };
        Ok(ColumnReader {
            name: name.to_string(),
            elem: FieldInfo::element_size(field.code).unwrap_or(0),
            field: field.clone(),
            mapping,
            data,
        })
    }

    fn push_row(&mut self, row: &[u8]) {
        let start = self.field.offset;
        for k in 0..self.field.repeat {
            let bytes = &row[start + k * self.elem..start + (k + 1) * self.elem];
            match &mut self.data {
                ColumnData::Int(v) | ColumnData::IntArray { values: v, .. } => {
                    let raw = read_int(self.field.code, bytes);
                    v.push(match self.mapping {
                        IntMapping::Offset(z) => raw.wrapping_add(z),
                        _ => raw,
                    });
                }
                ColumnData::Float(v) => {
                    let value = if self.field.is_integer() {
                        let raw = read_int(self.field.code, bytes);
                        if self.field.null == Some(raw) {
                            f64::NAN
                        } else {
                            raw as f64 * self.field.scale + self.field.zero
                        }
                    } else {
                        read_float(self.field.code, bytes) * self.field.scale + self.field.zero
                    };
                    v.push(value);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Running out of file while looking for a header means the HDU is absent.
fn next_header<R: Read>(reader: &mut R, hdu: usize) -> Result<Header, FitsError> {
    read_header(reader).map_err(|e| match e {
        FitsError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            FitsError::MissingHdu(hdu)
        }
        other => other,
    })
}

/// Read the named columns of binary table `hdu` (0 is the primary HDU).
///
/// Columns are returned in the requested order under the requested names.
pub fn read_bintable<P: AsRef<Path>>(
    path: P,
    hdu: usize,
    columns: &[&str],
) -> Result<Vec<Column>, FitsError> {
    let file = File::open(path)?;
    read_bintable_from(BufReader::new(file), hdu, columns)
}

pub fn read_bintable_from<R: Read + Seek>(
    mut reader: R,
    hdu: usize,
    columns: &[&str],
) -> Result<Vec<Column>, FitsError> {
    for index in 0..hdu {
        let header = next_header(&mut reader, hdu)?;
        let skip = padded(header.data_len()?);
        log::trace!("Skipping HDU {index} ({skip} data bytes)");
        reader.seek(SeekFrom::Current(skip as i64))?;
    }
    let header = next_header(&mut reader, hdu)?;
    let table = BinTable::from_header(&header, hdu)?;
    log::debug!(
        "HDU {hdu}: binary table with {} rows, {} fields, {} bytes per row",
        table.n_rows,
        table.fields.len(),
        table.row_len
    );

    let mut readers = columns
        .iter()
        .map(|name| {
            let field = table
                .field(name)
                .ok_or_else(|| FitsError::MissingColumn(name.to_string()))?;
            ColumnReader::new(name, field, table.n_rows)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut row = vec![0u8; table.row_len];
    for _ in 0..table.n_rows {
        reader.read_exact(&mut row)?;
        for r in &mut readers {
            r.push_row(&row);
        }
    }

    Ok(readers
        .into_iter()
        .map(|r| Column::new(r.name, r.data))
        .collect())
}
