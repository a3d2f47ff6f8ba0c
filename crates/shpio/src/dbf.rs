//! dBase III attribute tables (`.dbf`).
//!
//! Field names and character values are decoded strictly: a byte sequence that
//! is not valid in the requested encoding is an `InvalidData` error rather than
//! a replacement character. Callers rely on that to tell encodings apart.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

use chrono::Datelike;
use encoding_rs::Encoding;

use crate::cursor::{bad, le_u16, le_u32, le_u8, take, write_u16, write_u32};

const DBF_VERSION: u8 = 0x03;
const HEADER_TERMINATOR: u8 = 0x0D;
const FILE_TERMINATOR: u8 = 0x1A;
const DELETED: u8 = b'*';
const MAX_NAME_BYTES: usize = 10;
const MAX_CHAR_WIDTH: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Bool,
    Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// Column width in bytes; `0` for text lets the writer size it to the data.
    pub width: u8,
    pub decimals: u8,
}

impl FieldDef {
    pub fn integer(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Integer, width: 18, decimals: 0 }
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Float, width: 24, decimals: 15 }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Text, width: 0, decimals: 0 }
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Bool, width: 1, decimals: 0 }
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: FieldKind::Date, width: 8, decimals: 0 }
    }

    fn type_char(&self) -> u8 {
        match self.kind {
            FieldKind::Text => b'C',
            FieldKind::Integer | FieldKind::Float => b'N',
            FieldKind::Bool => b'L',
            FieldKind::Date => b'D',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// `YYYYMMDD`, as stored.
    Date(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) | FieldValue::Date(s) => f.write_str(s),
            FieldValue::Bool(b) => f.write_str(if *b { "T" } else { "F" }),
        }
    }
}

/// Attribute table: one value per field per record, in field order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub fields: Vec<FieldDef>,
    pub records: Vec<Vec<FieldValue>>,
}

fn trim_end_pad(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    &raw[..end]
}

fn decode_strict<'a>(raw: &'a [u8], encoding: &'static Encoding) -> Option<Cow<'a, str>> {
    encoding.decode_without_bom_handling_and_without_replacement(raw)
}

/// Encode `text` exactly, refusing lossy output and encoders that fall back to
/// UTF-8 (UTF-16 and the replacement encoding have no encoder).
pub fn encode_strict(text: &str, encoding: &'static Encoding) -> io::Result<Vec<u8>> {
    let (bytes, used, unmappable) = encoding.encode(text);

    if used != encoding {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("text cannot be written as {}", encoding.name()),
        ));
    }

    if unmappable {
        return Err(bad(format!(
            "'{text}' has characters not representable in {}",
            encoding.name()
        )));
    }

    Ok(bytes.into_owned())
}

fn parse_value(field: &FieldDef, raw: &[u8], encoding: &'static Encoding) -> io::Result<FieldValue> {
    if field.kind == FieldKind::Text {
        let text = decode_strict(trim_end_pad(raw), encoding).ok_or_else(|| {
            bad(format!("value of '{}' is not valid {}", field.name, encoding.name()))
        })?;
        return Ok(FieldValue::Text(text.into_owned()));
    }

    // Numeric, logical and date columns are ASCII; anything else reads as null.
    let text = std::str::from_utf8(raw).unwrap_or("").trim_matches(|c| c == ' ' || c == '\0');
    if text.is_empty() || text.starts_with('*') {
        return Ok(FieldValue::Null);
    }

    let value = match field.kind {
        FieldKind::Integer => text
            .parse::<i64>()
            .map(FieldValue::Integer)
            .or_else(|_| text.parse::<f64>().map(FieldValue::Float))
            .unwrap_or(FieldValue::Null),
        FieldKind::Float => text.parse::<f64>().map(FieldValue::Float).unwrap_or(FieldValue::Null),
        FieldKind::Bool => match text.as_bytes()[0] {
            b'T' | b't' | b'Y' | b'y' => FieldValue::Bool(true),
            b'F' | b'f' | b'N' | b'n' => FieldValue::Bool(false),
            _ => FieldValue::Null,
        },
        FieldKind::Date => FieldValue::Date(text.to_owned()),
        FieldKind::Text => unreachable!("handled above"),
    };

    Ok(value)
}

/// Parse a `.dbf` image, decoding names and character data with `encoding`.
/// Records flagged as deleted are skipped.
pub fn parse_dbf_bytes(bytes: &[u8], encoding: &'static Encoding) -> io::Result<Table> {
    let (fields, rows) = parse_dbf_rows(bytes, encoding)?;
    Ok(Table { fields, records: rows.into_iter().flatten().collect() })
}

/// Like [`parse_dbf_bytes`], but keeps one slot per stored record so rows stay
/// aligned with `.shp` records. Deleted records are `None`.
pub fn parse_dbf_rows(
    bytes: &[u8],
    encoding: &'static Encoding,
) -> io::Result<(Vec<FieldDef>, Vec<Option<Vec<FieldValue>>>)> {
    let mut p = bytes;

    let _version = le_u8(&mut p)?;
    take(&mut p, 3)?; // last update YY MM DD
    let count = le_u32(&mut p)? as usize;
    let header_len = le_u16(&mut p)? as usize;
    let record_len = le_u16(&mut p)? as usize;

    if header_len < 33 || header_len > bytes.len() {
        return Err(bad("dbf header length out of range"));
    }

    // Field descriptors run from byte 32 up to the 0x0D terminator.
    let mut desc = &bytes[32..header_len];
    let mut fields = Vec::new();

    while desc.first().is_some_and(|&b| b != HEADER_TERMINATOR) {
        let d = take(&mut desc, 32)?;

        let name_raw = &d[..11];
        let name_end = name_raw.iter().position(|&b| b == 0).unwrap_or(name_raw.len());
        let name = decode_strict(trim_end_pad(&name_raw[..name_end]), encoding)
            .ok_or_else(|| bad(format!("field name is not valid {}", encoding.name())))?
            .into_owned();

        let width = d[16];
        let decimals = d[17];
        let kind = match d[11] {
            b'N' if decimals == 0 => FieldKind::Integer,
            b'N' | b'F' => FieldKind::Float,
            b'L' => FieldKind::Bool,
            b'D' => FieldKind::Date,
            _ => FieldKind::Text,
        };

        fields.push(FieldDef { name, kind, width, decimals });
    }

    let data_len: usize = fields.iter().map(|f| f.width as usize).sum::<usize>() + 1;
    if record_len < data_len {
        return Err(bad("dbf record length shorter than its fields"));
    }

    let mut rows = &bytes[header_len..];
    if count.checked_mul(record_len).map_or(true, |n| n > rows.len()) {
        return Err(bad(format!(
            "dbf declares {count} records of {record_len} bytes but holds {} bytes",
            rows.len()
        )));
    }
    let mut records = Vec::with_capacity(count);

    for _ in 0..count {
        let rec = take(&mut rows, record_len)?;
        if rec[0] == DELETED {
            records.push(None);
            continue;
        }

        let mut cur = &rec[1..];
        let mut values = Vec::with_capacity(fields.len());
        for field in &fields {
            let raw = take(&mut cur, field.width as usize)?;
            values.push(parse_value(field, raw, encoding)?);
        }
        records.push(Some(values));
    }

    Ok((fields, records))
}

fn format_number(field: &FieldDef, value: &FieldValue) -> io::Result<Vec<u8>> {
    let width = field.width as usize;

    let text = match (field.kind, value) {
        (_, FieldValue::Null) => String::new(),
        (FieldKind::Integer, FieldValue::Integer(v)) => v.to_string(),
        (FieldKind::Integer, FieldValue::Float(v)) if v.is_finite() && v.fract() == 0.0 => {
            format!("{v:.0}")
        }
        (FieldKind::Float, FieldValue::Integer(v)) => v.to_string(),
        (FieldKind::Float, FieldValue::Float(v)) if !v.is_finite() => String::new(),
        (FieldKind::Float, FieldValue::Float(v)) => {
            // Give up decimals before refusing the value.
            let mut decimals = field.decimals as usize;
            loop {
                let s = format!("{v:.decimals$}");
                if s.len() <= width || decimals == 0 {
                    break s;
                }
                decimals -= 1;
            }
        }
        (_, other) => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{other:?} does not fit numeric field '{}'", field.name),
            ))
        }
    };

    if text.len() > width {
        return Err(bad(format!("{text} overflows field '{}' (width {width})", field.name)));
    }

    Ok(format!("{text:>width$}").into_bytes())
}

fn format_cell(field: &FieldDef, value: &FieldValue, encoding: &'static Encoding) -> io::Result<Vec<u8>> {
    let width = field.width as usize;

    let mut cell = match field.kind {
        FieldKind::Integer | FieldKind::Float => return format_number(field, value),
        FieldKind::Text => encode_strict(&value.to_string(), encoding)?,
        FieldKind::Bool => match value {
            FieldValue::Bool(true) => b"T".to_vec(),
            FieldValue::Bool(false) => b"F".to_vec(),
            _ => b"?".to_vec(),
        },
        FieldKind::Date => value.to_string().into_bytes(),
    };

    if cell.len() > width {
        return Err(bad(format!("value overflows field '{}' (width {width})", field.name)));
    }
    cell.resize(width, b' ');

    Ok(cell)
}

/// Write `table` as dBase III with names and text encoded under `encoding`.
pub fn write_dbf<P: AsRef<Path>>(path: P, table: &Table, encoding: &'static Encoding) -> io::Result<()> {
    // Encode everything first so an unrepresentable value fails before the file exists.
    let mut names = Vec::with_capacity(table.fields.len());
    for field in &table.fields {
        let name = encode_strict(&field.name, encoding)?;
        if name.is_empty() || name.len() > MAX_NAME_BYTES {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("field name '{}' must be 1..={MAX_NAME_BYTES} bytes", field.name),
            ));
        }
        names.push(name);
    }

    let mut fields = table.fields.clone();
    let mut text_cells: Vec<Vec<Option<Vec<u8>>>> = Vec::with_capacity(table.records.len());

    for record in &table.records {
        if record.len() != fields.len() {
            return Err(io::Error::new(ErrorKind::InvalidInput, "record length != field count"));
        }
        let mut row = Vec::with_capacity(fields.len());
        for (field, value) in fields.iter().zip(record) {
            row.push(match field.kind {
                FieldKind::Text => Some(encode_strict(&value.to_string(), encoding)?),
                _ => None,
            });
        }
        text_cells.push(row);
    }

    // Size auto-width text columns to their longest encoded value.
    for (i, field) in fields.iter_mut().enumerate() {
        if field.kind == FieldKind::Text && field.width == 0 {
            let longest = text_cells
                .iter()
                .filter_map(|row| row[i].as_ref().map(Vec::len))
                .max()
                .unwrap_or(0);
            field.width = longest.clamp(1, MAX_CHAR_WIDTH) as u8;
        }
    }

    let header_len = 32 + 32 * fields.len() + 1;
    let record_len = 1 + fields.iter().map(|f| f.width as usize).sum::<usize>();
    let header_len = u16::try_from(header_len)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "too many dbf fields"))?;
    let record_len = u16::try_from(record_len)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "dbf record too wide"))?;

    let mut out = BufWriter::new(File::create(path)?);

    let today = chrono::Utc::now().date_naive();
    out.write_all(&[
        DBF_VERSION,
        (today.year() - 1900).clamp(0, 255) as u8,
        today.month() as u8,
        today.day() as u8,
    ])?;
    write_u32(&mut out, table.records.len() as u32)?;
    write_u16(&mut out, header_len)?;
    write_u16(&mut out, record_len)?;
    out.write_all(&[0u8; 20])?;

    for (field, name) in fields.iter().zip(&names) {
        let mut desc = [0u8; 32];
        desc[..name.len()].copy_from_slice(name);
        desc[11] = field.type_char();
        desc[16] = field.width;
        desc[17] = field.decimals;
        out.write_all(&desc)?;
    }
    out.write_all(&[HEADER_TERMINATOR])?;

    for record in &table.records {
        out.write_all(b" ")?;
        for (field, value) in fields.iter().zip(record) {
            out.write_all(&format_cell(field, value, encoding)?)?;
        }
    }

    out.write_all(&[FILE_TERMINATOR])?;
    out.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{GBK, UTF_16LE, UTF_8, WINDOWS_1252};

    fn zones_table() -> Table {
        Table {
            fields: vec![
                FieldDef::integer("TAZ"),
                FieldDef::text("编号名称"),
                FieldDef::float("AREA"),
                FieldDef::bool("URBAN"),
            ],
            records: vec![
                vec![
                    FieldValue::Integer(53621),
                    FieldValue::Text("驿都大道".into()),
                    FieldValue::Float(1.25),
                    FieldValue::Bool(true),
                ],
                vec![
                    FieldValue::Null,
                    FieldValue::Text("East".into()),
                    FieldValue::Float(0.5),
                    FieldValue::Null,
                ],
            ],
        }
    }

    #[test]
    fn gbk_table_reads_back_under_gbk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.dbf");
        write_dbf(&path, &zones_table(), GBK).unwrap();

        let table = parse_dbf_bytes(&std::fs::read(&path).unwrap(), GBK).unwrap();
        assert_eq!(table.fields[1].name, "编号名称");
        assert_eq!(table.fields[1].width, 8);
        assert_eq!(table.records, zones_table().records);
    }

    #[test]
    fn gbk_names_fail_strict_utf8_but_pass_latin1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.dbf");
        write_dbf(&path, &zones_table(), GBK).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        let err = parse_dbf_bytes(&bytes, UTF_8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        // Single-byte encodings accept anything; the names come out garbled.
        let garbled = parse_dbf_bytes(&bytes, WINDOWS_1252).unwrap();
        assert_eq!(garbled.fields.len(), 4);
        assert_ne!(garbled.fields[1].name, "编号名称");
    }

    #[test]
    fn deleted_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.dbf");
        write_dbf(&path, &zones_table(), UTF_8).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        bytes[header_len] = DELETED;

        let table = parse_dbf_bytes(&bytes, UTF_8).unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0][1], FieldValue::Text("East".into()));
    }

    #[test]
    fn deleted_records_keep_their_slot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.dbf");
        write_dbf(&path, &zones_table(), UTF_8).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        bytes[header_len] = DELETED;

        let (fields, rows) = parse_dbf_rows(&bytes, UTF_8).unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_none());
        assert_eq!(rows[1].as_ref().unwrap()[1], FieldValue::Text("East".into()));
    }

    #[test]
    fn record_count_beyond_the_file_is_invalid_data() {
        let mut bytes = vec![0u8; 33];
        bytes[0] = DBF_VERSION;
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        bytes[8..10].copy_from_slice(&33u16.to_le_bytes());
        bytes[10..12].copy_from_slice(&1u16.to_le_bytes());
        bytes[32] = HEADER_TERMINATOR;

        let err = parse_dbf_bytes(&bytes, UTF_8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        // A count one past the stored records fails the same way.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.dbf");
        write_dbf(&path, &zones_table(), UTF_8).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&3u32.to_le_bytes());

        let err = parse_dbf_bytes(&bytes, UTF_8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn unrepresentable_text_is_refused_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.dbf");

        let err = write_dbf(&path, &zones_table(), WINDOWS_1252).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(!path.exists());

        let err = write_dbf(&path, &zones_table(), UTF_16LE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(!path.exists());
    }

    #[test]
    fn wide_floats_drop_decimals_to_fit() {
        let field = FieldDef { name: "Flow".into(), kind: FieldKind::Float, width: 8, decimals: 6 };
        let cell = format_number(&field, &FieldValue::Float(1234.5678)).unwrap();
        assert_eq!(cell, b"1234.568".to_vec());

        let err = format_number(&field, &FieldValue::Float(123_456_789.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
