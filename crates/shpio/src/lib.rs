//! SHPIO: Esri Shapefile datasets with explicit text encodings.
//!
//! A dataset is a set of sibling files sharing one base name:
//!
//!   .shp : geometry records (required)
//!   .shx : record offsets into .shp (written; not needed for reading)
//!   .dbf : dBase III attribute table, one row per record
//!   .prj : CRS as WKT text
//!   .cpg : code page label for .dbf text (e.g. "UTF-8", "GBK", "936")
//!
//! .shp layout:
//!   00  : i32 BE  file code = 9994
//!   04  : [i32;5] unused
//!   18  : i32 BE  file length in 16-bit words
//!   1C  : i32 LE  version = 1000
//!   20  : i32 LE  shape type
//!   24  : f64[8]  xmin ymin xmax ymax zmin zmax mmin mmax (LE)
//!   64  : records: i32 BE number, i32 BE content words, content (LE)
//!
//! .dbf layout:
//!   00  : u8      version (0x03)
//!   01  : [u8;3]  last update YY MM DD
//!   04  : u32     record count
//!   08  : u16     header length
//!   0A  : u16     record length (incl. deletion flag)
//!   20  : 32-byte field descriptors, then 0x0D
//!   ..  : records: flag (' ' or '*') + fixed-width fields, then 0x1A
//!
//! Text in .dbf is decoded strictly with the caller's `encoding_rs` encoding;
//! a wrong guess surfaces as `InvalidData` instead of mojibake replacement.

mod cursor;
pub mod dbf;
pub mod shp;

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

pub use dbf::{FieldDef, FieldKind, FieldValue, Table};
pub use encoding_rs::{self, Encoding};
pub use shp::{Shape, ShapeType};

/// Every companion extension this crate reads or writes.
pub const EXTENSIONS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

/// Extensions a well-formed dataset must carry.
pub const REQUIRED_EXTENSIONS: [&str; 3] = ["shp", "shx", "dbf"];

/// A fully loaded dataset: geometry, attributes and CRS text.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub shape_type: ShapeType,
    pub shapes: Vec<Shape>,
    pub table: Table,
    pub prj: Option<String>,
}

/// Path of the `ext` companion next to `path`. An existing upper-case
/// variant (`TAZ.DBF`) wins over a missing lower-case one.
pub fn sibling(path: &Path, ext: &str) -> PathBuf {
    let lower = path.with_extension(ext);
    if lower.exists() {
        return lower;
    }

    let upper = path.with_extension(ext.to_ascii_uppercase());
    if upper.exists() {
        upper
    } else {
        lower
    }
}

/// Look up an encoding by WHATWG label (`gbk`, `utf-8`, `latin1`, `gb2312`...).
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Interpret the contents of a `.cpg` file, which may hold a label or a
/// Windows code page number.
pub fn encoding_for_cpg(contents: &str) -> Option<&'static Encoding> {
    let label = contents.trim();
    let mapped = match label {
        "65001" => "utf-8",
        "936" => "gbk",
        "950" => "big5",
        "932" => "shift_jis",
        "949" => "euc-kr",
        "1252" => "windows-1252",
        other => other,
    };
    encoding_for_label(mapped)
}

/// Encoding used when the caller has no preference: the `.cpg` label when
/// present and recognised, else Windows-1252.
pub fn default_encoding(path: &Path) -> &'static Encoding {
    fs::read(sibling(path, "cpg"))
        .ok()
        .and_then(|bytes| encoding_for_cpg(&String::from_utf8_lossy(&bytes)))
        .unwrap_or(encoding_rs::WINDOWS_1252)
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
fn with_file_bytes<T>(path: &Path, f: impl FnOnce(&[u8]) -> io::Result<T>) -> io::Result<T> {
    let file = fs::File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    f(&map)
}

#[cfg(not(feature = "mmap"))]
fn with_file_bytes<T>(path: &Path, f: impl FnOnce(&[u8]) -> io::Result<T>) -> io::Result<T> {
    let bytes = fs::read(path)?;
    f(&bytes)
}

/// Read the dataset rooted at `path` (the `.shp` file). Attribute text is
/// decoded with `encoding`, or [`default_encoding`] when `None`.
///
/// A missing `.dbf` yields an empty schema with one empty row per shape.
pub fn read_dataset(path: &Path, encoding: Option<&'static Encoding>) -> io::Result<Dataset> {
    let shp_path = sibling(path, "shp");
    let (shape_type, mut shapes) = with_file_bytes(&shp_path, shp::parse_shp_bytes)?;

    let dbf_path = sibling(path, "dbf");
    let table = if dbf_path.exists() {
        let encoding = encoding.unwrap_or_else(|| default_encoding(path));
        let (fields, rows) = with_file_bytes(&dbf_path, |bytes| dbf::parse_dbf_rows(bytes, encoding))?;

        if rows.len() != shapes.len() {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "attribute rows ({}) do not match geometry records ({})",
                    rows.len(),
                    shapes.len()
                ),
            ));
        }

        // Deleted rows take their geometry with them.
        let mut live = rows.iter().map(Option::is_some);
        shapes.retain(|_| live.next().unwrap_or(false));

        Table {
            fields,
            records: rows.into_iter().flatten().collect(),
        }
    } else {
        Table {
            fields: Vec::new(),
            records: vec![Vec::new(); shapes.len()],
        }
    };

    let prj_path = sibling(path, "prj");
    let prj = if prj_path.exists() {
        Some(String::from_utf8_lossy(&fs::read(prj_path)?).trim().to_owned())
    } else {
        None
    };

    Ok(Dataset { shape_type, shapes, table, prj })
}

/// Write every companion of `dataset` next to `path`, with `.dbf` text in
/// `encoding` and a `.cpg` naming it. The `.dbf` goes first so encoding
/// failures leave no geometry behind.
pub fn write_dataset(path: &Path, dataset: &Dataset, encoding: &'static Encoding) -> io::Result<()> {
    if dataset.table.records.len() != dataset.shapes.len() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "attribute rows and geometry records differ in length",
        ));
    }

    dbf::write_dbf(path.with_extension("dbf"), &dataset.table, encoding)?;
    shp::write_shp(
        path.with_extension("shp"),
        path.with_extension("shx"),
        dataset.shape_type,
        &dataset.shapes,
    )?;

    let prj_path = path.with_extension("prj");
    match dataset.prj.as_deref() {
        Some(wkt) => fs::write(&prj_path, wkt)?,
        None => remove_if_present(&prj_path)?,
    }

    fs::write(path.with_extension("cpg"), encoding.name())?;

    Ok(())
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Delete every companion of the dataset at `path` that exists.
pub fn remove_dataset(path: &Path) -> io::Result<()> {
    for ext in EXTENSIONS {
        remove_if_present(&path.with_extension(ext))?;
    }
    Ok(())
}

/// Presence of one companion file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companion {
    pub ext: &'static str,
    pub path: PathBuf,
    pub required: bool,
    /// Size in bytes, `None` when the file is absent.
    pub size: Option<u64>,
}

/// Which companion files of a dataset exist on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Companions {
    pub entries: Vec<Companion>,
}

impl Companions {
    pub fn probe(path: &Path) -> Self {
        let entries = EXTENSIONS
            .iter()
            .map(|&ext| {
                let path = sibling(path, ext);
                let size = fs::metadata(&path).ok().filter(|m| m.is_file()).map(|m| m.len());
                Companion {
                    ext,
                    path,
                    required: REQUIRED_EXTENSIONS.contains(&ext),
                    size,
                }
            })
            .collect();

        Self { entries }
    }

    pub fn has(&self, ext: &str) -> bool {
        self.entries.iter().any(|c| c.ext == ext && c.size.is_some())
    }

    pub fn missing(&self) -> impl Iterator<Item = &Companion> {
        self.entries.iter().filter(|c| c.size.is_none())
    }

    /// All required companions are present.
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|c| !c.required || c.size.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{GBK, UTF_8};

    fn sample() -> Dataset {
        Dataset {
            shape_type: ShapeType::Polygon,
            shapes: vec![
                Shape::Polygon(vec![vec![[0.0, 0.0], [0.0, 2.0], [2.0, 2.0], [2.0, 0.0], [0.0, 0.0]]]),
                Shape::Null,
            ],
            table: Table {
                fields: vec![FieldDef::integer("TAZ"), FieldDef::text("名称")],
                records: vec![
                    vec![FieldValue::Integer(1), FieldValue::Text("一区".into())],
                    vec![FieldValue::Integer(2), FieldValue::Text("二区".into())],
                ],
            },
            prj: Some("PROJCS[\"WGS 84 / Pseudo-Mercator\"]".into()),
        }
    }

    #[test]
    fn dataset_survives_a_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TAZ.shp");
        write_dataset(&path, &sample(), GBK).unwrap();

        assert!(Companions::probe(&path).is_complete());
        assert_eq!(fs::read_to_string(path.with_extension("cpg")).unwrap(), "GBK");

        let back = read_dataset(&path, Some(GBK)).unwrap();
        assert_eq!(back.shapes, sample().shapes);
        assert_eq!(back.table.records, sample().table.records);
        assert_eq!(back.prj, sample().prj);
        assert_eq!(back.table.fields[1].width, 4);

        // Without a hint the .cpg decides.
        let by_default = read_dataset(&path, None).unwrap();
        assert_eq!(by_default.table.fields[1].name, "名称");
    }

    #[test]
    fn wrong_encoding_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TAZ.shp");
        write_dataset(&path, &sample(), GBK).unwrap();

        let err = read_dataset(&path, Some(UTF_8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn missing_dbf_reads_geometry_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TAZ.shp");
        write_dataset(&path, &sample(), UTF_8).unwrap();
        fs::remove_file(path.with_extension("dbf")).unwrap();

        let companions = Companions::probe(&path);
        assert!(!companions.is_complete());
        assert_eq!(companions.missing().map(|c| c.ext).collect::<Vec<_>>(), vec!["dbf"]);

        let ds = read_dataset(&path, None).unwrap();
        assert!(ds.table.fields.is_empty());
        assert_eq!(ds.table.records.len(), 2);
    }

    #[test]
    fn deleted_dbf_row_drops_its_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TAZ.shp");
        write_dataset(&path, &sample(), GBK).unwrap();

        let dbf_path = path.with_extension("dbf");
        let mut bytes = fs::read(&dbf_path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        bytes[header_len] = b'*';
        fs::write(&dbf_path, bytes).unwrap();

        let ds = read_dataset(&path, Some(GBK)).unwrap();
        assert_eq!(ds.shapes, vec![Shape::Null]);
        assert_eq!(
            ds.table.records,
            vec![vec![FieldValue::Integer(2), FieldValue::Text("二区".into())]]
        );
    }

    #[cfg(feature = "mmap")]
    #[test]
    fn mapped_reads_match_buffered_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("TAZ.shp");
        write_dataset(&path, &sample(), GBK).unwrap();

        let mapped = with_file_bytes(&path, |bytes| Ok(bytes.to_vec())).unwrap();
        assert_eq!(mapped, fs::read(&path).unwrap());

        let back = read_dataset(&path, Some(GBK)).unwrap();
        assert_eq!(back.shapes, sample().shapes);
        assert_eq!(back.table.records, sample().table.records);
    }

    #[test]
    fn remove_dataset_clears_all_companions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.shp");
        write_dataset(&path, &sample(), UTF_8).unwrap();

        remove_dataset(&path).unwrap();
        assert_eq!(Companions::probe(&path).missing().count(), EXTENSIONS.len());
    }

    #[test]
    fn cpg_code_pages_and_labels() {
        assert_eq!(encoding_for_cpg("936\n"), Some(GBK));
        assert_eq!(encoding_for_cpg("UTF-8"), Some(UTF_8));
        assert_eq!(encoding_for_label("gb2312"), Some(GBK));
        assert_eq!(encoding_for_label("latin1"), Some(encoding_rs::WINDOWS_1252));
        assert_eq!(encoding_for_label("no-such-codec"), None);
    }
}
