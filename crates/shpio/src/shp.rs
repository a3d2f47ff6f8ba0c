//! `.shp` geometry records and the `.shx` offset index.

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::Path;

use crate::cursor::{
    bad, be_i32, le_f64, le_i32, need, take, write_be_i32, write_f64, write_i32,
};

pub const SHP_FILE_CODE: i32 = 9994;
pub const SHP_VERSION: i32 = 1000;
pub const SHP_HEADER_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ShapeType {
    Null = 0,
    Point = 1,
    PolyLine = 3,
    Polygon = 5,
    MultiPoint = 8,
    PointZ = 11,
    PolyLineZ = 13,
    PolygonZ = 15,
    MultiPointZ = 18,
    PointM = 21,
    PolyLineM = 23,
    PolygonM = 25,
    MultiPointM = 28,
}

impl ShapeType {
    pub fn from_code(code: i32) -> Option<Self> {
        let t = match code {
            0 => ShapeType::Null,
            1 => ShapeType::Point,
            3 => ShapeType::PolyLine,
            5 => ShapeType::Polygon,
            8 => ShapeType::MultiPoint,
            11 => ShapeType::PointZ,
            13 => ShapeType::PolyLineZ,
            15 => ShapeType::PolygonZ,
            18 => ShapeType::MultiPointZ,
            21 => ShapeType::PointM,
            23 => ShapeType::PolyLineM,
            25 => ShapeType::PolygonM,
            28 => ShapeType::MultiPointM,
            _ => return None,
        };
        Some(t)
    }

    /// The 2-D type carrying the same XY layout; Z and M values are dropped on read.
    pub fn planar(self) -> Self {
        match self {
            ShapeType::PointZ | ShapeType::PointM => ShapeType::Point,
            ShapeType::PolyLineZ | ShapeType::PolyLineM => ShapeType::PolyLine,
            ShapeType::PolygonZ | ShapeType::PolygonM => ShapeType::Polygon,
            ShapeType::MultiPointZ | ShapeType::MultiPointM => ShapeType::MultiPoint,
            other => other,
        }
    }
}

/// One record's geometry. Parts and rings are kept exactly as stored; ring
/// orientation is left for the caller to interpret.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Null,
    Point([f64; 2]),
    MultiPoint(Vec<[f64; 2]>),
    PolyLine(Vec<Vec<[f64; 2]>>),
    Polygon(Vec<Vec<[f64; 2]>>),
}

impl Shape {
    pub fn shape_type(&self) -> ShapeType {
        match self {
            Shape::Null => ShapeType::Null,
            Shape::Point(_) => ShapeType::Point,
            Shape::MultiPoint(_) => ShapeType::MultiPoint,
            Shape::PolyLine(_) => ShapeType::PolyLine,
            Shape::Polygon(_) => ShapeType::Polygon,
        }
    }

    fn for_each_point(&self, mut f: impl FnMut([f64; 2])) {
        match self {
            Shape::Null => {}
            Shape::Point(p) => f(*p),
            Shape::MultiPoint(pts) => pts.iter().copied().for_each(f),
            Shape::PolyLine(parts) | Shape::Polygon(parts) => {
                parts.iter().flatten().copied().for_each(f)
            }
        }
    }

    /// Record content size in bytes (excluding the 8-byte record header).
    fn content_len(&self) -> usize {
        match self {
            Shape::Null => 4,
            Shape::Point(_) => 4 + 16,
            Shape::MultiPoint(pts) => 4 + 32 + 4 + 16 * pts.len(),
            Shape::PolyLine(parts) | Shape::Polygon(parts) => {
                let points: usize = parts.iter().map(Vec::len).sum();
                4 + 32 + 4 + 4 + 4 * parts.len() + 16 * points
            }
        }
    }
}

/// `[xmin, ymin, xmax, ymax]` over every point, or zeros when there are none.
fn bbox_of<'a>(shapes: impl IntoIterator<Item = &'a Shape>) -> [f64; 4] {
    let mut bb = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];

    for shape in shapes {
        shape.for_each_point(|[x, y]| {
            bb[0] = bb[0].min(x);
            bb[1] = bb[1].min(y);
            bb[2] = bb[2].max(x);
            bb[3] = bb[3].max(y);
        });
    }

    if bb[0].is_finite() {
        bb
    } else {
        [0.0; 4]
    }
}

fn count(v: i32, what: &str) -> io::Result<usize> {
    usize::try_from(v).map_err(|_| bad(format!("negative {what} count {v}")))
}

fn read_points(p: &mut &[u8], n: usize) -> io::Result<Vec<[f64; 2]>> {
    let bytes = n.checked_mul(16).ok_or_else(|| bad("point block size overflow"))?;
    need(p, bytes)?;
    let raw = take(p, bytes)?;

    #[cfg(target_endian = "little")]
    {
        // Records are only 2-byte aligned, so read each pair unaligned.
        Ok(raw
            .chunks_exact(16)
            .map(bytemuck::pod_read_unaligned::<[f64; 2]>)
            .collect())
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut raw = raw;
        let mut pts = Vec::with_capacity(n);
        for _ in 0..n {
            pts.push([le_f64(&mut raw)?, le_f64(&mut raw)?]);
        }
        Ok(pts)
    }
}

fn parse_shape(mut c: &[u8]) -> io::Result<Shape> {
    let code = le_i32(&mut c)?;
    let shape_type =
        ShapeType::from_code(code).ok_or_else(|| bad(format!("unknown shape type {code}")))?;

    let shape = match shape_type.planar() {
        ShapeType::Null => Shape::Null,
        ShapeType::Point => Shape::Point([le_f64(&mut c)?, le_f64(&mut c)?]),
        ShapeType::MultiPoint => {
            take(&mut c, 32)?; // bbox
            let n = count(le_i32(&mut c)?, "point")?;
            Shape::MultiPoint(read_points(&mut c, n)?)
        }
        ShapeType::PolyLine | ShapeType::Polygon => {
            take(&mut c, 32)?; // bbox
            let num_parts = count(le_i32(&mut c)?, "part")?;
            let num_points = count(le_i32(&mut c)?, "point")?;

            need(c, num_parts.saturating_mul(4))?;
            let mut starts = Vec::with_capacity(num_parts);
            for _ in 0..num_parts {
                starts.push(count(le_i32(&mut c)?, "part offset")?);
            }

            let points = read_points(&mut c, num_points)?;

            let mut parts = Vec::with_capacity(num_parts);
            for (i, &start) in starts.iter().enumerate() {
                let end = starts.get(i + 1).copied().unwrap_or(num_points);
                if start > end || end > num_points {
                    return Err(bad("part offsets out of order"));
                }
                parts.push(points[start..end].to_vec());
            }

            if shape_type.planar() == ShapeType::Polygon {
                Shape::Polygon(parts)
            } else {
                Shape::PolyLine(parts)
            }
        }
        _ => unreachable!("planar() only yields 2-D types"),
    };

    Ok(shape)
}

/// Parse a `.shp` file image into its declared shape type and records.
pub fn parse_shp_bytes(bytes: &[u8]) -> io::Result<(ShapeType, Vec<Shape>)> {
    let mut p = bytes;

    // Header: the first seven words are big-endian, the rest little-endian.
    if be_i32(&mut p)? != SHP_FILE_CODE {
        return Err(bad("bad shapefile file code"));
    }
    take(&mut p, 20)?;

    let file_words = count(be_i32(&mut p)?, "file length")?;
    if le_i32(&mut p)? != SHP_VERSION {
        return Err(bad("unsupported shapefile version"));
    }

    let code = le_i32(&mut p)?;
    let shape_type =
        ShapeType::from_code(code).ok_or_else(|| bad(format!("unknown shape type {code}")))?;
    take(&mut p, 64)?; // xy bbox, z range, m range

    // Trust the declared length, but never read past what is actually there.
    let end = file_words.saturating_mul(2).min(bytes.len()).max(SHP_HEADER_LEN);
    let mut body = &bytes[SHP_HEADER_LEN..end];

    let mut shapes = Vec::new();
    while body.len() >= 8 {
        let _record_number = be_i32(&mut body)?;
        let words = count(be_i32(&mut body)?, "record length")?;
        let content = take(&mut body, words.saturating_mul(2))?;
        shapes.push(parse_shape(content)?);
    }

    Ok((shape_type, shapes))
}

fn write_header<W: Write>(
    w: &mut W,
    file_bytes: usize,
    shape_type: ShapeType,
    bbox: [f64; 4],
) -> io::Result<()> {
    let words = i32::try_from(file_bytes / 2)
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "shapefile exceeds 2 GiB"))?;

    write_be_i32(w, SHP_FILE_CODE)?;
    for _ in 0..5 {
        write_be_i32(w, 0)?;
    }
    write_be_i32(w, words)?;
    write_i32(w, SHP_VERSION)?;
    write_i32(w, shape_type as i32)?;

    for v in bbox {
        write_f64(w, v)?;
    }

    // Z and M ranges are unused for 2-D types.
    for _ in 0..4 {
        write_f64(w, 0.0)?;
    }

    Ok(())
}

fn write_shape<W: Write>(w: &mut W, shape: &Shape) -> io::Result<()> {
    write_i32(w, shape.shape_type() as i32)?;

    match shape {
        Shape::Null => {}
        Shape::Point([x, y]) => {
            write_f64(w, *x)?;
            write_f64(w, *y)?;
        }
        Shape::MultiPoint(pts) => {
            for v in bbox_of([shape]) {
                write_f64(w, v)?;
            }
            write_i32(w, pts.len() as i32)?;
            for [x, y] in pts {
                write_f64(w, *x)?;
                write_f64(w, *y)?;
            }
        }
        Shape::PolyLine(parts) | Shape::Polygon(parts) => {
            for v in bbox_of([shape]) {
                write_f64(w, v)?;
            }

            let total: usize = parts.iter().map(Vec::len).sum();
            write_i32(w, parts.len() as i32)?;
            write_i32(w, total as i32)?;

            let mut start = 0usize;
            for part in parts {
                write_i32(w, start as i32)?;
                start += part.len();
            }

            for [x, y] in parts.iter().flatten() {
                write_f64(w, *x)?;
                write_f64(w, *y)?;
            }
        }
    }

    Ok(())
}

/// Write the `.shp` records and their `.shx` index. Every shape must either be
/// `Null` or match `shape_type`.
pub fn write_shp<P: AsRef<Path>, Q: AsRef<Path>>(
    shp_path: P,
    shx_path: Q,
    shape_type: ShapeType,
    shapes: &[Shape],
) -> io::Result<()> {
    if let Some(odd) = shapes
        .iter()
        .find(|s| !matches!(s, Shape::Null) && s.shape_type() != shape_type)
    {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{:?} record in a {:?} layer", odd.shape_type(), shape_type),
        ));
    }

    let bbox = bbox_of(shapes);
    let shp_bytes = SHP_HEADER_LEN + shapes.iter().map(|s| 8 + s.content_len()).sum::<usize>();
    let shx_bytes = SHP_HEADER_LEN + 8 * shapes.len();

    let mut shp = BufWriter::new(File::create(shp_path)?);
    let mut shx = BufWriter::new(File::create(shx_path)?);

    write_header(&mut shp, shp_bytes, shape_type, bbox)?;
    write_header(&mut shx, shx_bytes, shape_type, bbox)?;

    let mut offset = SHP_HEADER_LEN;
    for (index, shape) in shapes.iter().enumerate() {
        let content = shape.content_len();

        write_be_i32(&mut shp, index as i32 + 1)?;
        write_be_i32(&mut shp, (content / 2) as i32)?;
        write_shape(&mut shp, shape)?;

        write_be_i32(&mut shx, (offset / 2) as i32)?;
        write_be_i32(&mut shx, (content / 2) as i32)?;

        offset += 8 + content;
    }

    shp.flush()?;
    shx.flush()?;

    Ok(())
}
