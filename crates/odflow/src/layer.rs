//! In-memory spatial layer and its conversion to and from shapefile records.

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Winding};
use shpio::{Dataset, Shape, ShapeType, Table};

pub use shpio::{FieldDef, FieldKind, FieldValue};

/// Name the geometry column is reported under next to the attribute fields.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Coordinate reference system, carried as the `.prj` WKT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crs {
    wkt: String,
}

impl Crs {
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self { wkt: wkt.into() }
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    /// Lon/lat systems measure lengths in degrees.
    pub fn is_geographic(&self) -> bool {
        let head = self.wkt.trim_start().to_ascii_uppercase();
        head.starts_with("GEOGCS") || head.starts_with("GEOGCRS") || head.starts_with("GEODCRS")
    }

    /// The quoted name right after the WKT keyword, if any.
    pub fn name(&self) -> Option<&str> {
        let start = self.wkt.find('"')? + 1;
        let len = self.wkt[start..].find('"')?;
        Some(&self.wkt[start..start + len])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    /// One value per layer field, in field order.
    pub values: Vec<FieldValue>,
}

/// Ordered features sharing one attribute schema and CRS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpatialLayer {
    pub fields: Vec<FieldDef>,
    pub features: Vec<Feature>,
    pub crs: Option<Crs>,
}

impl SpatialLayer {
    pub fn new(fields: Vec<FieldDef>, crs: Option<Crs>) -> Self {
        Self { fields, features: Vec::new(), crs }
    }

    pub fn push(&mut self, geometry: Option<Geometry<f64>>, values: Vec<FieldValue>) {
        debug_assert_eq!(values.len(), self.fields.len(), "row width must match the schema");
        self.features.push(Feature { geometry, values });
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Columns including geometry, so a geometry-only layer counts 1.
    pub fn column_count(&self) -> usize {
        self.fields.len() + 1
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Each feature paired with its value in column `name`.
    pub fn column<'a>(
        &'a self,
        name: &str,
    ) -> Option<impl Iterator<Item = (&'a Feature, &'a FieldValue)> + 'a> {
        let index = self.field_index(name)?;
        Some(
            self.features
                .iter()
                .map(move |feature| (feature, &feature.values[index])),
        )
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        let Dataset { shapes, table, prj, .. } = dataset;

        let features = shapes
            .into_iter()
            .zip(table.records)
            .map(|(shape, values)| Feature {
                geometry: shape_to_geometry(shape),
                values,
            })
            .collect();

        Self {
            fields: table.fields,
            features,
            crs: prj.filter(|wkt| !wkt.is_empty()).map(Crs::from_wkt),
        }
    }

    /// Records for writing. Fails when geometries of different shapefile
    /// families (points, lines, polygons) are mixed.
    pub fn to_dataset(&self) -> Result<Dataset, String> {
        let mut shape_type = ShapeType::Null;
        let mut shapes = Vec::with_capacity(self.features.len());

        for (index, feature) in self.features.iter().enumerate() {
            let shape = match &feature.geometry {
                Some(geometry) => geometry_to_shape(geometry)
                    .map_err(|detail| format!("feature {index}: {detail}"))?,
                None => Shape::Null,
            };

            let this_type = shape.shape_type();
            if this_type != ShapeType::Null {
                if shape_type == ShapeType::Null {
                    shape_type = this_type;
                } else if shape_type != this_type {
                    return Err(format!(
                        "feature {index}: {this_type:?} geometry in a {shape_type:?} layer"
                    ));
                }
            }

            shapes.push(shape);
        }

        Ok(Dataset {
            shape_type,
            shapes,
            table: Table {
                fields: self.fields.clone(),
                records: self.features.iter().map(|f| f.values.clone()).collect(),
            },
            prj: self.crs.as_ref().map(|crs| crs.wkt().to_owned()),
        })
    }
}

fn to_line_string(points: Vec<[f64; 2]>) -> LineString<f64> {
    LineString::from(points)
}

fn to_points(line: &LineString<f64>) -> Vec<[f64; 2]> {
    line.coords().map(|c| [c.x, c.y]).collect()
}

/// Clockwise rings start a new polygon, counter-clockwise rings are holes of
/// the polygon before them. A leading hole is promoted to an outer ring.
fn assemble_polygons(rings: Vec<Vec<[f64; 2]>>) -> Vec<Polygon<f64>> {
    let mut shells: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();

    for ring in rings {
        let ring = to_line_string(ring);
        if ring.is_ccw() && !shells.is_empty() {
            if let Some((_, holes)) = shells.last_mut() {
                holes.push(ring);
            }
        } else {
            shells.push((ring, Vec::new()));
        }
    }

    shells
        .into_iter()
        .map(|(exterior, interiors)| Polygon::new(exterior, interiors))
        .collect()
}

pub fn shape_to_geometry(shape: Shape) -> Option<Geometry<f64>> {
    let geometry = match shape {
        Shape::Null => return None,
        Shape::Point([x, y]) => Geometry::Point(Point::new(x, y)),
        Shape::MultiPoint(points) => Geometry::MultiPoint(MultiPoint::new(
            points.into_iter().map(|[x, y]| Point::new(x, y)).collect(),
        )),
        Shape::PolyLine(mut parts) => {
            if parts.is_empty() {
                return None;
            }
            if parts.len() == 1 {
                Geometry::LineString(to_line_string(parts.remove(0)))
            } else {
                Geometry::MultiLineString(MultiLineString::new(
                    parts.into_iter().map(to_line_string).collect(),
                ))
            }
        }
        Shape::Polygon(rings) => {
            let mut polygons = assemble_polygons(rings);
            match polygons.len() {
                0 => return None,
                1 => Geometry::Polygon(polygons.remove(0)),
                _ => Geometry::MultiPolygon(MultiPolygon::new(polygons)),
            }
        }
    };

    Some(geometry)
}

fn polygon_rings(polygon: &Polygon<f64>, rings: &mut Vec<Vec<[f64; 2]>>) {
    let mut exterior = polygon.exterior().clone();
    exterior.make_cw_winding();
    rings.push(to_points(&exterior));

    for interior in polygon.interiors() {
        let mut hole = interior.clone();
        hole.make_ccw_winding();
        rings.push(to_points(&hole));
    }
}

pub fn geometry_to_shape(geometry: &Geometry<f64>) -> Result<Shape, String> {
    let shape = match geometry {
        Geometry::Point(p) => Shape::Point([p.x(), p.y()]),
        Geometry::MultiPoint(mp) => Shape::MultiPoint(mp.iter().map(|p| [p.x(), p.y()]).collect()),
        Geometry::Line(line) => {
            let Coord { x: x0, y: y0 } = line.start;
            let Coord { x: x1, y: y1 } = line.end;
            Shape::PolyLine(vec![vec![[x0, y0], [x1, y1]]])
        }
        Geometry::LineString(ls) => Shape::PolyLine(vec![to_points(ls)]),
        Geometry::MultiLineString(mls) => Shape::PolyLine(mls.iter().map(to_points).collect()),
        Geometry::Polygon(polygon) => {
            let mut rings = Vec::new();
            polygon_rings(polygon, &mut rings);
            Shape::Polygon(rings)
        }
        Geometry::MultiPolygon(mp) => {
            let mut rings = Vec::new();
            for polygon in mp {
                polygon_rings(polygon, &mut rings);
            }
            Shape::Polygon(rings)
        }
        Geometry::Rect(rect) => return geometry_to_shape(&Geometry::Polygon(rect.to_polygon())),
        Geometry::Triangle(tri) => return geometry_to_shape(&Geometry::Polygon(tri.to_polygon())),
        Geometry::GeometryCollection(_) => {
            return Err("geometry collections have no shapefile representation".to_owned())
        }
    };

    Ok(shape)
}
