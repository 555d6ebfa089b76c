//! GeoPackage geometry blobs: a small header (magic, version, flags, srs id,
//! optional envelope) wrapped around well-known-binary. Only 2D geometries
//! travel through this tool.

use crate::error::GeoparcelError;

const MAGIC: [u8; 2] = [0x47, 0x50]; // "GP"
const WKB_POINT: u32 = 1;
const WKB_LINE_STRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTI_POINT: u32 = 4;
const WKB_MULTI_LINE_STRING: u32 = 5;
const WKB_MULTI_POLYGON: u32 = 6;

pub type Coord = (f64, f64);

/// One simple geometry body. Multi geometries are handled as lists of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    Polygon(Vec<Vec<Coord>>),
}

impl Geometry {
    fn multi_type_code(&self) -> u32 {
        match self {
            Geometry::Point(_) => WKB_MULTI_POINT,
            Geometry::LineString(_) => WKB_MULTI_LINE_STRING,
            Geometry::Polygon(_) => WKB_MULTI_POLYGON,
        }
    }
}

/// Wraps WKB in a GeoPackage geometry blob header (little endian, no
/// envelope).
pub fn wrap_gpkg(srs_id: i32, wkb: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 + wkb.len());
    blob.extend_from_slice(&MAGIC);
    blob.push(0); // version
    blob.push(0b0000_0001); // little endian, no envelope
    blob.extend_from_slice(&srs_id.to_le_bytes());
    blob.extend_from_slice(wkb);
    blob
}

/// Splits a GeoPackage geometry blob into its srs id and WKB payload.
pub fn unwrap_gpkg(blob: &[u8]) -> Result<(i32, &[u8]), GeoparcelError> {
    if blob.len() < 8 || blob[..2] != MAGIC {
        return Err(GeoparcelError::InvalidGeometry(
            "missing GeoPackage header".to_string(),
        ));
    }
    let flags = blob[3];
    let little_endian = flags & 0b0000_0001 == 1;
    let envelope_size = match (flags >> 1) & 0b0000_0111 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => {
            return Err(GeoparcelError::InvalidGeometry(format!(
                "invalid envelope indicator {other}"
            )));
        }
    };
    let srs_bytes: [u8; 4] = blob[4..8]
        .try_into()
        .map_err(|_| GeoparcelError::InvalidGeometry("truncated header".to_string()))?;
    let srs_id = if little_endian {
        i32::from_le_bytes(srs_bytes)
    } else {
        i32::from_be_bytes(srs_bytes)
    };
    let payload_start = 8 + envelope_size;
    if blob.len() < payload_start {
        return Err(GeoparcelError::InvalidGeometry(
            "truncated envelope".to_string(),
        ));
    }
    Ok((srs_id, &blob[payload_start..]))
}

/// Merges a set of GeoPackage geometry blobs into one multi geometry of the
/// shared family, promoting singles and flattening multis. Mixed families
/// are an error. The merged blob carries the first input's srs id.
pub fn merge_geometries(blobs: &[Vec<u8>]) -> Result<Vec<u8>, GeoparcelError> {
    let first = blobs
        .first()
        .ok_or_else(|| GeoparcelError::GeometryMerge("no geometries to merge".to_string()))?;
    let (srs_id, _) = unwrap_gpkg(first)?;

    let mut parts: Vec<Geometry> = Vec::new();
    for blob in blobs {
        let (_, wkb) = unwrap_gpkg(blob)?;
        parts.extend(parse_wkb(wkb)?);
    }

    let type_code = parts
        .first()
        .ok_or_else(|| GeoparcelError::GeometryMerge("only empty geometries".to_string()))?
        .multi_type_code();
    if parts.iter().any(|part| part.multi_type_code() != type_code) {
        return Err(GeoparcelError::GeometryMerge(
            "geometry types differ".to_string(),
        ));
    }

    Ok(wrap_gpkg(srs_id, &write_multi(type_code, &parts)))
}

/// Parses WKB into simple geometry bodies, flattening multi geometries.
pub fn parse_wkb(wkb: &[u8]) -> Result<Vec<Geometry>, GeoparcelError> {
    let mut reader = Reader::new(wkb);
    let parts = read_geometry(&mut reader)?;
    Ok(parts)
}

pub fn point_wkb(x: f64, y: f64) -> Vec<u8> {
    let mut out = wkb_header(WKB_POINT);
    write_coord(&mut out, (x, y));
    out
}

pub fn line_string_wkb(coords: &[Coord]) -> Vec<u8> {
    let mut out = wkb_header(WKB_LINE_STRING);
    write_coord_seq(&mut out, coords);
    out
}

/// `rings[0]` is the exterior ring; rings are expected to be closed.
pub fn polygon_wkb(rings: &[Vec<Coord>]) -> Vec<u8> {
    let mut out = wkb_header(WKB_POLYGON);
    out.extend_from_slice(&(rings.len() as u32).to_le_bytes());
    for ring in rings {
        write_coord_seq(&mut out, ring);
    }
    out
}

pub fn multi_point_wkb(coords: &[Coord]) -> Vec<u8> {
    let parts: Vec<Geometry> = coords.iter().map(|c| Geometry::Point(*c)).collect();
    write_multi(WKB_MULTI_POINT, &parts)
}

pub fn multi_polygon_wkb(polygons: &[Vec<Vec<Coord>>]) -> Vec<u8> {
    let parts: Vec<Geometry> = polygons
        .iter()
        .map(|rings| Geometry::Polygon(rings.clone()))
        .collect();
    write_multi(WKB_MULTI_POLYGON, &parts)
}

fn wkb_header(type_code: u32) -> Vec<u8> {
    let mut out = vec![1u8]; // little endian
    out.extend_from_slice(&type_code.to_le_bytes());
    out
}

fn write_coord(out: &mut Vec<u8>, coord: Coord) {
    out.extend_from_slice(&coord.0.to_le_bytes());
    out.extend_from_slice(&coord.1.to_le_bytes());
}

fn write_coord_seq(out: &mut Vec<u8>, coords: &[Coord]) {
    out.extend_from_slice(&(coords.len() as u32).to_le_bytes());
    for coord in coords {
        write_coord(out, *coord);
    }
}

fn write_geometry(out: &mut Vec<u8>, geometry: &Geometry) {
    match geometry {
        Geometry::Point(coord) => {
            out.extend_from_slice(&point_wkb(coord.0, coord.1));
        }
        Geometry::LineString(coords) => {
            out.extend_from_slice(&line_string_wkb(coords));
        }
        Geometry::Polygon(rings) => {
            out.extend_from_slice(&polygon_wkb(rings));
        }
    }
}

fn write_multi(type_code: u32, parts: &[Geometry]) -> Vec<u8> {
    let mut out = wkb_header(type_code);
    out.extend_from_slice(&(parts.len() as u32).to_le_bytes());
    for part in parts {
        write_geometry(&mut out, part);
    }
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], GeoparcelError> {
        let end = self.offset + count;
        if end > self.bytes.len() {
            return Err(GeoparcelError::InvalidGeometry(
                "truncated wkb".to_string(),
            ));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, GeoparcelError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self, little_endian: bool) -> Result<u32, GeoparcelError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap_or([0; 4]);
        Ok(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn read_f64(&mut self, little_endian: bool) -> Result<f64, GeoparcelError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap_or([0; 8]);
        Ok(if little_endian {
            f64::from_le_bytes(bytes)
        } else {
            f64::from_be_bytes(bytes)
        })
    }

    fn read_coord(&mut self, little_endian: bool) -> Result<Coord, GeoparcelError> {
        Ok((self.read_f64(little_endian)?, self.read_f64(little_endian)?))
    }

    fn read_coord_seq(&mut self, little_endian: bool) -> Result<Vec<Coord>, GeoparcelError> {
        let count = self.read_u32(little_endian)? as usize;
        let mut coords = Vec::with_capacity(count);
        for _ in 0..count {
            coords.push(self.read_coord(little_endian)?);
        }
        Ok(coords)
    }
}

fn read_geometry(reader: &mut Reader<'_>) -> Result<Vec<Geometry>, GeoparcelError> {
    let little_endian = reader.read_u8()? == 1;
    let type_code = reader.read_u32(little_endian)?;
    match type_code {
        WKB_POINT => Ok(vec![Geometry::Point(reader.read_coord(little_endian)?)]),
        WKB_LINE_STRING => Ok(vec![Geometry::LineString(
            reader.read_coord_seq(little_endian)?,
        )]),
        WKB_POLYGON => {
            let ring_count = reader.read_u32(little_endian)? as usize;
            let mut rings = Vec::with_capacity(ring_count);
            for _ in 0..ring_count {
                rings.push(reader.read_coord_seq(little_endian)?);
            }
            Ok(vec![Geometry::Polygon(rings)])
        }
        WKB_MULTI_POINT | WKB_MULTI_LINE_STRING | WKB_MULTI_POLYGON => {
            let count = reader.read_u32(little_endian)? as usize;
            let mut parts = Vec::with_capacity(count);
            for _ in 0..count {
                parts.extend(read_geometry(reader)?);
            }
            Ok(parts)
        }
        other => Err(GeoparcelError::InvalidGeometry(format!(
            "unsupported wkb type {other}"
        ))),
    }
}
