// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Conversion between relational geometry values and OGR geometries
//!
//! Relational values are EWKB; OGR geometries are held as ISO WKB plus a
//! spatial reference tag. Values always cross through their binary form, which
//! means parsing is strict: unclosed rings, rings with fewer than four points,
//! single point line strings and trailing bytes are rejected with the reason
//! reported rather than silently producing a null.
use std::str::FromStr;

use arrow_schema::DataType;
use datafusion_common::{exec_err, DataFusionError, Result, ScalarValue};
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, GeometryType, LineStringTrait,
    MultiLineStringTrait, MultiPolygonTrait, PolygonTrait,
};
use sedona_ogr_geometry::{
    bounding_box::BoundingBox,
    bounds::wkb_bounds_xy,
    error::SedonaGeometryError,
    ewkb::{ewkb_to_iso, iso_to_ewkb, WkbHeader},
    types::GeometryTypeId,
};
use thiserror::Error;
use wkb::{
    reader::{read_wkb, Wkb},
    writer::{write_geometry, WriteOptions},
    Endianness,
};
use wkt::Wkt;

use crate::type_catalog::{binary_bytes, binary_scalar, ReceiveFn, SendFn};

/// Errors raised while converting geometry values
#[derive(Debug, Error)]
pub enum CodecError {
    /// The relational value is not a geometry value
    #[error("Invalid geometry value: {0}")]
    InvalidValue(String),
    /// The geometry encoding was rejected
    #[error("Failed to parse geometry: {0}")]
    Parse(String),
    #[error(transparent)]
    DataFusion(#[from] DataFusionError),
}

impl From<SedonaGeometryError> for CodecError {
    fn from(value: SedonaGeometryError) -> Self {
        CodecError::Parse(value.to_string())
    }
}

impl From<CodecError> for DataFusionError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::DataFusion(err) => err,
            other => DataFusionError::External(Box::new(other)),
        }
    }
}

/// A geometry as handed to an OGR layer
///
/// The ISO WKB held here has been validated; the SRID is the spatial reference
/// the geometry is tagged with, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct OgrGeometry {
    wkb: Vec<u8>,
    srid: Option<i32>,
}

impl OgrGeometry {
    /// Parse ISO WKB or EWKB
    pub fn try_from_wkb(buf: &[u8]) -> Result<Self, CodecError> {
        let (iso, srid) = ewkb_to_iso(buf)?;
        let wkb = read_wkb(&iso).map_err(|e| CodecError::Parse(e.to_string()))?;
        validate_geometry(&wkb)?;
        Ok(Self { wkb: iso, srid })
    }

    /// Parse WKT with an optional `SRID=<srid>;` prefix
    pub fn try_from_wkt(text: &str) -> Result<Self, CodecError> {
        let (srid, wkt_text) = split_srid_prefix(text)?;
        let wkt = Wkt::<f64>::from_str(wkt_text).map_err(|e| CodecError::Parse(e.to_string()))?;
        let mut iso = Vec::new();
        write_geometry(
            &mut iso,
            &wkt,
            &WriteOptions {
                endianness: Endianness::LittleEndian,
            },
        )
        .map_err(|e| CodecError::Parse(e.to_string()))?;

        Ok(Self::try_from_wkb(&iso)?.with_srid(srid))
    }

    /// Replace the spatial reference tag (an SRID of zero removes it)
    pub fn with_srid(self, srid: Option<i32>) -> Self {
        Self {
            wkb: self.wkb,
            srid: srid.filter(|srid| *srid != 0),
        }
    }

    pub fn srid(&self) -> Option<i32> {
        self.srid
    }

    pub fn as_iso_wkb(&self) -> &[u8] {
        &self.wkb
    }

    /// A reader over the ISO WKB
    pub fn wkb(&self) -> Result<Wkb<'_>, CodecError> {
        read_wkb(&self.wkb).map_err(|e| CodecError::Parse(e.to_string()))
    }

    /// EWKB tagged with this geometry's SRID
    pub fn to_ewkb(&self) -> Result<Vec<u8>, CodecError> {
        Ok(iso_to_ewkb(&self.wkb, self.srid)?)
    }

    pub fn geometry_type(&self) -> Result<GeometryTypeId, CodecError> {
        Ok(WkbHeader::try_new(&self.wkb)?.geometry_type())
    }

    /// The XY extent (empty for empty geometries)
    pub fn bounding_box(&self) -> Result<BoundingBox, CodecError> {
        Ok(wkb_bounds_xy(&self.wkb)?)
    }

    pub fn is_empty(&self) -> Result<bool, CodecError> {
        Ok(self.bounding_box()?.is_empty())
    }

    /// Render as WKT (without any SRID prefix)
    pub fn to_wkt(&self) -> Result<String, CodecError> {
        let mut out = String::new();
        wkt::to_wkt::write_geometry(&mut out, &self.wkb()?)
            .map_err(|e| CodecError::Parse(e.to_string()))?;
        Ok(out)
    }
}

/// Convert a relational geometry value into an OGR geometry
///
/// The value is serialized through `send` and the result parsed strictly. A
/// NULL value has no OGR geometry.
pub fn value_to_external_geometry(
    value: &ScalarValue,
    send: SendFn,
) -> Result<Option<OgrGeometry>, CodecError> {
    if value.is_null() {
        return Ok(None);
    }

    if binary_bytes(value).is_none() {
        return Err(CodecError::InvalidValue(format!(
            "expected a binary value but got {}",
            value.data_type()
        )));
    }

    let bytes = send(value)?;
    OgrGeometry::try_from_wkb(&bytes).map(Some)
}

/// Convert an OGR geometry into a relational value through `receive`
///
/// `srid` overrides the geometry's own spatial reference tag when provided.
pub fn external_geometry_to_value(
    geometry: &OgrGeometry,
    receive: ReceiveFn,
    receive_param: &DataType,
    srid: Option<i32>,
) -> Result<ScalarValue, CodecError> {
    let srid = srid.or(geometry.srid());
    let ewkb = iso_to_ewkb(geometry.as_iso_wkb(), srid)?;
    Ok(receive(&ewkb, receive_param)?)
}

/// Retag an EWKB value with `srid` (zero or `None` removes the tag)
pub fn set_srid(value: &ScalarValue, srid: Option<i32>) -> Result<ScalarValue> {
    if value.is_null() {
        return Ok(value.clone());
    }

    let Some(bytes) = binary_bytes(value) else {
        return exec_err!("Can't set SRID on non-geometry value {value:?}");
    };

    let ewkb = iso_to_ewkb(bytes, srid).map_err(CodecError::from)?;
    binary_scalar(ewkb, &value.data_type())
}

/// The SRID carried by a column's type modifier
///
/// Type modifiers pack the SRID into bits 8 to 28 as a signed value; zero means
/// no SRID.
pub fn typmod_srid(typmod: i32) -> Option<i32> {
    if typmod < 0 {
        return None;
    }

    let srid = ((typmod & 0x0FFFFF00) - (typmod & 0x10000000)) >> 8;
    if srid == 0 {
        None
    } else {
        Some(srid)
    }
}

/// Pack an SRID into a type modifier (the inverse of [typmod_srid])
pub fn srid_typmod(srid: Option<i32>) -> i32 {
    match srid {
        Some(srid) => (srid << 8) & 0x1FFFFF00,
        None => 0,
    }
}

pub(crate) fn geometry_send(value: &ScalarValue) -> Result<Vec<u8>> {
    let Some(bytes) = binary_bytes(value) else {
        return exec_err!("Can't send non-geometry value {value:?}");
    };

    let srid = WkbHeader::try_new(bytes).map_err(CodecError::from)?.srid();
    Ok(iso_to_ewkb(bytes, srid).map_err(CodecError::from)?)
}

pub(crate) fn geometry_receive(buf: &[u8], storage_type: &DataType) -> Result<ScalarValue> {
    let srid = WkbHeader::try_new(buf).map_err(CodecError::from)?.srid();
    let ewkb = iso_to_ewkb(buf, srid).map_err(CodecError::from)?;
    binary_scalar(ewkb, storage_type)
}

pub(crate) fn geometry_text_out(value: &ScalarValue) -> Result<String> {
    let Some(bytes) = binary_bytes(value) else {
        return exec_err!("Can't render non-geometry value {value:?}");
    };

    let geometry = OgrGeometry::try_from_wkb(bytes)?;
    let wkt = geometry.to_wkt()?;
    match geometry.srid() {
        Some(srid) => Ok(format!("SRID={srid};{wkt}")),
        None => Ok(wkt),
    }
}

pub(crate) fn geometry_text_in(text: &str, storage_type: &DataType) -> Result<ScalarValue> {
    let geometry = OgrGeometry::try_from_wkt(text)?;
    binary_scalar(geometry.to_ewkb()?, storage_type)
}

fn split_srid_prefix(text: &str) -> Result<(Option<i32>, &str), CodecError> {
    let text = text.trim();
    let Some(rest) = text
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("SRID="))
        .map(|_| &text[5..])
    else {
        return Ok((None, text));
    };

    let Some((srid, wkt_text)) = rest.split_once(';') else {
        return Err(CodecError::Parse(format!("Missing ';' after SRID in '{text}'")));
    };

    let srid = srid
        .trim()
        .parse::<i32>()
        .map_err(|e| CodecError::Parse(format!("Invalid SRID '{srid}': {e}")))?;
    Ok((Some(srid).filter(|srid| *srid != 0), wkt_text.trim()))
}

fn validate_geometry(geom: &impl GeometryTrait<T = f64>) -> Result<(), CodecError> {
    match geom.as_type() {
        GeometryType::Point(_) | GeometryType::MultiPoint(_) => Ok(()),
        GeometryType::LineString(ls) => validate_line_string(ls),
        GeometryType::Polygon(pl) => validate_polygon(pl),
        GeometryType::MultiLineString(multi_ls) => {
            for ls in multi_ls.line_strings() {
                validate_line_string(&ls)?;
            }
            Ok(())
        }
        GeometryType::MultiPolygon(multi_pl) => {
            for pl in multi_pl.polygons() {
                validate_polygon(&pl)?;
            }
            Ok(())
        }
        GeometryType::GeometryCollection(collection) => {
            for geom in collection.geometries() {
                validate_geometry(&geom)?;
            }
            Ok(())
        }
        _ => Err(CodecError::Parse("Unsupported geometry type".to_string())),
    }
}

fn validate_line_string(ls: &impl LineStringTrait<T = f64>) -> Result<(), CodecError> {
    if ls.num_coords() == 1 {
        return Err(CodecError::Parse(
            "LineString must have at least two points".to_string(),
        ));
    }

    Ok(())
}

fn validate_polygon(pl: &impl PolygonTrait<T = f64>) -> Result<(), CodecError> {
    if let Some(exterior) = pl.exterior() {
        validate_ring(&exterior)?;
    }

    for interior in pl.interiors() {
        validate_ring(&interior)?;
    }

    Ok(())
}

fn validate_ring(ring: &impl LineStringTrait<T = f64>) -> Result<(), CodecError> {
    let num_coords = ring.num_coords();
    if num_coords < 4 {
        return Err(CodecError::Parse(format!(
            "Polygon ring must have at least four points but has {num_coords}"
        )));
    }

    let first = ring.coords().next();
    let last = ring.coords().last();
    match (first, last) {
        (Some(first), Some(last)) if first.x() == last.x() && first.y() == last.y() => Ok(()),
        _ => Err(CodecError::Parse("Polygon ring is not closed".to_string())),
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use crate::type_catalog::{ArrowTypeCatalog, RelationalType, TypeCatalog};

    use super::*;

    fn ewkb(wkt_text: &str, srid: Option<i32>) -> Vec<u8> {
        OgrGeometry::try_from_wkt(wkt_text)
            .unwrap()
            .with_srid(srid)
            .to_ewkb()
            .unwrap()
    }

    fn iso_wkb(wkt_text: &str) -> Vec<u8> {
        let wkt = Wkt::<f64>::from_str(wkt_text).unwrap();
        let mut out = Vec::new();
        write_geometry(
            &mut out,
            &wkt,
            &WriteOptions {
                endianness: Endianness::LittleEndian,
            },
        )
        .unwrap();
        out
    }

    fn conversions() -> crate::type_catalog::ConversionFunctions {
        ArrowTypeCatalog
            .resolve(&RelationalType::Geometry(DataType::Binary))
            .unwrap()
    }

    #[rstest]
    fn value_round_trip(
        #[values(
            "POINT (1 2)",
            "POINT Z (1 2 3)",
            "POINT M (1 2 4)",
            "LINESTRING (0 0, 1 1, 2 0)",
            "POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0), (1 1, 2 1, 2 2, 1 1))",
            "MULTIPOLYGON (((0 0, 1 0, 1 1, 0 0)), ((5 5, 6 5, 6 6, 5 5)))",
            "GEOMETRYCOLLECTION (POINT (1 2), LINESTRING (0 0, 1 1))",
            "POLYGON EMPTY"
        )]
        wkt_text: &str,
        #[values(None, Some(4326))] srid: Option<i32>,
    ) {
        let conversions = conversions();
        let value = ScalarValue::Binary(Some(ewkb(wkt_text, srid)));

        let geometry = value_to_external_geometry(&value, conversions.send)
            .unwrap()
            .unwrap();
        assert_eq!(geometry.srid(), srid);

        let back = external_geometry_to_value(
            &geometry,
            conversions.receive,
            &conversions.receive_param,
            None,
        )
        .unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn null_value() {
        let conversions = conversions();
        assert_eq!(
            value_to_external_geometry(&ScalarValue::Binary(None), conversions.send).unwrap(),
            None
        );
    }

    #[test]
    fn not_a_geometry_value() {
        let conversions = conversions();
        let err =
            value_to_external_geometry(&ScalarValue::Int32(Some(1)), conversions.send).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue(_)));
    }

    #[rstest]
    #[case("POLYGON ((0 0, 10 0, 10 10, 0 10))", "not closed")]
    #[case("POLYGON ((0 0, 10 0, 0 0))", "at least four points")]
    #[case("LINESTRING (0 0)", "at least two points")]
    #[case("MULTILINESTRING ((0 0, 1 1), (2 2))", "at least two points")]
    #[case("GEOMETRYCOLLECTION (POLYGON ((0 0, 1 0, 1 1, 0 1)))", "not closed")]
    fn strict_parse(#[case] wkt_text: &str, #[case] reason: &str) {
        let err = OgrGeometry::try_from_wkb(&iso_wkb(wkt_text)).unwrap_err();
        assert!(matches!(err, CodecError::Parse(_)));
        assert!(err.to_string().contains(reason), "{err}");

        let conversions = conversions();
        let value = ScalarValue::Binary(Some(iso_wkb(wkt_text)));
        assert!(value_to_external_geometry(&value, conversions.send).is_err());
    }

    #[test]
    fn parse_errors_carry_reason() {
        let err = OgrGeometry::try_from_wkb(&[0x01, 0x01, 0x00]).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse geometry: "));

        let mut trailing = iso_wkb("POINT (1 2)");
        trailing.push(0);
        assert!(OgrGeometry::try_from_wkb(&trailing).is_err());

        assert!(OgrGeometry::try_from_wkt("POINT (1").is_err());
        assert!(OgrGeometry::try_from_wkt("SRID=abc;POINT (1 2)").is_err());
        assert!(OgrGeometry::try_from_wkt("SRID=4326 POINT (1 2)").is_err());

        let df_err: DataFusionError = err.into();
        assert!(matches!(df_err, DataFusionError::External(_)));
    }

    #[test]
    fn geometry_accessors() {
        let geometry = OgrGeometry::try_from_wkt("srid=3857;LINESTRING (0 1, 2 3)").unwrap();
        assert_eq!(geometry.srid(), Some(3857));
        assert_eq!(geometry.geometry_type().unwrap(), GeometryTypeId::LineString);
        assert_eq!(geometry.bounding_box().unwrap(), BoundingBox::new(0.0, 1.0, 2.0, 3.0));
        assert_eq!(geometry.to_wkt().unwrap(), "LINESTRING(0 1,2 3)");
        assert_eq!(geometry.as_iso_wkb(), iso_wkb("LINESTRING (0 1, 2 3)"));
        assert!(!geometry.is_empty().unwrap());

        let untagged = geometry.with_srid(Some(0));
        assert_eq!(untagged.srid(), None);

        let empty = OgrGeometry::try_from_wkt("POINT EMPTY").unwrap();
        assert!(empty.is_empty().unwrap());
    }

    #[test]
    fn srid_override() {
        let conversions = conversions();
        let geometry = OgrGeometry::try_from_wkt("SRID=4326;POINT (1 2)").unwrap();
        let value = external_geometry_to_value(
            &geometry,
            conversions.receive,
            &conversions.receive_param,
            Some(2154),
        )
        .unwrap();
        assert_eq!(value, ScalarValue::Binary(Some(ewkb("POINT (1 2)", Some(2154)))));
    }

    #[test]
    fn set_srid_on_values() {
        let value = ScalarValue::Binary(Some(ewkb("POINT (1 2)", None)));
        let tagged = set_srid(&value, Some(4326)).unwrap();
        assert_eq!(tagged, ScalarValue::Binary(Some(ewkb("POINT (1 2)", Some(4326)))));
        assert_eq!(set_srid(&tagged, Some(0)).unwrap(), value);
        assert_eq!(
            set_srid(&ScalarValue::Binary(None), Some(4326)).unwrap(),
            ScalarValue::Binary(None)
        );
        assert!(set_srid(&ScalarValue::Utf8(Some("x".to_string())), None).is_err());
    }

    #[rstest]
    #[case(None)]
    #[case(Some(4326))]
    #[case(Some(3857))]
    #[case(Some(-1))]
    fn typmod(#[case] srid: Option<i32>) {
        assert_eq!(typmod_srid(srid_typmod(srid)), srid);
    }

    #[test]
    fn typmod_unset() {
        assert_eq!(typmod_srid(-1), None);
        assert_eq!(typmod_srid(0), None);
    }
}
