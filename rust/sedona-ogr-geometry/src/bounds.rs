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
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, GeometryType, LineStringTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait,
};

use crate::{bounding_box::BoundingBox, error::SedonaGeometryError};

/// Calculate the Cartesian XY bounds of a well-known binary geometry blob
///
/// Z and M ordinates are ignored: the result is the rectangle a layer's spatial
/// index understands. The input must be ISO WKB (see [crate::ewkb] to strip
/// extended headers first).
pub fn wkb_bounds_xy(wkb_value: &[u8]) -> Result<BoundingBox, SedonaGeometryError> {
    let wkb =
        wkb::reader::read_wkb(wkb_value).map_err(|e| SedonaGeometryError::External(Box::new(e)))?;
    geo_traits_bounds_xy(&wkb)
}

/// Calculate the Cartesian XY bounds of any [GeometryTrait] implementation
pub fn geo_traits_bounds_xy(
    geom: &impl GeometryTrait<T = f64>,
) -> Result<BoundingBox, SedonaGeometryError> {
    let mut bbox = BoundingBox::empty();
    geo_traits_update_xy_bounds(geom, &mut bbox)?;
    Ok(bbox)
}

fn update_coords<C: CoordTrait<T = f64>>(coords: impl Iterator<Item = C>, bbox: &mut BoundingBox) {
    for coord in coords {
        bbox.update_xy(coord.x(), coord.y());
    }
}

fn geo_traits_update_xy_bounds(
    geom: &impl GeometryTrait<T = f64>,
    bbox: &mut BoundingBox,
) -> Result<(), SedonaGeometryError> {
    match geom.as_type() {
        GeometryType::Point(pt) => {
            if let Some(coord) = PointTrait::coord(pt) {
                bbox.update_xy(coord.x(), coord.y());
            }
        }
        GeometryType::LineString(ls) => update_coords(ls.coords(), bbox),
        GeometryType::Polygon(pl) => {
            if let Some(exterior) = pl.exterior() {
                update_coords(exterior.coords(), bbox);
            }

            for interior in pl.interiors() {
                update_coords(interior.coords(), bbox);
            }
        }
        GeometryType::MultiPoint(multi_pt) => {
            for pt in multi_pt.points() {
                geo_traits_update_xy_bounds(&pt, bbox)?;
            }
        }
        GeometryType::MultiLineString(multi_ls) => {
            for ls in multi_ls.line_strings() {
                geo_traits_update_xy_bounds(&ls, bbox)?;
            }
        }
        GeometryType::MultiPolygon(multi_pl) => {
            for pl in multi_pl.polygons() {
                geo_traits_update_xy_bounds(&pl, bbox)?;
            }
        }
        GeometryType::GeometryCollection(collection) => {
            for geom in collection.geometries() {
                geo_traits_update_xy_bounds(&geom, bbox)?;
            }
        }
        _ => {
            return Err(SedonaGeometryError::Invalid(
                "GeometryType not supported for XY bounds".to_string(),
            ))
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rstest::rstest;
    use wkb::writer::{write_geometry, WriteOptions};
    use wkt::Wkt;

    use super::*;

    fn wkt_bounds_xy(wkt_value: &str) -> Result<BoundingBox, SedonaGeometryError> {
        let wkt: Wkt =
            Wkt::from_str(wkt_value).map_err(|e| SedonaGeometryError::Invalid(e.to_string()))?;
        geo_traits_bounds_xy(&wkt)
    }

    #[rstest]
    #[case("POINT (0 1)", BoundingBox::xy((0, 0), (1, 1)))]
    #[case("LINESTRING (0 1, 2 3)", BoundingBox::xy((0, 2), (1, 3)))]
    #[case("POLYGON ((0 1, 0 2, 1 1, 0 1))", BoundingBox::xy((0, 1), (1, 2)))]
    #[case(
        "POLYGON ((0 1, 0 2, 1 1, 0 1), (10 11, 11 11, 10 12, 10 11))",
        BoundingBox::xy((0, 11), (1, 12))
    )]
    #[case("MULTIPOINT (0 1, 2 3)", BoundingBox::xy((0, 2), (1, 3)))]
    #[case("MULTILINESTRING ((0 1, 2 3))", BoundingBox::xy((0, 2), (1, 3)))]
    #[case("MULTIPOLYGON (((0 1, 0 2, 1 1, 0 1)))", BoundingBox::xy((0, 1), (1, 2)))]
    #[case(
        "GEOMETRYCOLLECTION (POINT (0 1), POINT (2 3))",
        BoundingBox::xy((0, 2), (1, 3))
    )]
    #[case("LINESTRING Z (0 1 2, 3 4 5)", BoundingBox::xy((0, 3), (1, 4)))]
    #[case("LINESTRING ZM (0 1 2 3, 4 5 6 7)", BoundingBox::xy((0, 4), (1, 5)))]
    fn test_wkt_bounds_xy(#[case] wkt_value: &str, #[case] expected: BoundingBox) {
        assert_eq!(wkt_bounds_xy(wkt_value).unwrap(), expected);
    }

    #[test]
    fn test_wkt_bounds_xy_empty() {
        assert!(wkt_bounds_xy("POINT EMPTY").unwrap().is_empty());
        assert!(wkt_bounds_xy("LINESTRING EMPTY").unwrap().is_empty());
    }

    #[test]
    fn test_wkb_bounds_xy() {
        let wkt: Wkt = Wkt::from_str("LINESTRING (0 1, 10 -5)").unwrap();
        let mut out = Vec::new();
        write_geometry(&mut out, &wkt, &WriteOptions::default()).unwrap();
        assert_eq!(
            wkb_bounds_xy(&out).unwrap(),
            BoundingBox::xy((0, 10), (-5, 1))
        );

        assert!(wkb_bounds_xy(&[0x01, 0x01]).is_err());
    }
}
