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
use std::io::Write;

use crate::{bounding_box::BoundingBox, error::SedonaGeometryError};

/// Create little endian ISO WKB representing a POINT
pub fn wkb_point(pt: (f64, f64)) -> Result<Vec<u8>, SedonaGeometryError> {
    let mut out_wkb = Vec::with_capacity(21);
    write_wkb_point(&mut out_wkb, pt)?;
    Ok(out_wkb)
}

/// Write little endian ISO WKB representing a POINT into a buffer
pub fn write_wkb_point(buf: &mut impl Write, pt: (f64, f64)) -> Result<(), SedonaGeometryError> {
    buf.write_all(&[0x01, 0x01, 0x00, 0x00, 0x00])?;
    buf.write_all(&pt.0.to_le_bytes())?;
    buf.write_all(&pt.1.to_le_bytes())?;
    Ok(())
}

/// Create little endian ISO WKB representing a single-ring POLYGON
///
/// The ring is written as given: callers are responsible for closing it.
pub fn wkb_polygon<I: ExactSizeIterator<Item = (f64, f64)>>(
    pts: I,
) -> Result<Vec<u8>, SedonaGeometryError> {
    let mut out_wkb = Vec::with_capacity(5 + 4 + 4 + pts.len() * 16);
    write_wkb_polygon(&mut out_wkb, pts)?;
    Ok(out_wkb)
}

/// Write little endian ISO WKB representing a single-ring POLYGON into a buffer
pub fn write_wkb_polygon<I: ExactSizeIterator<Item = (f64, f64)>>(
    buf: &mut impl Write,
    pts: I,
) -> Result<(), SedonaGeometryError> {
    let size_u32: u32 = pts.len().try_into()?;

    buf.write_all(&[0x01, 0x03, 0x00, 0x00, 0x00])?;

    // For zero points, write POLYGON EMPTY
    if size_u32 == 0 {
        buf.write_all(&[0x00, 0x00, 0x00, 0x00])?;
        return Ok(());
    }

    buf.write_all(&[0x01, 0x00, 0x00, 0x00])?;
    buf.write_all(&size_u32.to_le_bytes())?;
    for pt in pts {
        buf.write_all(&pt.0.to_le_bytes())?;
        buf.write_all(&pt.1.to_le_bytes())?;
    }

    Ok(())
}

/// Create WKB for the rectangle described by a [BoundingBox]
///
/// Degenerate boxes collapse to a POINT (both extents zero) so that the result
/// is always a valid geometry. Empty boxes produce POLYGON EMPTY.
pub fn wkb_envelope(bbox: &BoundingBox) -> Result<Vec<u8>, SedonaGeometryError> {
    if bbox.is_empty() {
        return wkb_polygon([].into_iter());
    }

    let (min_x, min_y, max_x, max_y) = (bbox.min_x(), bbox.min_y(), bbox.max_x(), bbox.max_y());
    if min_x == max_x && min_y == max_y {
        return wkb_point((min_x, min_y));
    }

    wkb_polygon(
        [
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ]
        .into_iter(),
    )
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use wkb::writer::{write_geometry, WriteOptions};
    use wkt::Wkt;

    use super::*;
    use crate::bounds::wkb_bounds_xy;

    fn make_wkb(wkt_value: &str) -> Vec<u8> {
        let wkt: Wkt = Wkt::from_str(wkt_value).unwrap();
        let mut wkb = vec![];
        write_geometry(&mut wkb, &wkt, &WriteOptions::default()).unwrap();
        wkb
    }

    #[test]
    fn test_wkb_point() {
        assert_eq!(wkb_point((0.0, 1.0)).unwrap(), make_wkb("POINT (0 1)"));
    }

    #[test]
    fn test_wkb_polygon() {
        assert_eq!(
            wkb_polygon([].into_iter()).unwrap(),
            make_wkb("POLYGON EMPTY")
        );
        assert_eq!(
            wkb_polygon([(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)].into_iter()).unwrap(),
            make_wkb("POLYGON ((0 0, 1 0, 0 1, 0 0))")
        );
    }

    #[test]
    fn test_wkb_envelope() {
        let bbox = BoundingBox::xy((0, 10), (0, 10));
        let wkb = wkb_envelope(&bbox).unwrap();
        assert_eq!(
            wkb,
            make_wkb("POLYGON ((0 0, 10 0, 10 10, 0 10, 0 0))")
        );
        assert_eq!(wkb_bounds_xy(&wkb).unwrap(), bbox);

        assert_eq!(
            wkb_envelope(&BoundingBox::xy((1, 1), (2, 2))).unwrap(),
            make_wkb("POINT (1 2)")
        );
        assert_eq!(
            wkb_envelope(&BoundingBox::empty()).unwrap(),
            make_wkb("POLYGON EMPTY")
        );
    }
}
