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
//! Conversion between ISO WKB and extended (EWKB) headers
//!
//! Relational geometry values travel as EWKB: dimensions are flagged in the high
//! bits of the type integer and the top-level geometry may carry an SRID. The
//! external library speaks ISO WKB, where dimensions are encoded by adding
//! multiples of 1000 to the type integer and no SRID exists. The functions here
//! rewrite every header in a buffer from one form to the other while copying
//! coordinates verbatim, so byte order and ordinate values are preserved.
use geo_traits::Dimensions;

use crate::{
    error::SedonaGeometryError,
    types::{ordinate_count, GeometryTypeId},
};

pub const Z_FLAG_BIT: u32 = 0x80000000;
pub const M_FLAG_BIT: u32 = 0x40000000;
pub const SRID_FLAG_BIT: u32 = 0x20000000;

const MAX_NESTING_DEPTH: usize = 64;

/// Header style written when rewriting a WKB buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WkbFlavor {
    Iso,
    Extended,
}

/// The decoded top-level header of an ISO or extended WKB buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WkbHeader {
    geometry_type: GeometryTypeId,
    dimensions: Dimensions,
    srid: Option<i32>,
}

impl WkbHeader {
    /// Read the top-level header without walking the geometry body
    pub fn try_new(buf: &[u8]) -> Result<Self, SedonaGeometryError> {
        let mut reader = WkbRewriter::new(buf, WkbFlavor::Iso);
        let little_endian = reader.read_endian()?;
        let code = reader.read_u32(little_endian)?;
        let (geometry_type, dimensions, has_srid) = decode_type_code(code)?;
        let srid = if has_srid {
            normalize_srid(reader.read_u32(little_endian)? as i32)
        } else {
            None
        };

        Ok(Self {
            geometry_type,
            dimensions,
            srid,
        })
    }

    pub fn geometry_type(&self) -> GeometryTypeId {
        self.geometry_type
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// The SRID of an EWKB buffer, or `None` for ISO WKB or an unknown (zero) SRID
    pub fn srid(&self) -> Option<i32> {
        self.srid
    }
}

/// Rewrite (E)WKB as ISO WKB, returning the top-level SRID if one was present
pub fn ewkb_to_iso(buf: &[u8]) -> Result<(Vec<u8>, Option<i32>), SedonaGeometryError> {
    let mut rewriter = WkbRewriter::new(buf, WkbFlavor::Iso);
    let srid = rewriter.rewrite_geometry(None, 0)?;
    rewriter.finish().map(|out| (out, srid))
}

/// Rewrite (E)WKB as EWKB, tagging the top-level geometry with `srid`
///
/// An SRID of `None` or zero produces EWKB without the SRID flag.
pub fn iso_to_ewkb(buf: &[u8], srid: Option<i32>) -> Result<Vec<u8>, SedonaGeometryError> {
    let mut rewriter = WkbRewriter::new(buf, WkbFlavor::Extended);
    rewriter.rewrite_geometry(srid.and_then(normalize_srid), 0)?;
    rewriter.finish()
}

fn normalize_srid(srid: i32) -> Option<i32> {
    if srid == 0 {
        None
    } else {
        Some(srid)
    }
}

fn decode_type_code(code: u32) -> Result<(GeometryTypeId, Dimensions, bool), SedonaGeometryError> {
    let has_srid = code & SRID_FLAG_BIT != 0;
    let flag_z = code & Z_FLAG_BIT != 0;
    let flag_m = code & M_FLAG_BIT != 0;
    let iso_code = code & !(Z_FLAG_BIT | M_FLAG_BIT | SRID_FLAG_BIT);

    let (iso_z, iso_m) = match iso_code / 1000 {
        0 => (false, false),
        1 => (true, false),
        2 => (false, true),
        3 => (true, true),
        _ => {
            return Err(SedonaGeometryError::Invalid(format!(
                "Unexpected WKB geometry type code: {code}"
            )))
        }
    };

    let geometry_type = GeometryTypeId::try_from_wkb_id(iso_code % 1000)?;
    let dimensions = match (flag_z || iso_z, flag_m || iso_m) {
        (false, false) => Dimensions::Xy,
        (true, false) => Dimensions::Xyz,
        (false, true) => Dimensions::Xym,
        (true, true) => Dimensions::Xyzm,
    };

    Ok((geometry_type, dimensions, has_srid))
}

fn encode_type_code(
    geometry_type: GeometryTypeId,
    dimensions: Dimensions,
    flavor: WkbFlavor,
    with_srid: bool,
) -> u32 {
    let (has_z, has_m) = match dimensions {
        Dimensions::Xyz => (true, false),
        Dimensions::Xym => (false, true),
        Dimensions::Xyzm => (true, true),
        _ => (false, false),
    };

    match flavor {
        WkbFlavor::Iso => {
            geometry_type.wkb_id() + if has_z { 1000 } else { 0 } + if has_m { 2000 } else { 0 }
        }
        WkbFlavor::Extended => {
            let mut code = geometry_type.wkb_id();
            if has_z {
                code |= Z_FLAG_BIT;
            }
            if has_m {
                code |= M_FLAG_BIT;
            }
            if with_srid {
                code |= SRID_FLAG_BIT;
            }
            code
        }
    }
}

struct WkbRewriter<'a> {
    buf: &'a [u8],
    offset: usize,
    flavor: WkbFlavor,
    out: Vec<u8>,
}

impl<'a> WkbRewriter<'a> {
    fn new(buf: &'a [u8], flavor: WkbFlavor) -> Self {
        Self {
            buf,
            offset: 0,
            flavor,
            out: Vec::with_capacity(buf.len() + 4),
        }
    }

    fn finish(self) -> Result<Vec<u8>, SedonaGeometryError> {
        let trailing = self.buf.len() - self.offset;
        if trailing != 0 {
            return Err(SedonaGeometryError::Invalid(format!(
                "Invalid WKB: {trailing} trailing bytes after geometry"
            )));
        }

        Ok(self.out)
    }

    /// Rewrite one geometry (and its children) and return the SRID it declared
    fn rewrite_geometry(
        &mut self,
        srid_out: Option<i32>,
        depth: usize,
    ) -> Result<Option<i32>, SedonaGeometryError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(SedonaGeometryError::Invalid(format!(
                "Invalid WKB: nesting deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }

        let little_endian = self.read_endian()?;
        self.out.push(u8::from(little_endian));

        let code = self.read_u32(little_endian)?;
        let (geometry_type, dimensions, has_srid) = decode_type_code(code)?;
        let srid_in = if has_srid {
            normalize_srid(self.read_u32(little_endian)? as i32)
        } else {
            None
        };

        let srid_out = match self.flavor {
            WkbFlavor::Iso => None,
            WkbFlavor::Extended => srid_out,
        };
        let out_code = encode_type_code(geometry_type, dimensions, self.flavor, srid_out.is_some());
        self.write_u32(out_code, little_endian);
        if let Some(srid) = srid_out {
            self.write_u32(srid as u32, little_endian);
        }

        let coord_size = 8 * ordinate_count(dimensions);
        match geometry_type {
            GeometryTypeId::Point => self.copy_bytes(coord_size)?,
            GeometryTypeId::LineString => self.copy_sequence(coord_size, little_endian)?,
            GeometryTypeId::Polygon => {
                let num_rings = self.copy_u32(little_endian)?;
                for _ in 0..num_rings {
                    self.copy_sequence(coord_size, little_endian)?;
                }
            }
            GeometryTypeId::MultiPoint
            | GeometryTypeId::MultiLineString
            | GeometryTypeId::MultiPolygon
            | GeometryTypeId::GeometryCollection => {
                let num_parts = self.copy_u32(little_endian)?;
                for _ in 0..num_parts {
                    self.rewrite_geometry(None, depth + 1)?;
                }
            }
            GeometryTypeId::Geometry => {
                return Err(SedonaGeometryError::Invalid(
                    "Invalid WKB: generic geometry type code 0 has no body".to_string(),
                ))
            }
        }

        Ok(srid_in)
    }

    fn copy_sequence(
        &mut self,
        coord_size: usize,
        little_endian: bool,
    ) -> Result<(), SedonaGeometryError> {
        let num_coords = self.copy_u32(little_endian)?;
        let num_bytes = (num_coords as usize).checked_mul(coord_size).ok_or_else(|| {
            SedonaGeometryError::Invalid(format!(
                "Invalid WKB: coordinate count {num_coords} overflows"
            ))
        })?;
        self.copy_bytes(num_bytes)
    }

    fn read_endian(&mut self) -> Result<bool, SedonaGeometryError> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SedonaGeometryError::Invalid(format!(
                "Unexpected byte order: {other:?}"
            ))),
        }
    }

    fn read_u32(&mut self, little_endian: bool) -> Result<u32, SedonaGeometryError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().map_err(|_| SedonaGeometryError::Unknown)?;
        if little_endian {
            Ok(u32::from_le_bytes(bytes))
        } else {
            Ok(u32::from_be_bytes(bytes))
        }
    }

    fn copy_u32(&mut self, little_endian: bool) -> Result<u32, SedonaGeometryError> {
        let value = self.read_u32(little_endian)?;
        self.write_u32(value, little_endian);
        Ok(value)
    }

    fn write_u32(&mut self, value: u32, little_endian: bool) {
        if little_endian {
            self.out.extend_from_slice(&value.to_le_bytes());
        } else {
            self.out.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn copy_bytes(&mut self, n: usize) -> Result<(), SedonaGeometryError> {
        let bytes = self.take(n)?;
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SedonaGeometryError> {
        let remaining = self.buf.len() - self.offset;
        if remaining < n {
            return Err(SedonaGeometryError::Truncated {
                offset: self.offset,
                needed: n,
            });
        }

        let bytes = &self.buf[self.offset..(self.offset + n)];
        self.offset += n;
        Ok(bytes)
    }
}
