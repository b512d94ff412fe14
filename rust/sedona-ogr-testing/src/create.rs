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
use std::str::FromStr;

use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use datafusion_expr::{lit, Expr};
use sedona_ogr_geometry::ewkb::iso_to_ewkb;
use wkb::{writer::WriteOptions, Endianness};
use wkt::Wkt;

/// Create a WKB from a WKT string.
pub fn make_wkb(wkt_value: &str) -> Vec<u8> {
    let geom = Wkt::<f64>::from_str(wkt_value).unwrap();
    let mut out: Vec<u8> = vec![];
    wkb::writer::write_geometry(
        &mut out,
        &geom,
        &WriteOptions {
            endianness: Endianness::LittleEndian,
        },
    )
    .unwrap();
    out
}

/// Create an EWKB from a WKT string, optionally tagged with an SRID
pub fn make_ewkb(wkt_value: &str, srid: Option<i32>) -> Vec<u8> {
    iso_to_ewkb(&make_wkb(wkt_value), srid).unwrap()
}

/// Create a geometry [`ScalarValue`] holding EWKB from a WKT literal
///
/// Panics on invalid WKT or a non-binary storage type.
pub fn create_scalar(wkt_value: Option<&str>, srid: Option<i32>, storage_type: &DataType) -> ScalarValue {
    let ewkb = wkt_value.map(|wkt_value| make_ewkb(wkt_value, srid));
    match storage_type {
        DataType::Binary => ScalarValue::Binary(ewkb),
        DataType::LargeBinary => ScalarValue::LargeBinary(ewkb),
        DataType::BinaryView => ScalarValue::BinaryView(ewkb),
        _ => panic!("create_scalar not implemented for {storage_type:?}"),
    }
}

/// A geometry literal expression from WKT
pub fn geometry_lit(wkt_value: &str) -> Expr {
    lit(create_scalar(Some(wkt_value), None, &DataType::Binary))
}
