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
use datafusion_expr::{expr::ScalarFunction, Expr};
use sedona_ogr_geometry::bounding_box::BoundingBox;

use crate::{
    catalog::{OgrFdwColumn, OgrFdwTable},
    constant::{fold_geometry, ParamBindings},
};

/// Function names of the bounding box overlap operator
const OVERLAP_FUNCTIONS: [&str; 2] = ["&&", "st_intersects_bbox"];

/// A rectangle to hand to a layer's spatial index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OgrSpatialFilter {
    /// Index of the layer geometry field to filter
    pub field_index: usize,
    pub bbox: BoundingBox,
}

/// The outcome of scanning a predicate list for a bounding box constraint
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpatialFilterExtraction {
    pub filter: Option<OgrSpatialFilter>,
    /// Index of the predicate the filter was extracted from
    pub consumed: Option<usize>,
    /// Indices of the predicates left for attribute filtering
    pub remaining: Vec<usize>,
}

/// Extract at most one bounding box filter from a conjunction of predicates
///
/// Only `geom && <constant>` (or `<constant> && geom`) on the table's geometry
/// column is recognized. Stricter spatial predicates imply a bounding box
/// overlap but are left untouched, as are predicates nested inside OR or NOT.
/// Operands that look constant but cannot be folded stay in place for the
/// caller to evaluate.
pub fn extract_spatial_filter(
    predicates: &[Expr],
    table: &OgrFdwTable,
    bindings: &ParamBindings,
) -> SpatialFilterExtraction {
    let Some(geometry_column) = table.geometry_column() else {
        return SpatialFilterExtraction {
            remaining: (0..predicates.len()).collect(),
            ..Default::default()
        };
    };

    let mut extraction = SpatialFilterExtraction::default();
    for (i, predicate) in predicates.iter().enumerate() {
        if extraction.filter.is_none() {
            if let Some(filter) = match_overlap(predicate, geometry_column, bindings) {
                extraction.filter = Some(filter);
                extraction.consumed = Some(i);
                continue;
            }
        }

        extraction.remaining.push(i);
    }

    extraction
}

fn match_overlap(
    predicate: &Expr,
    geometry_column: &OgrFdwColumn,
    bindings: &ParamBindings,
) -> Option<OgrSpatialFilter> {
    let Expr::ScalarFunction(ScalarFunction { func, args }) = predicate else {
        return None;
    };

    let name = func.name().to_lowercase();
    if !OVERLAP_FUNCTIONS.contains(&name.as_str()) || args.len() != 2 {
        return None;
    }

    let operand = if is_column(&args[0], geometry_column) {
        &args[1]
    } else if is_column(&args[1], geometry_column) {
        &args[0]
    } else {
        return None;
    };

    let geometry = match fold_geometry(operand, bindings) {
        Ok(Some(geometry)) => geometry,
        Ok(None) => return None,
        Err(e) => {
            log::debug!("Not using {predicate} as a spatial filter: {e}");
            return None;
        }
    };

    match geometry.bounding_box() {
        Ok(bbox) if !bbox.is_empty() => Some(OgrSpatialFilter {
            field_index: geometry_column.field_index()?,
            bbox,
        }),
        Ok(_) => {
            log::debug!("Not using {predicate} as a spatial filter: empty geometry");
            None
        }
        Err(e) => {
            log::debug!("Not using {predicate} as a spatial filter: {e}");
            None
        }
    }
}

fn is_column(expr: &Expr, column: &OgrFdwColumn) -> bool {
    matches!(expr, Expr::Column(c) if c.name == column.name)
}

#[cfg(test)]
mod test {
    use arrow_schema::{DataType, Field, Schema};
    use datafusion_common::ScalarValue;
    use datafusion_expr::{col, expr::Placeholder, lit};
    use sedona_ogr_common::OgrTableOptions;
    use sedona_ogr_geometry::types::GeometryTypeId;
    use sedona_ogr_testing::{
        create::{geometry_lit, make_ewkb},
        udfs::{
            bbox_overlaps, geom_from_text, make_envelope, st_intersects_bbox_udf,
            st_intersects_udf, st_point_udf,
        },
    };

    use crate::{
        catalog::ColumnOptions,
        extension_type::geometry_field,
        field::{OgrFieldType, OgrLayerDefn},
        type_catalog::ArrowTypeCatalog,
    };

    use super::*;

    fn table() -> OgrFdwTable {
        let schema = Schema::new(vec![
            Field::new("name", DataType::Utf8, true),
            geometry_field("geom", DataType::Binary, true, None),
            geometry_field("other_geom", DataType::Binary, true, None),
        ]);
        let layer = OgrLayerDefn::new("places")
            .with_field("name", OgrFieldType::String)
            .with_geometry_field("geometry", GeometryTypeId::Geometry);

        OgrFdwTable::try_new(
            "places",
            &schema,
            &ColumnOptions::new(),
            &layer,
            &OgrTableOptions::default(),
            &ArrowTypeCatalog,
        )
        .unwrap()
    }

    fn extract(predicates: &[Expr]) -> SpatialFilterExtraction {
        extract_spatial_filter(predicates, &table(), &ParamBindings::new())
    }

    fn filter(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Option<OgrSpatialFilter> {
        Some(OgrSpatialFilter {
            field_index: 0,
            bbox: BoundingBox::new(min_x, min_y, max_x, max_y),
        })
    }

    #[test]
    fn extract_overlap() {
        let predicates = vec![
            col("name").eq(lit("Paris")),
            bbox_overlaps(col("geom"), make_envelope(0.0, 0.0, 10.0, 10.0)),
        ];

        let extraction = extract(&predicates);
        assert_eq!(extraction.filter, filter(0.0, 0.0, 10.0, 10.0));
        assert_eq!(extraction.consumed, Some(1));
        assert_eq!(extraction.remaining, vec![0]);
    }

    #[test]
    fn extract_either_argument_order() {
        let predicates = vec![bbox_overlaps(
            geom_from_text("LINESTRING (1 2, 3 4)"),
            col("geom"),
        )];
        assert_eq!(extract(&predicates).filter, filter(1.0, 2.0, 3.0, 4.0));

        let predicates = vec![st_intersects_bbox_udf().call(vec![
            col("geom"),
            lit(ScalarValue::Binary(Some(make_ewkb("POINT (5 6)", Some(4326))))),
        ])];
        assert_eq!(extract(&predicates).filter, filter(5.0, 6.0, 5.0, 6.0));
    }

    #[test]
    fn extract_constant_constructors() {
        let predicates = vec![bbox_overlaps(
            col("geom"),
            geometry_lit("POLYGON ((0 0, 4 0, 4 3, 0 3, 0 0))"),
        )];
        assert_eq!(extract(&predicates).filter, filter(0.0, 0.0, 4.0, 3.0));

        let point = st_point_udf().call(vec![lit(3.0), lit(4.0)]);
        let predicates = vec![bbox_overlaps(point, col("geom"))];
        assert_eq!(extract(&predicates).filter, filter(3.0, 4.0, 3.0, 4.0));

        // Non-constant constructor arguments can't be folded
        let point = st_point_udf().call(vec![lit(3.0), col("name")]);
        let extraction = extract(&[bbox_overlaps(col("geom"), point)]);
        assert_eq!(extraction.filter, None);
        assert_eq!(extraction.remaining, vec![0]);
    }

    #[test]
    fn first_overlap_wins() {
        let predicates = vec![
            bbox_overlaps(col("geom"), make_envelope(0.0, 0.0, 1.0, 1.0)),
            bbox_overlaps(col("geom"), make_envelope(5.0, 5.0, 6.0, 6.0)),
        ];

        let extraction = extract(&predicates);
        assert_eq!(extraction.filter, filter(0.0, 0.0, 1.0, 1.0));
        assert_eq!(extraction.consumed, Some(0));
        assert_eq!(extraction.remaining, vec![1]);
    }

    #[test]
    fn placeholder_operand() {
        let bindings = ParamBindings::from([(
            "$1".to_string(),
            ScalarValue::Binary(Some(make_ewkb("POINT (1 1)", None))),
        )]);
        let predicates = vec![bbox_overlaps(
            col("geom"),
            Expr::Placeholder(Placeholder::new("$1".to_string(), None)),
        )];

        let extraction = extract_spatial_filter(&predicates, &table(), &bindings);
        assert_eq!(extraction.filter, filter(1.0, 1.0, 1.0, 1.0));

        let extraction = extract(&predicates);
        assert_eq!(extraction.filter, None);
        assert_eq!(extraction.remaining, vec![0]);
    }

    #[test]
    fn not_extracted() {
        let predicates = vec![
            // Stricter predicate
            st_intersects_udf().call(vec![col("geom"), make_envelope(0.0, 0.0, 1.0, 1.0)]),
            // Not the layer geometry column
            bbox_overlaps(col("other_geom"), make_envelope(0.0, 0.0, 1.0, 1.0)),
            // Not a constant operand
            bbox_overlaps(col("geom"), col("other_geom")),
            // Nested in OR
            bbox_overlaps(col("geom"), make_envelope(0.0, 0.0, 1.0, 1.0))
                .or(col("name").is_null()),
            // Empty geometry
            bbox_overlaps(col("geom"), geom_from_text("POINT EMPTY")),
            // Unparseable constant
            bbox_overlaps(col("geom"), geom_from_text("POINT (1")),
        ];

        let extraction = extract(&predicates);
        assert_eq!(extraction.filter, None);
        assert_eq!(extraction.consumed, None);
        assert_eq!(extraction.remaining, (0..predicates.len()).collect::<Vec<_>>());
    }

    #[test]
    fn no_geometry_column() {
        let schema = Schema::new(vec![Field::new("name", DataType::Utf8, true)]);
        let layer = OgrLayerDefn::new("t").with_field("name", OgrFieldType::String);
        let table = OgrFdwTable::try_new(
            "t",
            &schema,
            &ColumnOptions::new(),
            &layer,
            &OgrTableOptions::default(),
            &ArrowTypeCatalog,
        )
        .unwrap();

        let predicates = vec![bbox_overlaps(col("geom"), make_envelope(0.0, 0.0, 1.0, 1.0))];
        let extraction = extract_spatial_filter(&predicates, &table, &ParamBindings::new());
        assert_eq!(extraction.filter, None);
        assert_eq!(extraction.remaining, vec![0]);
    }
}
