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
use std::collections::HashMap;

use arrow_schema::{DataType, Field, Schema};
use datafusion_common::Result;
use sedona_ogr_common::{ogr_config_err, OgrTableOptions};
use sedona_ogr_geometry::types::GeometryTypeId;

use crate::{
    codec::srid_typmod,
    extension_type::{field_srid, is_geometry_field},
    field::{OgrFieldType, OgrLayerDefn},
    type_catalog::{ConversionFunctions, RelationalType, TypeCatalog},
};

/// Field metadata key marking a column as dropped
pub const DROPPED_METADATA_KEY: &str = "sedona_ogr:dropped";

/// Column option naming the layer field a column reads from
pub const COLUMN_NAME_OPTION: &str = "column_name";

/// Per-column options keyed by relational column name
pub type ColumnOptions = HashMap<String, HashMap<String, String>>;

/// How a relational column corresponds to the layer
#[derive(Debug, Clone, PartialEq)]
pub enum OgrColumnVariant {
    /// No layer counterpart: always NULL on scan, never pushed down
    Unmatched,
    /// The layer's geometry field
    Geometry {
        field_index: usize,
        geometry_type: GeometryTypeId,
    },
    /// The layer's native feature id
    Fid,
    /// An ordinary attribute field
    Field {
        field_index: usize,
        field_name: String,
        field_type: OgrFieldType,
    },
}

/// One relational column bound to a layer
#[derive(Debug, Clone)]
pub struct OgrFdwColumn {
    pub ordinal: usize,
    pub name: String,
    pub dropped: bool,
    pub rel_type: RelationalType,
    /// The type modifier (geometry columns pack their SRID here, otherwise -1)
    pub type_modifier: i32,
    pub is_array: bool,
    /// For arrays, the element type the conversions were resolved for
    pub element_type: Option<RelationalType>,
    /// Resolved conversions; `None` for unmatched columns
    pub conversions: Option<ConversionFunctions>,
    pub variant: OgrColumnVariant,
}

impl OgrFdwColumn {
    pub fn is_unmatched(&self) -> bool {
        self.variant == OgrColumnVariant::Unmatched
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self.variant, OgrColumnVariant::Geometry { .. })
    }

    pub fn is_fid(&self) -> bool {
        self.variant == OgrColumnVariant::Fid
    }

    /// Index of the layer field (or geometry field) this column maps to
    pub fn field_index(&self) -> Option<usize> {
        match &self.variant {
            OgrColumnVariant::Geometry { field_index, .. }
            | OgrColumnVariant::Field { field_index, .. } => Some(*field_index),
            _ => None,
        }
    }

    /// The layer field name and type of an ordinary attribute column
    pub fn ogr_field(&self) -> Option<(&str, OgrFieldType)> {
        match &self.variant {
            OgrColumnVariant::Field {
                field_name,
                field_type,
                ..
            } => Some((field_name, *field_type)),
            _ => None,
        }
    }
}

/// The column catalog of a foreign table bound to a layer
///
/// Built once, then shared read-only by every operation against the table.
#[derive(Debug, Clone)]
pub struct OgrFdwTable {
    pub table_name: String,
    pub layer_name: String,
    pub columns: Vec<OgrFdwColumn>,
}

impl OgrFdwTable {
    /// Bind the columns of `schema` to the fields of `layer_defn`
    pub fn try_new(
        table_name: &str,
        schema: &Schema,
        column_options: &ColumnOptions,
        layer_defn: &OgrLayerDefn,
        table_options: &OgrTableOptions,
        type_catalog: &dyn TypeCatalog,
    ) -> Result<Self> {
        let fields = schema.fields();
        let fid_index = find_fid_column(schema, layer_defn, table_options)?;
        let geometry_index = find_geometry_column(schema, layer_defn, table_options)?;

        let mut resolver = ConversionResolver::new(type_catalog);
        let mut columns = Vec::with_capacity(fields.len());

        for (ordinal, field) in fields.iter().enumerate() {
            let dropped = is_dropped(field);
            let rel_type = RelationalType::from_field(field);
            let type_modifier = if rel_type.is_geometry() {
                srid_typmod(field_srid(field)?)
            } else {
                -1
            };
            let element_type = rel_type
                .element_field()
                .map(|element| RelationalType::from_field(element));

            let variant = if dropped {
                OgrColumnVariant::Unmatched
            } else if Some(ordinal) == fid_index {
                OgrColumnVariant::Fid
            } else if Some(ordinal) == geometry_index {
                OgrColumnVariant::Geometry {
                    field_index: 0,
                    geometry_type: layer_defn.geometry_fields[0].geometry_type,
                }
            } else if rel_type.is_geometry() {
                log::warn!(
                    "Column '{}' of '{table_name}' is a geometry but layer '{}' exposes one geometry field; column will be NULL",
                    field.name(),
                    layer_defn.name
                );
                OgrColumnVariant::Unmatched
            } else {
                match_field(field, column_options, layer_defn)
            };

            let conversions = if variant == OgrColumnVariant::Unmatched {
                log::debug!(
                    "Column '{}' of '{table_name}' has no counterpart in layer '{}'",
                    field.name(),
                    layer_defn.name
                );
                None
            } else {
                Some(resolver.resolve(element_type.as_ref().unwrap_or(&rel_type))?)
            };

            columns.push(OgrFdwColumn {
                ordinal,
                name: field.name().clone(),
                dropped,
                rel_type,
                type_modifier,
                is_array: element_type.is_some(),
                element_type,
                conversions,
                variant,
            });
        }

        Ok(Self {
            table_name: table_name.to_string(),
            layer_name: layer_defn.name.clone(),
            columns,
        })
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, ordinal: usize) -> Option<&OgrFdwColumn> {
        self.columns.get(ordinal)
    }

    /// Look up a non-dropped column by its relational name
    pub fn column_by_name(&self, name: &str) -> Option<&OgrFdwColumn> {
        self.columns
            .iter()
            .find(|column| !column.dropped && column.name == name)
    }

    pub fn geometry_column(&self) -> Option<&OgrFdwColumn> {
        self.columns.iter().find(|column| column.is_geometry())
    }

    pub fn fid_column(&self) -> Option<&OgrFdwColumn> {
        self.columns.iter().find(|column| column.is_fid())
    }
}

/// Normalize a layer field name the way OGR's `LAUNDER=YES` does
pub fn launder_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Memoizes conversion resolution per relational type during a catalog build
struct ConversionResolver<'a> {
    type_catalog: &'a dyn TypeCatalog,
    resolved: HashMap<RelationalType, ConversionFunctions>,
}

impl<'a> ConversionResolver<'a> {
    fn new(type_catalog: &'a dyn TypeCatalog) -> Self {
        Self {
            type_catalog,
            resolved: HashMap::new(),
        }
    }

    fn resolve(&mut self, rel_type: &RelationalType) -> Result<ConversionFunctions> {
        if let Some(conversions) = self.resolved.get(rel_type) {
            return Ok(conversions.clone());
        }

        let conversions = self.type_catalog.resolve(rel_type)?;
        self.resolved.insert(rel_type.clone(), conversions.clone());
        Ok(conversions)
    }
}

fn is_dropped(field: &Field) -> bool {
    field
        .metadata()
        .get(DROPPED_METADATA_KEY)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn is_integer(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn position_ignore_case(schema: &Schema, name: &str) -> Option<usize> {
    schema
        .fields()
        .iter()
        .position(|field| !is_dropped(field) && field.name().eq_ignore_ascii_case(name))
}

fn find_fid_column(
    schema: &Schema,
    layer_defn: &OgrLayerDefn,
    table_options: &OgrTableOptions,
) -> Result<Option<usize>> {
    let designated = if let Some(name) = &table_options.fid_column {
        match position_ignore_case(schema, name) {
            Some(index) => Some(index),
            None => return ogr_config_err!("fid_column '{name}' is not a column of the table"),
        }
    } else if let Some(index) = layer_defn
        .fid_column
        .as_ref()
        .and_then(|name| position_ignore_case(schema, name))
    {
        Some(index)
    } else {
        // The "fid" naming convention only applies to integer columns
        return Ok(position_ignore_case(schema, "fid")
            .filter(|index| is_integer(schema.field(*index).data_type())));
    };

    match designated {
        Some(index) if !is_integer(schema.field(index).data_type()) => {
            let field = schema.field(index);
            ogr_config_err!(
                "Feature id column '{}' must be an integer type but is {}",
                field.name(),
                field.data_type()
            )
        }
        other => Ok(other),
    }
}

fn find_geometry_column(
    schema: &Schema,
    layer_defn: &OgrLayerDefn,
    table_options: &OgrTableOptions,
) -> Result<Option<usize>> {
    if let Some(name) = &table_options.geometry_column {
        let Some(index) = position_ignore_case(schema, name) else {
            return ogr_config_err!("geometry_column '{name}' is not a column of the table");
        };

        if !is_geometry_field(schema.field(index)) {
            return ogr_config_err!(
                "geometry_column '{name}' must be a geometry but is {}",
                schema.field(index).data_type()
            );
        }

        if layer_defn.geometry_fields.is_empty() {
            return ogr_config_err!(
                "geometry_column '{name}' was given but layer '{}' has no geometry field",
                layer_defn.name
            );
        }

        return Ok(Some(index));
    }

    if layer_defn.geometry_fields.is_empty() {
        return Ok(None);
    }

    Ok(schema
        .fields()
        .iter()
        .position(|field| !is_dropped(field) && is_geometry_field(field)))
}

fn match_field(
    field: &Field,
    column_options: &ColumnOptions,
    layer_defn: &OgrLayerDefn,
) -> OgrColumnVariant {
    let explicit_name = column_options
        .get(field.name())
        .and_then(|options| options.get(COLUMN_NAME_OPTION));

    let field_index = match explicit_name {
        Some(name) => layer_defn
            .field_index(name)
            .or_else(|| layer_defn.field_index_ignore_case(name)),
        None => layer_defn
            .field_index_ignore_case(field.name())
            .or_else(|| {
                let target = field.name().to_lowercase();
                layer_defn
                    .fields
                    .iter()
                    .position(|ogr_field| launder_name(&ogr_field.name) == target)
            }),
    };

    match field_index {
        Some(field_index) => {
            let ogr_field = &layer_defn.fields[field_index];
            OgrColumnVariant::Field {
                field_index,
                field_name: ogr_field.name.clone(),
                field_type: ogr_field.field_type,
            }
        }
        None => OgrColumnVariant::Unmatched,
    }
}

#[cfg(test)]
mod test {
    use datafusion_common::DataFusionError;
    use rstest::rstest;

    use crate::{extension_type::geometry_field, type_catalog::ArrowTypeCatalog};

    use super::*;

    fn layer() -> OgrLayerDefn {
        OgrLayerDefn::new("cities")
            .with_field("Name", OgrFieldType::String)
            .with_field("Population 2020", OgrFieldType::Integer64)
            .with_field("tags", OgrFieldType::StringList)
            .with_field("founded", OgrFieldType::Date)
            .with_geometry_field("wkb_geometry", GeometryTypeId::Point)
    }

    fn build(schema: &Schema, table_options: &OgrTableOptions) -> Result<OgrFdwTable> {
        OgrFdwTable::try_new(
            "cities_ft",
            schema,
            &ColumnOptions::new(),
            &layer(),
            table_options,
            &ArrowTypeCatalog,
        )
    }

    #[test]
    fn build_catalog() {
        let schema = Schema::new(vec![
            Field::new("fid", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("population_2020", DataType::Int64, true),
            Field::new("tags", DataType::new_list(DataType::Utf8, true), true),
            geometry_field("geom", DataType::Binary, true, Some(4326)),
            Field::new("unknown", DataType::Float64, true),
        ]);

        let table = build(&schema, &OgrTableOptions::default()).unwrap();
        assert_eq!(table.ncols(), 6);
        assert_eq!(table.layer_name, "cities");

        assert!(table.column(0).unwrap().is_fid());
        assert_eq!(table.fid_column().unwrap().name, "fid");

        let name = table.column_by_name("name").unwrap();
        assert_eq!(name.ogr_field(), Some(("Name", OgrFieldType::String)));
        assert_eq!(name.field_index(), Some(0));
        assert!(name.conversions.as_ref().unwrap().output_varlena);

        let population = table.column_by_name("population_2020").unwrap();
        assert_eq!(
            population.ogr_field(),
            Some(("Population 2020", OgrFieldType::Integer64))
        );

        let tags = table.column_by_name("tags").unwrap();
        assert!(tags.is_array);
        assert_eq!(
            tags.element_type,
            Some(RelationalType::Arrow(DataType::Utf8))
        );
        assert_eq!(
            tags.conversions.as_ref().unwrap().input_param,
            DataType::Utf8
        );

        let geom = table.geometry_column().unwrap();
        assert_eq!(geom.name, "geom");
        assert_eq!(
            geom.variant,
            OgrColumnVariant::Geometry {
                field_index: 0,
                geometry_type: GeometryTypeId::Point
            }
        );
        assert_eq!(crate::codec::typmod_srid(geom.type_modifier), Some(4326));

        let unknown = table.column_by_name("unknown").unwrap();
        assert!(unknown.is_unmatched());
        assert!(unknown.conversions.is_none());
        assert_eq!(unknown.field_index(), None);
    }

    #[test]
    fn column_name_option() {
        let schema = Schema::new(vec![
            Field::new("city", DataType::Utf8, true),
            Field::new("since", DataType::Date32, true),
        ]);
        let column_options = ColumnOptions::from([(
            "city".to_string(),
            HashMap::from([(COLUMN_NAME_OPTION.to_string(), "NAME".to_string())]),
        )]);

        let table = OgrFdwTable::try_new(
            "cities_ft",
            &schema,
            &column_options,
            &layer(),
            &OgrTableOptions::default(),
            &ArrowTypeCatalog,
        )
        .unwrap();

        assert_eq!(
            table.column_by_name("city").unwrap().ogr_field(),
            Some(("Name", OgrFieldType::String))
        );
        assert!(table.column_by_name("since").unwrap().is_unmatched());
        assert!(table.geometry_column().is_none());
        assert!(table.fid_column().is_none());
    }

    #[test]
    fn extra_geometry_columns_unmatched() {
        let schema = Schema::new(vec![
            geometry_field("a", DataType::Binary, true, None),
            geometry_field("b", DataType::BinaryView, true, None),
        ]);

        let table = build(&schema, &OgrTableOptions::default()).unwrap();
        assert!(table.column(0).unwrap().is_geometry());
        assert!(table.column(1).unwrap().is_unmatched());

        let options = OgrTableOptions {
            geometry_column: Some("b".to_string()),
            ..Default::default()
        };
        let table = build(&schema, &options).unwrap();
        assert!(table.column(0).unwrap().is_unmatched());
        assert!(table.column(1).unwrap().is_geometry());
    }

    #[test]
    fn dropped_columns() {
        let dropped = Field::new("name", DataType::Utf8, true).with_metadata(HashMap::from([(
            DROPPED_METADATA_KEY.to_string(),
            "true".to_string(),
        )]));
        let schema = Schema::new(vec![dropped, Field::new("NAME", DataType::Utf8, true)]);

        let table = build(&schema, &OgrTableOptions::default()).unwrap();
        let column = table.column(0).unwrap();
        assert!(column.dropped);
        assert!(column.is_unmatched());
        assert_eq!(
            table.column_by_name("NAME").unwrap().ogr_field(),
            Some(("Name", OgrFieldType::String))
        );
        assert!(table.column_by_name("name").is_none());
    }

    #[test]
    fn layer_fid_name() {
        let schema = Schema::new(vec![
            Field::new("OGC_FID", DataType::Int32, false),
            Field::new("fid", DataType::Int64, false),
        ]);
        let defn = layer().with_fid_column("ogc_fid");
        let table = OgrFdwTable::try_new(
            "cities_ft",
            &schema,
            &ColumnOptions::new(),
            &defn,
            &OgrTableOptions::default(),
            &ArrowTypeCatalog,
        )
        .unwrap();
        assert_eq!(table.fid_column().unwrap().name, "OGC_FID");
        assert!(table.column(1).unwrap().is_unmatched());
    }

    #[test]
    fn fid_convention_requires_integer() {
        let schema = Schema::new(vec![Field::new("fid", DataType::Utf8, true)]);
        let table = build(&schema, &OgrTableOptions::default()).unwrap();
        assert!(table.fid_column().is_none());
    }

    #[rstest]
    #[case(
        Schema::new(vec![Field::new("id", DataType::Utf8, true)]),
        OgrTableOptions { fid_column: Some("id".to_string()), ..Default::default() }
    )]
    #[case(
        Schema::new(vec![Field::new("id", DataType::Int64, true)]),
        OgrTableOptions { fid_column: Some("nope".to_string()), ..Default::default() }
    )]
    #[case(
        Schema::new(vec![Field::new("geom", DataType::Binary, true)]),
        OgrTableOptions { geometry_column: Some("geom".to_string()), ..Default::default() }
    )]
    #[case(
        Schema::new(vec![geometry_field("geom", DataType::Binary, true, None)]),
        OgrTableOptions { geometry_column: Some("nope".to_string()), ..Default::default() }
    )]
    #[case(
        Schema::new(vec![Field::new("name", DataType::Duration(arrow_schema::TimeUnit::Second), true)]),
        OgrTableOptions::default()
    )]
    fn configuration_errors(#[case] schema: Schema, #[case] table_options: OgrTableOptions) {
        let err = build(&schema, &table_options).unwrap_err();
        assert!(matches!(err, DataFusionError::Configuration(_)), "{err}");
    }

    #[test]
    fn explicit_geometry_without_layer_geometry() {
        let schema = Schema::new(vec![geometry_field("geom", DataType::Binary, true, None)]);
        let defn = OgrLayerDefn::new("attributes").with_field("name", OgrFieldType::String);
        let table_options = OgrTableOptions {
            geometry_column: Some("geom".to_string()),
            ..Default::default()
        };

        let err = OgrFdwTable::try_new(
            "ft",
            &schema,
            &ColumnOptions::new(),
            &defn,
            &table_options,
            &ArrowTypeCatalog,
        )
        .unwrap_err();
        assert!(matches!(err, DataFusionError::Configuration(_)));

        let table = OgrFdwTable::try_new(
            "ft",
            &schema,
            &ColumnOptions::new(),
            &defn,
            &OgrTableOptions::default(),
            &ArrowTypeCatalog,
        )
        .unwrap();
        assert!(table.column(0).unwrap().is_unmatched());
    }

    #[rstest]
    #[case("Name", "name")]
    #[case("Population 2020", "population_2020")]
    #[case("a-b.c", "a_b_c")]
    #[case("Été", "_t_")]
    fn launder(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(launder_name(name), expected);
    }
}
