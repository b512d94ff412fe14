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
use std::fmt::Display;
use std::str::FromStr;

use arrow_schema::{DataType, TimeUnit};
use datafusion_common::{plan_err, DataFusionError};
use sedona_ogr_geometry::types::GeometryTypeId;

/// Layer can rewrite existing features
pub const OLC_RANDOM_WRITE: &str = "RandomWrite";
/// Layer can append new features
pub const OLC_SEQUENTIAL_WRITE: &str = "SequentialWrite";
/// Layer can delete features
pub const OLC_DELETE_FEATURE: &str = "DeleteFeature";
/// Layer can count features without scanning them
pub const OLC_FAST_FEATURE_COUNT: &str = "FastFeatureCount";
/// Layer uses an index to apply spatial filters
pub const OLC_FAST_SPATIAL_FILTER: &str = "FastSpatialFilter";
/// Datasource can create layers
pub const ODS_C_CREATE_LAYER: &str = "CreateLayer";

/// Native attribute field types of an OGR layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OgrFieldType {
    Integer,
    IntegerList,
    Real,
    RealList,
    String,
    StringList,
    WideString,
    WideStringList,
    Binary,
    Date,
    Time,
    DateTime,
    Integer64,
    Integer64List,
}

impl OgrFieldType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "Integer",
            Self::IntegerList => "IntegerList",
            Self::Real => "Real",
            Self::RealList => "RealList",
            Self::String => "String",
            Self::StringList => "StringList",
            Self::WideString => "WideString",
            Self::WideStringList => "WideStringList",
            Self::Binary => "Binary",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::DateTime => "DateTime",
            Self::Integer64 => "Integer64",
            Self::Integer64List => "Integer64List",
        }
    }

    /// Returns true for the list-valued field types
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::IntegerList
                | Self::RealList
                | Self::StringList
                | Self::WideStringList
                | Self::Integer64List
        )
    }

    /// The Arrow type feature values of this field are read as
    pub fn native_type(&self) -> DataType {
        match self {
            Self::Integer => DataType::Int32,
            Self::Integer64 => DataType::Int64,
            Self::Real => DataType::Float64,
            Self::String | Self::WideString => DataType::Utf8,
            Self::Binary => DataType::Binary,
            Self::Date => DataType::Date32,
            Self::Time => DataType::Time64(TimeUnit::Microsecond),
            Self::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
            list => DataType::new_list(list.element_type().native_type(), true),
        }
    }

    /// The element type of a list-valued field type
    pub fn element_type(&self) -> Self {
        match self {
            Self::IntegerList => Self::Integer,
            Self::RealList => Self::Real,
            Self::StringList => Self::String,
            Self::WideStringList => Self::WideString,
            Self::Integer64List => Self::Integer64,
            other => *other,
        }
    }
}

impl Display for OgrFieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OgrFieldType {
    type Err = DataFusionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field_type = match s.to_lowercase().as_str() {
            "integer" => Self::Integer,
            "integerlist" => Self::IntegerList,
            "real" => Self::Real,
            "reallist" => Self::RealList,
            "string" => Self::String,
            "stringlist" => Self::StringList,
            "widestring" => Self::WideString,
            "widestringlist" => Self::WideStringList,
            "binary" => Self::Binary,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" => Self::DateTime,
            "integer64" => Self::Integer64,
            "integer64list" => Self::Integer64List,
            _ => return plan_err!("Unknown OGR field type: '{s}'"),
        };

        Ok(field_type)
    }
}

/// An attribute field of an OGR layer
#[derive(Debug, Clone, PartialEq)]
pub struct OgrFieldDefn {
    pub name: String,
    pub field_type: OgrFieldType,
}

impl OgrFieldDefn {
    pub fn new(name: &str, field_type: OgrFieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

/// A geometry field of an OGR layer
#[derive(Debug, Clone, PartialEq)]
pub struct OgrGeomFieldDefn {
    pub name: String,
    pub geometry_type: GeometryTypeId,
}

impl OgrGeomFieldDefn {
    pub fn new(name: &str, geometry_type: GeometryTypeId) -> Self {
        Self {
            name: name.to_string(),
            geometry_type,
        }
    }
}

/// Schema of an OGR layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OgrLayerDefn {
    pub name: String,
    pub fields: Vec<OgrFieldDefn>,
    pub geometry_fields: Vec<OgrGeomFieldDefn>,
    /// Name of the native feature id column, if the driver exposes one
    pub fid_column: Option<String>,
}

impl OgrLayerDefn {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: &str, field_type: OgrFieldType) -> Self {
        self.fields.push(OgrFieldDefn::new(name, field_type));
        self
    }

    pub fn with_geometry_field(mut self, name: &str, geometry_type: GeometryTypeId) -> Self {
        self.geometry_fields
            .push(OgrGeomFieldDefn::new(name, geometry_type));
        self
    }

    pub fn with_fid_column(mut self, name: &str) -> Self {
        self.fid_column = Some(name.to_string());
        self
    }

    /// Index of the field with exactly this name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Index of the first field whose name matches ignoring ASCII case
    pub fn field_index_ignore_case(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(name))
    }
}
