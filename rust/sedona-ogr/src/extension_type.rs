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

use arrow_schema::{DataType, Field};
use datafusion_common::{DataFusionError, Result};
use serde_json::Value;

/// Arrow extension name identifying geometry columns
pub const GEOMETRY_EXTENSION_NAME: &str = "geoarrow.wkb";

const EXTENSION_NAME_KEY: &str = "ARROW:extension:name";
const EXTENSION_METADATA_KEY: &str = "ARROW:extension:metadata";

/// The relational type identifier for geometry values
///
/// Callers use this to recognize geometry-typed columns before a column catalog
/// is built.
pub fn geometry_type_identifier() -> &'static str {
    GEOMETRY_EXTENSION_NAME
}

/// Arrow extension type as carried by field metadata
#[derive(Debug, PartialEq)]
pub struct ExtensionType {
    pub extension_name: String,
    pub storage_type: DataType,
    pub extension_metadata: Option<String>,
}

impl ExtensionType {
    pub fn new(ext_name: &str, storage_type: DataType, extension_metadata: Option<String>) -> Self {
        Self {
            extension_name: ext_name.to_string(),
            storage_type,
            extension_metadata,
        }
    }

    /// Wraps this ExtensionType as a Field whose data_type is the storage type
    pub fn to_field(&self, name: &str, nullable: bool) -> Field {
        let mut metadata = HashMap::from([(
            EXTENSION_NAME_KEY.to_string(),
            self.extension_name.clone(),
        )]);

        if let Some(extension_metadata) = &self.extension_metadata {
            metadata.insert(
                EXTENSION_METADATA_KEY.to_string(),
                extension_metadata.clone(),
            );
        }

        Field::new(name, self.storage_type.clone(), nullable).with_metadata(metadata)
    }

    /// Unwrap a Field into an ExtensionType if the field represents one
    pub fn from_field(field: &Field) -> Option<ExtensionType> {
        let metadata = field.metadata();

        metadata.get(EXTENSION_NAME_KEY).map(|extension_name| {
            ExtensionType::new(
                extension_name,
                field.data_type().clone(),
                metadata.get(EXTENSION_METADATA_KEY).cloned(),
            )
        })
    }
}

/// Create a geometry field with an optional SRID
pub fn geometry_field(name: &str, storage_type: DataType, nullable: bool, srid: Option<i32>) -> Field {
    let metadata = srid.map(|srid| format!(r#"{{"crs":"EPSG:{srid}"}}"#));
    ExtensionType::new(GEOMETRY_EXTENSION_NAME, storage_type, metadata).to_field(name, nullable)
}

/// Returns true if the field declares the geometry extension type
pub fn is_geometry_field(field: &Field) -> bool {
    matches!(
        ExtensionType::from_field(field),
        Some(ext) if ext.extension_name == GEOMETRY_EXTENSION_NAME
    )
}

/// Returns true if the storage type can hold WKB
pub fn is_wkb_storage(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView
    )
}

/// The SRID declared by a geometry field's extension metadata
///
/// Understands `{"crs": "EPSG:<code>"}`, `{"crs": "OGC:CRS84"}` and PROJJSON
/// objects with an EPSG `id`. Returns `None` when no CRS (or an unrecognized
/// one) is declared.
pub fn field_srid(field: &Field) -> Result<Option<i32>> {
    let Some(ext) = ExtensionType::from_field(field) else {
        return Ok(None);
    };

    let Some(metadata) = ext.extension_metadata else {
        return Ok(None);
    };

    if metadata.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(&metadata)
        .map_err(|e| DataFusionError::External(Box::new(e)))?;

    match value.get("crs") {
        Some(crs) => Ok(crs_srid(crs)),
        None => Ok(None),
    }
}

fn crs_srid(crs: &Value) -> Option<i32> {
    match crs {
        Value::String(auth_code) => {
            let (authority, code) = auth_code.split_once(':')?;
            match authority.to_uppercase().as_str() {
                "EPSG" => code.parse().ok(),
                "OGC" if code.eq_ignore_ascii_case("CRS84") => Some(4326),
                _ => None,
            }
        }
        Value::Number(code) => code.as_i64().and_then(|code| i32::try_from(code).ok()),
        Value::Object(projjson) => {
            let id = projjson.get("id")?;
            let authority = id.get("authority")?.as_str()?;
            if !authority.eq_ignore_ascii_case("EPSG") {
                return None;
            }

            match id.get("code")? {
                Value::Number(code) => code.as_i64().and_then(|code| i32::try_from(code).ok()),
                Value::String(code) => code.parse().ok(),
                _ => None,
            }
        }
        _ => None,
    }
}
