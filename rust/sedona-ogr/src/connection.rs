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
//! Datasource and layer handles
//!
//! The traits here are the seam to the vector data access library. An
//! [OgrConnection] owns one datasource and one layer for the lifetime of a
//! single operation and releases both when dropped.
use std::fmt::Debug;

use datafusion_common::{exec_err, Result, ScalarValue};
use sedona_ogr_common::{
    ogr_config_err, parse_key_value_options, CharacterEncoding, OgrServerOptions, OgrTableOptions,
};
use sedona_ogr_geometry::bounding_box::BoundingBox;

use crate::{
    codec::OgrGeometry,
    field::{
        OgrLayerDefn, OLC_DELETE_FEATURE, OLC_RANDOM_WRITE, OLC_SEQUENTIAL_WRITE,
    },
};

/// One feature read from or written to a layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OgrFeature {
    pub fid: Option<i64>,
    /// Attribute values by layer field index, typed as the field's native type
    pub fields: Vec<ScalarValue>,
    pub geometry: Option<OgrGeometry>,
}

/// A queryable feature collection
pub trait OgrLayer: Debug + Send {
    fn defn(&self) -> &OgrLayerDefn;

    /// Set (or clear with `None`) the attribute filter in OGR SQL
    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<()>;

    /// Restrict reads to features whose geometry overlaps `bbox`
    fn set_spatial_filter_rect(&mut self, geom_field: usize, bbox: &BoundingBox) -> Result<()>;

    fn clear_spatial_filter(&mut self);

    /// Count features matching the current filters
    ///
    /// Without `force`, returns `None` when counting would require a scan.
    fn feature_count(&mut self, force: bool) -> Option<u64>;

    fn test_capability(&self, capability: &str) -> bool;

    /// Restart reading from the first feature
    fn reset_reading(&mut self);

    fn next_feature(&mut self) -> Result<Option<OgrFeature>>;

    /// Append a feature, returning its assigned feature id
    fn create_feature(&mut self, feature: OgrFeature) -> Result<i64>;

    /// Rewrite the feature identified by `feature.fid`
    fn set_feature(&mut self, feature: OgrFeature) -> Result<()>;

    fn delete_feature(&mut self, fid: i64) -> Result<()>;
}

/// An opened datasource
pub trait OgrDatasource: Debug + Send {
    fn layer_by_name(&mut self, name: &str) -> Result<Box<dyn OgrLayer>>;

    fn test_capability(&self, capability: &str) -> bool;
}

/// Parameters for opening a datasource
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub datasource: String,
    pub driver: Option<String>,
    pub open_options: Vec<(String, String)>,
    pub config_options: Vec<(String, String)>,
    pub update: bool,
}

/// Opens datasources (the driver registry)
pub trait OgrDriverManager: Debug + Send + Sync {
    fn open(&self, request: &OpenRequest) -> Result<Box<dyn OgrDatasource>>;
}

/// Whether a datasource or layer accepts writes
///
/// `Unset` is resolved at most once by probing layer capabilities; `Try`
/// attempts writes and downgrades to `False` on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Updateable {
    False,
    True,
    #[default]
    Unset,
    Try,
}

/// A datasource and layer opened for one operation
#[derive(Debug)]
pub struct OgrConnection {
    pub ds_str: String,
    pub dr_str: Option<String>,
    pub lyr_str: String,
    pub config_options: Option<String>,
    pub open_options: Option<String>,
    pub ds_updateable: Updateable,
    pub lyr_updateable: Updateable,
    pub char_encoding: CharacterEncoding,
    datasource: Option<Box<dyn OgrDatasource>>,
    layer: Option<Box<dyn OgrLayer>>,
}

impl OgrConnection {
    /// Open the datasource and layer described by the server and table options
    ///
    /// Updateable servers are opened for update first; if that fails the
    /// datasource is reopened read-only and marked as not updateable.
    pub fn open(
        server: &OgrServerOptions,
        table: &OgrTableOptions,
        driver_manager: &dyn OgrDriverManager,
    ) -> Result<Self> {
        if server.datasource.is_empty() {
            return ogr_config_err!("The datasource option is required");
        }

        if table.layer.is_empty() {
            return ogr_config_err!("The layer option is required");
        }

        let char_encoding = CharacterEncoding::from_open_options(server.open_options.as_deref())?
            .unwrap_or_else(|| server.character_encoding.clone());

        let mut request = OpenRequest {
            datasource: server.datasource.clone(),
            driver: server.format.clone(),
            open_options: parse_key_value_options(server.open_options.as_deref().unwrap_or(""))?,
            config_options: parse_key_value_options(
                server.config_options.as_deref().unwrap_or(""),
            )?,
            update: server.updateable,
        };

        let (datasource, ds_updateable) = if request.update {
            match driver_manager.open(&request) {
                Ok(datasource) => (datasource, Updateable::True),
                Err(e) => {
                    log::debug!(
                        "Opening '{}' for update failed ({e}); retrying read-only",
                        request.datasource
                    );
                    request.update = false;
                    (driver_manager.open(&request)?, Updateable::False)
                }
            }
        } else {
            (driver_manager.open(&request)?, Updateable::False)
        };

        let lyr_updateable = match table.updateable {
            Some(false) => Updateable::False,
            Some(true) => Updateable::Try,
            None => Updateable::Unset,
        };

        let mut connection = Self {
            ds_str: server.datasource.clone(),
            dr_str: server.format.clone(),
            lyr_str: table.layer.clone(),
            config_options: server.config_options.clone(),
            open_options: server.open_options.clone(),
            ds_updateable,
            lyr_updateable,
            char_encoding,
            datasource: Some(datasource),
            layer: None,
        };

        let layer = connection.datasource_mut()?.layer_by_name(&table.layer)?;
        connection.layer = Some(layer);
        Ok(connection)
    }

    pub fn is_open(&self) -> bool {
        self.layer.is_some()
    }

    pub fn datasource_mut(&mut self) -> Result<&mut dyn OgrDatasource> {
        match self.datasource.as_mut() {
            Some(datasource) => Ok(datasource.as_mut()),
            None => exec_err!("Datasource '{}' is closed", self.ds_str),
        }
    }

    pub fn layer(&self) -> Result<&dyn OgrLayer> {
        match self.layer.as_ref() {
            Some(layer) => Ok(layer.as_ref()),
            None => exec_err!("Layer '{}' is closed", self.lyr_str),
        }
    }

    pub fn layer_mut(&mut self) -> Result<&mut dyn OgrLayer> {
        match self.layer.as_mut() {
            Some(layer) => Ok(layer.as_mut()),
            None => exec_err!("Layer '{}' is closed", self.lyr_str),
        }
    }

    /// Whether writes to the layer should be attempted
    ///
    /// An unset layer flag is resolved from the layer's write capabilities the
    /// first time this is called.
    pub fn probe_layer_updateable(&mut self) -> bool {
        if self.ds_updateable == Updateable::False {
            return false;
        }

        match self.lyr_updateable {
            Updateable::True | Updateable::Try => true,
            Updateable::False => false,
            Updateable::Unset => {
                let updateable = self.layer.as_ref().is_some_and(|layer| {
                    [OLC_RANDOM_WRITE, OLC_SEQUENTIAL_WRITE, OLC_DELETE_FEATURE]
                        .iter()
                        .any(|capability| layer.test_capability(capability))
                });

                log::debug!(
                    "Layer '{}' updateable capability probe: {updateable}",
                    self.lyr_str
                );
                self.lyr_updateable = if updateable {
                    Updateable::True
                } else {
                    Updateable::False
                };
                updateable
            }
        }
    }

    /// Record that a write was rejected by the layer
    pub fn record_write_failure(&mut self) {
        if self.lyr_updateable == Updateable::Try {
            self.lyr_updateable = Updateable::False;
        }
    }

    /// Release the layer and datasource handles
    pub fn close(&mut self) {
        if self.layer.take().is_some() {
            log::debug!("Closed layer '{}'", self.lyr_str);
        }

        if self.datasource.take().is_some() {
            log::debug!("Closed datasource '{}'", self.ds_str);
        }
    }
}

impl Drop for OgrConnection {
    fn drop(&mut self) {
        self.close();
    }
}
