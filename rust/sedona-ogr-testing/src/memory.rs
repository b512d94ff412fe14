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
//! In-memory datasources for exercising scans and writes without a driver
//!
//! Layers evaluate attribute filters with [AttributeFilter] and apply the
//! spatial filter as a bounding box test. Every filter set is also recorded
//! so that tests can inspect what a connection pushed down.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use datafusion_common::{exec_err, plan_err, Result};
use parking_lot::Mutex;
use sedona_ogr::{
    connection::{OgrDatasource, OgrDriverManager, OgrFeature, OgrLayer, OpenRequest},
    field::{OgrLayerDefn, OLC_FAST_FEATURE_COUNT},
};
use sedona_ogr_geometry::bounding_box::BoundingBox;

use crate::attribute_filter::AttributeFilter;

#[derive(Debug, Default)]
struct MemoryLayerData {
    features: Vec<OgrFeature>,
    capabilities: HashSet<String>,
    attribute_filter: Option<(String, AttributeFilter)>,
    attribute_filter_history: Vec<Option<String>>,
    spatial_filter: Option<(usize, BoundingBox)>,
    cursor: usize,
    resets: usize,
    reject_attribute_filters: bool,
    fail_writes: bool,
    next_fid: i64,
}

impl MemoryLayerData {
    fn matches(&self, feature: &OgrFeature) -> bool {
        if let Some((_, filter)) = &self.attribute_filter {
            if !filter.matches(feature) {
                return false;
            }
        }

        let Some((_, filter)) = &self.spatial_filter else {
            return true;
        };

        feature
            .geometry
            .as_ref()
            .and_then(|geometry| geometry.bounding_box().ok())
            .is_some_and(|bbox| !bbox.is_empty() && bbox.intersects(filter))
    }

    fn position(&self, fid: i64) -> Result<usize> {
        match self.features.iter().position(|f| f.fid == Some(fid)) {
            Some(i) => Ok(i),
            None => exec_err!("Feature {fid} does not exist"),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes {
            exec_err!("Layer is read-only")
        } else {
            Ok(())
        }
    }
}

/// A layer backed by a vector of features
///
/// Clones share their features and filter state, so a test can keep a clone
/// to inspect what a connection did to the layer.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    defn: OgrLayerDefn,
    data: Arc<Mutex<MemoryLayerData>>,
}

impl MemoryLayer {
    pub fn new(defn: OgrLayerDefn) -> Self {
        Self {
            defn,
            data: Arc::new(Mutex::new(MemoryLayerData {
                next_fid: 1,
                ..Default::default()
            })),
        }
    }

    /// Add a feature, assigning the next feature id if it has none
    pub fn with_feature(self, mut feature: OgrFeature) -> Self {
        {
            let mut data = self.data.lock();
            let fid = feature.fid.unwrap_or(data.next_fid);
            feature.fid = Some(fid);
            data.next_fid = data.next_fid.max(fid + 1);
            data.features.push(feature);
        }
        self
    }

    pub fn with_capability(self, capability: &str) -> Self {
        self.data.lock().capabilities.insert(capability.to_string());
        self
    }

    /// Reject every non-empty attribute filter as unparseable
    pub fn with_rejected_attribute_filters(self) -> Self {
        self.data.lock().reject_attribute_filters = true;
        self
    }

    /// Fail every create, set and delete
    pub fn with_failing_writes(self) -> Self {
        self.set_failing_writes(true);
        self
    }

    pub fn set_failing_writes(&self, fail: bool) {
        self.data.lock().fail_writes = fail;
    }

    pub fn features(&self) -> Vec<OgrFeature> {
        self.data.lock().features.clone()
    }

    pub fn attribute_filter(&self) -> Option<String> {
        self.data
            .lock()
            .attribute_filter
            .as_ref()
            .map(|(text, _)| text.clone())
    }

    /// Every attribute filter set on this layer, in order
    pub fn attribute_filter_history(&self) -> Vec<Option<String>> {
        self.data.lock().attribute_filter_history.clone()
    }

    pub fn spatial_filter(&self) -> Option<(usize, BoundingBox)> {
        self.data.lock().spatial_filter
    }

    /// Number of times reading was restarted
    pub fn resets(&self) -> usize {
        self.data.lock().resets
    }
}

impl OgrLayer for MemoryLayer {
    fn defn(&self) -> &OgrLayerDefn {
        &self.defn
    }

    fn set_attribute_filter(&mut self, filter: Option<&str>) -> Result<()> {
        let mut data = self.data.lock();
        if data.reject_attribute_filters && filter.is_some() {
            return plan_err!("Failed to parse attribute filter {filter:?}");
        }

        data.attribute_filter = match filter {
            Some(text) => Some((text.to_string(), AttributeFilter::try_new(text, &self.defn)?)),
            None => None,
        };
        data.attribute_filter_history
            .push(filter.map(|f| f.to_string()));
        Ok(())
    }

    fn set_spatial_filter_rect(&mut self, geom_field: usize, bbox: &BoundingBox) -> Result<()> {
        if geom_field >= self.defn.geometry_fields.len() {
            return plan_err!("Layer has no geometry field {geom_field}");
        }

        self.data.lock().spatial_filter = Some((geom_field, *bbox));
        Ok(())
    }

    fn clear_spatial_filter(&mut self) {
        self.data.lock().spatial_filter = None;
    }

    fn feature_count(&mut self, force: bool) -> Option<u64> {
        let data = self.data.lock();
        if !force && !data.capabilities.contains(OLC_FAST_FEATURE_COUNT) {
            return None;
        }

        let count = data.features.iter().filter(|f| data.matches(f)).count();
        Some(count as u64)
    }

    fn test_capability(&self, capability: &str) -> bool {
        self.data.lock().capabilities.contains(capability)
    }

    fn reset_reading(&mut self) {
        let mut data = self.data.lock();
        data.cursor = 0;
        data.resets += 1;
    }

    fn next_feature(&mut self) -> Result<Option<OgrFeature>> {
        let mut data = self.data.lock();
        while data.cursor < data.features.len() {
            let i = data.cursor;
            data.cursor += 1;
            if data.matches(&data.features[i]) {
                return Ok(Some(data.features[i].clone()));
            }
        }

        Ok(None)
    }

    fn create_feature(&mut self, mut feature: OgrFeature) -> Result<i64> {
        let mut data = self.data.lock();
        data.check_writable()?;

        let fid = match feature.fid {
            Some(fid) if data.features.iter().any(|f| f.fid == Some(fid)) => {
                return exec_err!("Feature {fid} already exists");
            }
            Some(fid) => fid,
            None => data.next_fid,
        };

        feature.fid = Some(fid);
        data.next_fid = data.next_fid.max(fid + 1);
        data.features.push(feature);
        Ok(fid)
    }

    fn set_feature(&mut self, feature: OgrFeature) -> Result<()> {
        let mut data = self.data.lock();
        data.check_writable()?;

        let Some(fid) = feature.fid else {
            return exec_err!("Can't set a feature without a feature id");
        };

        let i = data.position(fid)?;
        data.features[i] = feature;
        Ok(())
    }

    fn delete_feature(&mut self, fid: i64) -> Result<()> {
        let mut data = self.data.lock();
        data.check_writable()?;

        let i = data.position(fid)?;
        data.features.remove(i);
        Ok(())
    }
}

/// A datasource holding named [MemoryLayer]s
#[derive(Debug, Clone, Default)]
pub struct MemoryDatasource {
    layers: HashMap<String, MemoryLayer>,
    capabilities: HashSet<String>,
}

impl MemoryDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: MemoryLayer) -> Self {
        self.layers.insert(layer.defn.name.clone(), layer);
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.insert(capability.to_string());
        self
    }
}

impl OgrDatasource for MemoryDatasource {
    fn layer_by_name(&mut self, name: &str) -> Result<Box<dyn OgrLayer>> {
        match self.layers.get(name) {
            Some(layer) => Ok(Box::new(layer.clone())),
            None => exec_err!("Layer '{name}' not found"),
        }
    }

    fn test_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// A driver registry resolving datasource names to [MemoryDatasource]s
///
/// Every open request is recorded. Datasources registered as read-only fail
/// when opened for update.
#[derive(Debug, Default)]
pub struct MemoryDriverManager {
    datasources: HashMap<String, MemoryDatasource>,
    read_only: HashSet<String>,
    requests: Mutex<Vec<OpenRequest>>,
}

impl MemoryDriverManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_datasource(mut self, name: &str, datasource: MemoryDatasource) -> Self {
        self.datasources.insert(name.to_string(), datasource);
        self
    }

    pub fn with_read_only_datasource(mut self, name: &str, datasource: MemoryDatasource) -> Self {
        self.read_only.insert(name.to_string());
        self.with_datasource(name, datasource)
    }

    /// Open requests received so far
    pub fn requests(&self) -> Vec<OpenRequest> {
        self.requests.lock().clone()
    }
}

impl OgrDriverManager for MemoryDriverManager {
    fn open(&self, request: &OpenRequest) -> Result<Box<dyn OgrDatasource>> {
        self.requests.lock().push(request.clone());

        let Some(datasource) = self.datasources.get(&request.datasource) else {
            return exec_err!("Unable to open datasource '{}'", request.datasource);
        };

        if request.update && self.read_only.contains(&request.datasource) {
            return exec_err!(
                "Datasource '{}' can't be opened for update",
                request.datasource
            );
        }

        Ok(Box::new(datasource.clone()))
    }
}
