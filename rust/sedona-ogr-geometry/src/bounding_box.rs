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
use serde::{Deserialize, Serialize};

/// Axis-aligned XY bounding box
///
/// This is the rectangle handed to a layer's spatial index: a minimum and
/// maximum for each of x and y in the layer's native coordinate units. An empty
/// box (no coordinates seen yet) is represented with infinite bounds such that
/// updating it with any coordinate yields a degenerate box around that coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BoundingBox {
    /// Create a BoundingBox from its corners
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Create a BoundingBox from x and y ranges
    pub fn xy(x: (impl Into<f64>, impl Into<f64>), y: (impl Into<f64>, impl Into<f64>)) -> Self {
        Self::new(x.0.into(), y.0.into(), x.1.into(), y.1.into())
    }

    /// A box that contains nothing
    pub fn empty() -> Self {
        Self::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY)
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    /// Returns true if no coordinate has been accumulated into this box
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Expand this box to include a coordinate
    ///
    /// NaN ordinates are ignored, which is how WKB encodes an empty point.
    pub fn update_xy(&mut self, x: f64, y: f64) {
        if x.is_nan() || y.is_nan() {
            return;
        }

        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Update this BoundingBox to include the bounds of another
    pub fn update_box(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }

        self.update_xy(other.min_x, other.min_y);
        self.update_xy(other.max_x, other.max_y);
    }

    /// Returns true if this bounding box shares at least one point with other
    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }

        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    /// Returns true if other lies entirely within this bounding box
    pub fn contains(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }

        self.min_x <= other.min_x
            && self.max_x >= other.max_x
            && self.min_y <= other.min_y
            && self.max_y >= other.max_y
    }
}
