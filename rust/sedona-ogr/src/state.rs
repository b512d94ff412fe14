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
use std::sync::Arc;

use arrow_schema::{DataType, SchemaRef};
use datafusion_common::{exec_err, Result, ScalarValue};
use datafusion_expr::Expr;
use sedona_ogr_common::{ogr_internal_err, OgrPlannerOptions};

use crate::{
    catalog::{OgrColumnVariant, OgrFdwColumn, OgrFdwTable},
    codec::{external_geometry_to_value, set_srid, typmod_srid, value_to_external_geometry},
    connection::{OgrConnection, OgrFeature},
    constant::ParamBindings,
    deparse::{plan_pushdown, DeparseContext, PushdownPlan},
    field::OLC_FAST_FEATURE_COUNT,
    spatial_filter::OgrSpatialFilter,
};

/// Retag a geometry value with an SRID
pub type SetSridFn = fn(&ScalarValue, Option<i32>) -> Result<ScalarValue>;

/// Extract the SRID from a column type modifier
pub type TypmodSridFn = fn(i32) -> Option<i32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OgrFdwStateType {
    Plan,
    Exec,
    Modify,
}

/// Planning estimates for a scan
#[derive(Debug, Clone, PartialEq)]
pub struct OgrFdwPlanState {
    pub nrows: usize,
    pub startup_cost: f64,
    pub total_cost: f64,
    /// Per predicate: can the layer evaluate it
    pub pushdown_clauses: Vec<bool>,
}

/// A running scan
#[derive(Debug, Clone)]
pub struct OgrFdwExecState {
    /// OGR SQL attribute filter applied to the layer
    pub sql: Option<String>,
    pub spatial_filter: Option<OgrSpatialFilter>,
    pub params: Vec<(String, ScalarValue)>,
    /// Rows read so far
    pub rownum: usize,
    pub set_srid: SetSridFn,
    pub typmod_srid: TypmodSridFn,
}

#[derive(Debug)]
pub enum OgrFdwPhase {
    Plan(OgrFdwPlanState),
    Exec(OgrFdwExecState),
    Modify,
}

/// The state of one operation against a foreign table
///
/// A state moves from planning to either scanning or modifying. Each
/// transition consumes the previous state, taking over its connection.
#[derive(Debug)]
pub struct OgrFdwState {
    pub foreign_table_id: u32,
    pub connection: OgrConnection,
    pub table: Arc<OgrFdwTable>,
    pub schema: SchemaRef,
    pub phase: OgrFdwPhase,
}

impl OgrFdwState {
    /// Plan a scan: decide what can be pushed down and estimate its size
    pub fn plan(
        foreign_table_id: u32,
        mut connection: OgrConnection,
        table: Arc<OgrFdwTable>,
        schema: SchemaRef,
        predicates: &[Expr],
        bindings: &ParamBindings,
        planner: &OgrPlannerOptions,
    ) -> Result<Self> {
        let pushdown = {
            let ctx = DeparseContext {
                table: &table,
                encoding: &connection.char_encoding,
                bindings,
            };
            plan_pushdown(predicates, &ctx)
        };

        let nrows = estimate_rows(&mut connection, &pushdown, planner)?;
        let startup_cost = planner.startup_cost;
        log::debug!(
            "Planned scan of '{}': {nrows} rows, {} of {} predicates pushed down",
            table.table_name,
            pushdown.num_consumed(),
            predicates.len()
        );

        Ok(Self {
            foreign_table_id,
            connection,
            table,
            schema,
            phase: OgrFdwPhase::Plan(OgrFdwPlanState {
                nrows,
                startup_cost,
                total_cost: startup_cost + nrows as f64,
                pushdown_clauses: pushdown.consumed,
            }),
        })
    }

    pub fn state_type(&self) -> OgrFdwStateType {
        match &self.phase {
            OgrFdwPhase::Plan(_) => OgrFdwStateType::Plan,
            OgrFdwPhase::Exec(_) => OgrFdwStateType::Exec,
            OgrFdwPhase::Modify => OgrFdwStateType::Modify,
        }
    }

    pub fn plan_state(&self) -> Option<&OgrFdwPlanState> {
        match &self.phase {
            OgrFdwPhase::Plan(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn exec_state(&self) -> Option<&OgrFdwExecState> {
        match &self.phase {
            OgrFdwPhase::Exec(exec) => Some(exec),
            _ => None,
        }
    }

    /// Start scanning
    ///
    /// Pushdown is recomputed from the same predicates used for planning and
    /// applied to the layer before the first read.
    pub fn into_exec(self, predicates: &[Expr], bindings: &ParamBindings) -> Result<Self> {
        let (foreign_table_id, mut connection, table, schema) = self.into_plan_parts()?;

        let pushdown = {
            let ctx = DeparseContext {
                table: &table,
                encoding: &connection.char_encoding,
                bindings,
            };
            plan_pushdown(predicates, &ctx)
        };

        let layer = connection.layer_mut()?;
        layer.set_attribute_filter(pushdown.attribute_filter.as_deref())?;
        match &pushdown.spatial_filter {
            Some(filter) => layer.set_spatial_filter_rect(filter.field_index, &filter.bbox)?,
            None => layer.clear_spatial_filter(),
        }
        layer.reset_reading();

        log::debug!(
            "Scanning '{}' with attribute filter {:?} and spatial filter {:?}",
            table.table_name,
            pushdown.attribute_filter,
            pushdown.spatial_filter
        );

        Ok(Self {
            foreign_table_id,
            connection,
            table,
            schema,
            phase: OgrFdwPhase::Exec(OgrFdwExecState {
                sql: pushdown.attribute_filter,
                spatial_filter: pushdown.spatial_filter,
                params: pushdown.params,
                rownum: 0,
                set_srid,
                typmod_srid,
            }),
        })
    }

    /// Start modifying
    ///
    /// Fails if neither the datasource nor the layer accept writes.
    pub fn into_modify(self) -> Result<Self> {
        let (foreign_table_id, mut connection, table, schema) = self.into_plan_parts()?;

        if !connection.probe_layer_updateable() {
            return exec_err!(
                "Layer '{}' of '{}' is not updateable",
                connection.lyr_str,
                connection.ds_str
            );
        }

        Ok(Self {
            foreign_table_id,
            connection,
            table,
            schema,
            phase: OgrFdwPhase::Modify,
        })
    }

    /// Read the next row matching the pushed down filters
    pub fn next_row(&mut self) -> Result<Option<Vec<ScalarValue>>> {
        let OgrFdwPhase::Exec(exec) = &mut self.phase else {
            return ogr_internal_err!("next_row() called outside of a scan");
        };

        let Some(feature) = self.connection.layer_mut()?.next_feature()? else {
            return Ok(None);
        };

        let row = self
            .table
            .columns
            .iter()
            .map(|column| feature_value(column, &feature, exec, &self.schema))
            .collect::<Result<Vec<_>>>()?;

        exec.rownum += 1;
        Ok(Some(row))
    }

    /// Restart the scan from the first row with the same filters
    pub fn rescan(&mut self) -> Result<()> {
        let OgrFdwPhase::Exec(exec) = &mut self.phase else {
            return ogr_internal_err!("rescan() called outside of a scan");
        };

        self.connection.layer_mut()?.reset_reading();
        exec.rownum = 0;
        Ok(())
    }

    /// Append a row, returning the feature id assigned by the layer
    pub fn insert(&mut self, row: &[ScalarValue]) -> Result<i64> {
        let feature = self.row_to_feature(row)?;
        self.check_updateable()?;
        let result = self.connection.layer_mut()?.create_feature(feature);
        self.record_write(result)
    }

    /// Rewrite the feature identified by the row's feature id column
    pub fn update(&mut self, row: &[ScalarValue]) -> Result<()> {
        let feature = self.row_to_feature(row)?;
        if feature.fid.is_none() {
            return exec_err!(
                "Can't update '{}' without a non-null feature id column",
                self.table.table_name
            );
        }

        self.check_updateable()?;
        let result = self.connection.layer_mut()?.set_feature(feature);
        self.record_write(result)
    }

    pub fn delete(&mut self, fid: i64) -> Result<()> {
        if !matches!(self.phase, OgrFdwPhase::Modify) {
            return ogr_internal_err!("delete() called outside of a modify operation");
        }

        self.check_updateable()?;
        let result = self.connection.layer_mut()?.delete_feature(fid);
        self.record_write(result)
    }

    fn into_plan_parts(self) -> Result<(u32, OgrConnection, Arc<OgrFdwTable>, SchemaRef)> {
        match self.phase {
            OgrFdwPhase::Plan(_) => Ok((
                self.foreign_table_id,
                self.connection,
                self.table,
                self.schema,
            )),
            _ => ogr_internal_err!(
                "Expected a plan state but got {:?} state",
                self.state_type()
            ),
        }
    }

    /// Refuse writes once the layer is known not to accept them
    fn check_updateable(&mut self) -> Result<()> {
        if self.connection.probe_layer_updateable() {
            Ok(())
        } else {
            exec_err!(
                "Layer '{}' of '{}' is not updateable",
                self.connection.lyr_str,
                self.connection.ds_str
            )
        }
    }

    fn record_write<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.connection.record_write_failure();
        }
        result
    }

    fn row_to_feature(&self, row: &[ScalarValue]) -> Result<OgrFeature> {
        if !matches!(self.phase, OgrFdwPhase::Modify) {
            return ogr_internal_err!("Rows can only be written during a modify operation");
        }

        if row.len() != self.table.ncols() {
            return exec_err!(
                "Expected {} values but got {}",
                self.table.ncols(),
                row.len()
            );
        }

        let defn = self.connection.layer()?.defn();
        let mut feature = OgrFeature {
            fid: None,
            fields: defn
                .fields
                .iter()
                .map(|field| ScalarValue::try_from(&field.field_type.native_type()))
                .collect::<Result<Vec<_>>>()?,
            geometry: None,
        };

        for (column, value) in self.table.columns.iter().zip(row) {
            match &column.variant {
                OgrColumnVariant::Unmatched => {}
                OgrColumnVariant::Fid => {
                    feature.fid = match value.cast_to(&DataType::Int64)? {
                        ScalarValue::Int64(fid) => fid,
                        _ => None,
                    };
                }
                OgrColumnVariant::Geometry { .. } => {
                    let Some(conversions) = &column.conversions else {
                        return ogr_internal_err!("Geometry column '{}' has no conversions", column.name);
                    };

                    feature.geometry = value_to_external_geometry(value, conversions.send)?
                        .map(|geometry| match geometry.srid() {
                            Some(_) => geometry,
                            None => {
                                let srid = typmod_srid(column.type_modifier);
                                geometry.with_srid(srid)
                            }
                        });
                }
                OgrColumnVariant::Field {
                    field_index,
                    field_type,
                    ..
                } => {
                    let Some(slot) = feature.fields.get_mut(*field_index) else {
                        return ogr_internal_err!(
                            "Column '{}' maps to missing layer field {field_index}",
                            column.name
                        );
                    };
                    *slot = value.cast_to(&field_type.native_type())?;
                }
            }
        }

        Ok(feature)
    }
}

fn estimate_rows(
    connection: &mut OgrConnection,
    pushdown: &PushdownPlan,
    planner: &OgrPlannerOptions,
) -> Result<usize> {
    let layer = connection.layer_mut()?;
    if !planner.use_fast_feature_count || !layer.test_capability(OLC_FAST_FEATURE_COUNT) {
        return Ok(planner.default_row_estimate);
    }

    if let Err(e) = layer.set_attribute_filter(pushdown.attribute_filter.as_deref()) {
        log::warn!("Layer rejected attribute filter {:?}: {e}", pushdown.attribute_filter);
        layer.set_attribute_filter(None)?;
        return Ok(planner.default_row_estimate);
    }

    if let Some(filter) = &pushdown.spatial_filter {
        layer.set_spatial_filter_rect(filter.field_index, &filter.bbox)?;
    }

    let count = layer.feature_count(false);

    layer.set_attribute_filter(None)?;
    layer.clear_spatial_filter();

    Ok(count
        .and_then(|count| usize::try_from(count).ok())
        .unwrap_or(planner.default_row_estimate))
}

fn feature_value(
    column: &OgrFdwColumn,
    feature: &OgrFeature,
    exec: &OgrFdwExecState,
    schema: &SchemaRef,
) -> Result<ScalarValue> {
    let data_type = schema.field(column.ordinal).data_type();

    match &column.variant {
        OgrColumnVariant::Unmatched => ScalarValue::try_from(data_type),
        OgrColumnVariant::Fid => ScalarValue::Int64(feature.fid).cast_to(data_type),
        OgrColumnVariant::Geometry { .. } => {
            let Some(geometry) = &feature.geometry else {
                return ScalarValue::try_from(data_type);
            };

            let Some(conversions) = &column.conversions else {
                return ogr_internal_err!("Geometry column '{}' has no conversions", column.name);
            };

            let value = external_geometry_to_value(
                geometry,
                conversions.receive,
                &conversions.receive_param,
                None,
            )?;

            match (exec.typmod_srid)(column.type_modifier) {
                Some(srid) => (exec.set_srid)(&value, Some(srid)),
                None => Ok(value),
            }
        }
        OgrColumnVariant::Field { field_index, .. } => match feature.fields.get(*field_index) {
            Some(value) => value.cast_to(data_type),
            None => ScalarValue::try_from(data_type),
        },
    }
}
