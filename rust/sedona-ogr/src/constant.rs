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

use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use datafusion_expr::{expr::ScalarFunction, Cast, Expr, Volatility};
use sedona_ogr_geometry::{
    bounding_box::BoundingBox,
    wkb_factory::{wkb_envelope, wkb_point},
};

use crate::{
    codec::{CodecError, OgrGeometry},
    type_catalog::binary_bytes,
};

/// Values bound to placeholders (`$1`, `$name`...) keyed by placeholder id
pub type ParamBindings = HashMap<String, ScalarValue>;

/// A constant operand and the placeholder it came from, if any
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub value: ScalarValue,
    pub param_id: Option<String>,
}

/// Resolve an expression to a constant
///
/// Literals, bound placeholders and casts of those are constants; anything
/// else (including unbound placeholders) is not.
pub fn constant_value(expr: &Expr, bindings: &ParamBindings) -> Option<Constant> {
    match expr {
        Expr::Literal(value, _) => Some(Constant {
            value: value.clone(),
            param_id: None,
        }),
        Expr::Placeholder(placeholder) => {
            bindings.get(&placeholder.id).map(|value| Constant {
                value: value.clone(),
                param_id: Some(placeholder.id.clone()),
            })
        }
        Expr::Cast(Cast { expr, data_type }) => {
            let constant = constant_value(expr, bindings)?;
            let value = constant.value.cast_to(data_type).ok()?;
            Some(Constant {
                value,
                param_id: constant.param_id,
            })
        }
        _ => None,
    }
}

/// Fold a constant geometry expression
///
/// Returns `Ok(None)` when the expression is not a foldable constant. Only
/// immutable geometry constructors with constant arguments are folded.
pub fn fold_geometry(
    expr: &Expr,
    bindings: &ParamBindings,
) -> Result<Option<OgrGeometry>, CodecError> {
    if let Some(constant) = constant_value(expr, bindings) {
        return match binary_bytes(&constant.value) {
            Some(bytes) => OgrGeometry::try_from_wkb(bytes).map(Some),
            None => Ok(None),
        };
    }

    let Expr::ScalarFunction(ScalarFunction { func, args }) = expr else {
        return Ok(None);
    };

    if func.signature().volatility == Volatility::Volatile {
        return Ok(None);
    }

    let geometry = match func.name().to_lowercase().as_str() {
        "st_geomfromtext" | "st_geomfromwkt" => {
            let Some(text) = args.first().and_then(|arg| constant_text(arg, bindings)) else {
                return Ok(None);
            };
            OgrGeometry::try_from_wkt(&text)?
        }
        "st_geomfromwkb" => {
            let Some(constant) = args.first().and_then(|arg| constant_value(arg, bindings)) else {
                return Ok(None);
            };
            let Some(bytes) = binary_bytes(&constant.value) else {
                return Ok(None);
            };
            OgrGeometry::try_from_wkb(bytes)?
        }
        "st_point" => {
            let Some([x, y]) = constant_f64s::<2>(args, bindings) else {
                return Ok(None);
            };
            OgrGeometry::try_from_wkb(&wkb_point((x, y))?)?
        }
        "st_makeenvelope" => {
            let Some([x0, y0, x1, y1]) = constant_f64s::<4>(args, bindings) else {
                return Ok(None);
            };
            let bbox = BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1));
            OgrGeometry::try_from_wkb(&wkb_envelope(&bbox)?)?
        }
        "st_setsrid" => {
            let (Some(geom), Some(srid)) = (args.first(), args.get(1)) else {
                return Ok(None);
            };
            let Some(srid) = constant_i32(srid, bindings) else {
                return Ok(None);
            };
            return Ok(fold_geometry(geom, bindings)?.map(|geometry| geometry.with_srid(Some(srid))));
        }
        _ => return Ok(None),
    };

    // Constructors take an optional trailing SRID argument
    let srid_index = match func.name().to_lowercase().as_str() {
        "st_makeenvelope" => 4,
        "st_point" => 2,
        _ => 1,
    };
    match args.get(srid_index) {
        Some(arg) => match constant_i32(arg, bindings) {
            Some(srid) => Ok(Some(geometry.with_srid(Some(srid)))),
            None => Ok(None),
        },
        None => Ok(Some(geometry)),
    }
}

fn constant_text(expr: &Expr, bindings: &ParamBindings) -> Option<String> {
    match constant_value(expr, bindings)?.value {
        ScalarValue::Utf8(Some(text))
        | ScalarValue::LargeUtf8(Some(text))
        | ScalarValue::Utf8View(Some(text)) => Some(text),
        _ => None,
    }
}

fn constant_f64(expr: &Expr, bindings: &ParamBindings) -> Option<f64> {
    let value = constant_value(expr, bindings)?.value;
    if !value.data_type().is_numeric() {
        return None;
    }

    match value.cast_to(&DataType::Float64).ok()? {
        ScalarValue::Float64(Some(v)) if v.is_finite() => Some(v),
        _ => None,
    }
}

fn constant_f64s<const N: usize>(args: &[Expr], bindings: &ParamBindings) -> Option<[f64; N]> {
    if args.len() < N {
        return None;
    }

    let mut out = [0.0; N];
    for (value, arg) in out.iter_mut().zip(args) {
        *value = constant_f64(arg, bindings)?;
    }
    Some(out)
}

fn constant_i32(expr: &Expr, bindings: &ParamBindings) -> Option<i32> {
    let value = constant_value(expr, bindings)?.value;
    if !value.data_type().is_integer() {
        return None;
    }

    match value.cast_to(&DataType::Int32).ok()? {
        ScalarValue::Int32(Some(v)) => Some(v),
        _ => None,
    }
}
