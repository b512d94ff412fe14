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
//! Stand-in scalar functions for building predicates
//!
//! Predicate translation only looks at function names, argument shapes and
//! volatility, so these functions never compute anything: invoking them
//! returns NULL of their return type.
use std::sync::Arc;

use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use datafusion_expr::{
    lit, ColumnarValue, Expr, ScalarUDF, Signature, SimpleScalarUDF, Volatility,
};

fn stub_udf(name: &str, volatility: Volatility, return_type: DataType) -> ScalarUDF {
    let null_type = return_type.clone();
    SimpleScalarUDF::new_with_signature(
        name,
        Signature::variadic_any(volatility),
        return_type,
        Arc::new(move |_args: &[ColumnarValue]| Ok(ColumnarValue::Scalar(ScalarValue::try_from(&null_type)?))),
    )
    .into()
}

/// The `&&` bounding box overlap operator
pub fn overlap_udf() -> ScalarUDF {
    stub_udf("&&", Volatility::Immutable, DataType::Boolean)
}

pub fn st_intersects_bbox_udf() -> ScalarUDF {
    stub_udf("st_intersects_bbox", Volatility::Immutable, DataType::Boolean)
}

pub fn st_intersects_udf() -> ScalarUDF {
    stub_udf("st_intersects", Volatility::Immutable, DataType::Boolean)
}

pub fn st_geomfromtext_udf() -> ScalarUDF {
    stub_udf("st_geomfromtext", Volatility::Immutable, DataType::Binary)
}

pub fn st_makeenvelope_udf() -> ScalarUDF {
    stub_udf("st_makeenvelope", Volatility::Immutable, DataType::Binary)
}

pub fn st_point_udf() -> ScalarUDF {
    stub_udf("st_point", Volatility::Immutable, DataType::Binary)
}

pub fn lower_udf() -> ScalarUDF {
    stub_udf("lower", Volatility::Immutable, DataType::Utf8)
}

/// A volatile function
pub fn random_udf() -> ScalarUDF {
    stub_udf("random", Volatility::Volatile, DataType::Float64)
}

/// `left && right`
pub fn bbox_overlaps(left: Expr, right: Expr) -> Expr {
    overlap_udf().call(vec![left, right])
}

/// `ST_GeomFromText(wkt)`
pub fn geom_from_text(wkt_value: &str) -> Expr {
    st_geomfromtext_udf().call(vec![lit(wkt_value)])
}

/// `ST_MakeEnvelope(xmin, ymin, xmax, ymax)`
pub fn make_envelope(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Expr {
    st_makeenvelope_udf().call(vec![lit(xmin), lit(ymin), lit(xmax), lit(ymax)])
}

#[cfg(test)]
mod tests {
    use datafusion_expr::{col, expr::ScalarFunction};

    use super::*;

    #[test]
    fn stub_calls() {
        let Expr::ScalarFunction(ScalarFunction { func, args }) =
            bbox_overlaps(col("geom"), make_envelope(0.0, 0.0, 1.0, 1.0))
        else {
            panic!("Expected a scalar function");
        };
        assert_eq!(func.name(), "&&");
        assert_eq!(args.len(), 2);

        assert_eq!(
            random_udf().signature().volatility,
            Volatility::Volatile
        );
        assert_eq!(lower_udf().signature().volatility, Volatility::Immutable);
    }
}
