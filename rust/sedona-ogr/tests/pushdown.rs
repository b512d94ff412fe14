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
use std::{cmp::Ordering, sync::Arc};

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use datafusion_common::ScalarValue;
use datafusion_expr::{col, expr::ScalarFunction, lit, BinaryExpr, Expr, Operator};
use rstest::rstest;
use sedona_ogr::{
    catalog::{ColumnOptions, OgrFdwTable},
    connection::{OgrConnection, OgrFeature},
    constant::ParamBindings,
    field::{OgrFieldType, OgrLayerDefn},
    state::OgrFdwState,
    type_catalog::ArrowTypeCatalog,
};
use sedona_ogr_common::{OgrPlannerOptions, OgrServerOptions, OgrTableOptions};
use sedona_ogr_testing::{
    memory::{MemoryDatasource, MemoryDriverManager, MemoryLayer},
    udfs::lower_udf,
};

fn layer_defn() -> OgrLayerDefn {
    OgrLayerDefn::new("places")
        .with_field("name", OgrFieldType::String)
        .with_field("pop", OgrFieldType::Integer64)
        .with_field("area", OgrFieldType::Real)
        .with_field("flag", OgrFieldType::Integer)
        .with_field("code", OgrFieldType::Integer)
        .with_field("whole", OgrFieldType::Real)
        .with_field("area32", OgrFieldType::Real)
        .with_field("opened", OgrFieldType::Date)
}

/// Columns read from the fields above, some of them through lossy casts
fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("fid", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("pop", DataType::Int64, true),
        Field::new("area", DataType::Float64, true),
        Field::new("flag", DataType::Boolean, true),
        Field::new("code", DataType::Int64, true),
        Field::new("whole", DataType::Int64, true),
        Field::new("area32", DataType::Float32, true),
        Field::new("opened", DataType::Date32, true),
    ]))
}

#[allow(clippy::too_many_arguments)]
fn place(
    name: Option<&str>,
    pop: Option<i64>,
    area: Option<f64>,
    flag: Option<i32>,
    code: Option<i32>,
    whole: Option<f64>,
    area32: Option<f64>,
    opened: Option<i32>,
) -> OgrFeature {
    OgrFeature {
        fid: None,
        fields: vec![
            ScalarValue::Utf8(name.map(|s| s.to_string())),
            ScalarValue::Int64(pop),
            ScalarValue::Float64(area),
            ScalarValue::Int32(flag),
            ScalarValue::Int32(code),
            ScalarValue::Float64(whole),
            ScalarValue::Float64(area32),
            ScalarValue::Date32(opened),
        ],
        geometry: None,
    }
}

const JAN_1_2024: i32 = 19723;

fn places() -> MemoryLayer {
    MemoryLayer::new(layer_defn())
        .with_feature(place(
            Some("Paris"),
            Some(2000),
            Some(1.5),
            Some(1),
            Some(7),
            Some(1.0),
            Some(1.1),
            Some(JAN_1_2024),
        ))
        .with_feature(place(
            Some("Berlin"),
            Some(100),
            Some(2.0),
            Some(0),
            Some(-3),
            Some(1.5),
            Some(1.100000001),
            Some(19000),
        ))
        .with_feature(place(
            Some("O'Brien"),
            Some(5),
            Some(0.5),
            Some(2),
            Some(7),
            Some(2.0),
            Some(3.0),
            Some(JAN_1_2024),
        ))
        .with_feature(place(None, None, None, None, None, None, None, None))
        .with_feature(place(
            Some("paris"),
            Some(1_000_000),
            Some(1.0),
            Some(-1),
            Some(i32::MAX),
            Some(0.9),
            Some(1.1),
            Some(18000),
        ))
}

struct Fixture {
    manager: MemoryDriverManager,
    table: Arc<OgrFdwTable>,
}

impl Fixture {
    fn new() -> Self {
        let manager = MemoryDriverManager::new().with_datasource(
            "places.gpkg",
            MemoryDatasource::new().with_layer(places()),
        );
        let table = OgrFdwTable::try_new(
            "places",
            &schema(),
            &ColumnOptions::new(),
            &layer_defn(),
            &Self::table_options(),
            &ArrowTypeCatalog,
        )
        .unwrap();

        Self {
            manager,
            table: Arc::new(table),
        }
    }

    fn table_options() -> OgrTableOptions {
        OgrTableOptions {
            layer: "places".to_string(),
            ..Default::default()
        }
    }

    /// Plan and scan with `predicates`, returning the rows read and which
    /// predicates the layer took over
    fn scan(&self, predicates: &[Expr]) -> (Vec<Vec<ScalarValue>>, Vec<bool>) {
        let server = OgrServerOptions {
            datasource: "places.gpkg".to_string(),
            ..Default::default()
        };
        let connection =
            OgrConnection::open(&server, &Self::table_options(), &self.manager).unwrap();

        let state = OgrFdwState::plan(
            1,
            connection,
            self.table.clone(),
            schema(),
            predicates,
            &ParamBindings::new(),
            &OgrPlannerOptions::default(),
        )
        .unwrap();
        let consumed = state.plan_state().unwrap().pushdown_clauses.clone();

        let mut state = state
            .into_exec(predicates, &ParamBindings::new())
            .unwrap();
        let mut rows = Vec::new();
        while let Some(row) = state.next_row().unwrap() {
            rows.push(row);
        }

        (rows, consumed)
    }
}

/// Evaluate a predicate over a scanned row
fn evaluate(expr: &Expr, row: &[ScalarValue], schema: &Schema) -> ScalarValue {
    match expr {
        Expr::Column(column) => row[schema.index_of(&column.name).unwrap()].clone(),
        Expr::Literal(value, _) => value.clone(),
        Expr::BinaryExpr(BinaryExpr { left, op, right }) => {
            let l = evaluate(left, row, schema);
            let r = evaluate(right, row, schema);
            match op {
                Operator::And => kleene(&l, &r, false),
                Operator::Or => kleene(&l, &r, true),
                op => compare(&l, *op, &r, matches!(right.as_ref(), Expr::Literal(..))),
            }
        }
        Expr::Not(inner) => match evaluate(inner, row, schema) {
            ScalarValue::Boolean(v) => ScalarValue::Boolean(v.map(|v| !v)),
            other => panic!("NOT of {other:?}"),
        },
        Expr::IsNull(inner) => {
            ScalarValue::Boolean(Some(evaluate(inner, row, schema).is_null()))
        }
        Expr::IsNotNull(inner) => {
            ScalarValue::Boolean(Some(!evaluate(inner, row, schema).is_null()))
        }
        Expr::ScalarFunction(ScalarFunction { func, args }) if func.name() == "lower" => {
            match evaluate(&args[0], row, schema) {
                ScalarValue::Utf8(v) => ScalarValue::Utf8(v.map(|s| s.to_lowercase())),
                other => panic!("lower() of {other:?}"),
            }
        }
        other => panic!("Can't evaluate {other}"),
    }
}

/// AND (`short_circuit` false) or OR (`short_circuit` true) with unknowns
fn kleene(l: &ScalarValue, r: &ScalarValue, short_circuit: bool) -> ScalarValue {
    let (ScalarValue::Boolean(l), ScalarValue::Boolean(r)) = (l, r) else {
        panic!("Expected booleans but got {l:?} and {r:?}");
    };

    ScalarValue::Boolean(
        if *l == Some(short_circuit) || *r == Some(short_circuit) {
            Some(short_circuit)
        } else if l.is_some() && r.is_some() {
            Some(!short_circuit)
        } else {
            None
        },
    )
}

/// Compare two values, casting the constant side to the other side's type
fn compare(
    l: &ScalarValue,
    op: Operator,
    r: &ScalarValue,
    right_is_constant: bool,
) -> ScalarValue {
    if l.is_null() || r.is_null() {
        return ScalarValue::Boolean(None);
    }

    let (l, r) = if right_is_constant {
        (l.clone(), r.cast_to(&l.data_type()).unwrap())
    } else {
        (l.cast_to(&r.data_type()).unwrap(), r.clone())
    };

    let ordering = l.partial_cmp(&r).unwrap();
    let result = match op {
        Operator::Eq => ordering == Ordering::Equal,
        Operator::NotEq => ordering != Ordering::Equal,
        Operator::Lt => ordering == Ordering::Less,
        Operator::LtEq => ordering != Ordering::Greater,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::GtEq => ordering != Ordering::Less,
        op => panic!("Unexpected operator {op}"),
    };
    ScalarValue::Boolean(Some(result))
}

fn keep(rows: Vec<Vec<ScalarValue>>, predicates: &[&Expr]) -> Vec<Vec<ScalarValue>> {
    let schema = schema();
    rows.into_iter()
        .filter(|row| {
            predicates
                .iter()
                .all(|p| evaluate(p, row, &schema) == ScalarValue::Boolean(Some(true)))
        })
        .collect()
}

fn fids(rows: &[Vec<ScalarValue>]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row[0] {
            ScalarValue::Int64(Some(fid)) => fid,
            ref other => panic!("Unexpected fid {other:?}"),
        })
        .collect()
}

#[rstest]
#[case::bool_true(vec![col("flag").eq(lit(true))], vec![true], vec![1, 3, 5])]
#[case::bool_false(vec![col("flag").eq(lit(false))], vec![true], vec![2])]
#[case::bool_not_true(vec![col("flag").not_eq(lit(true))], vec![true], vec![2])]
#[case::bool_ordering(vec![col("flag").gt(lit(false))], vec![false], vec![1, 3, 5])]
#[case::int_on_real_eq(vec![col("whole").eq(lit(1i64))], vec![false], vec![1, 2])]
#[case::int_on_real_gt(vec![col("whole").gt(lit(1i64))], vec![false], vec![3])]
#[case::float32_on_real(vec![col("area32").eq(lit(1.1f32))], vec![false], vec![1, 2, 5])]
#[case::real(vec![col("area").gt(lit(1.0))], vec![true], vec![1, 2])]
#[case::int64_on_integer(vec![col("code").eq(lit(7i64))], vec![true], vec![1, 3])]
#[case::int64_on_integer_max(vec![col("code").gt_eq(lit(i32::MAX as i64))], vec![true], vec![5])]
#[case::outside_field_range(vec![col("code").lt(lit(1i64 << 40))], vec![false], vec![1, 2, 3, 5])]
#[case::quoted_string(vec![col("name").eq(lit("O'Brien"))], vec![true], vec![3])]
#[case::is_null(vec![col("name").is_null()], vec![true], vec![4])]
#[case::not(vec![Expr::Not(Box::new(col("name").eq(lit("Paris"))))], vec![true], vec![2, 3, 5])]
#[case::or(vec![col("name").eq(lit("Paris")).or(col("pop").gt(lit(100i64)))], vec![true], vec![1, 5])]
#[case::at_least(vec![col("pop").gt_eq(lit(1000i64))], vec![true], vec![1, 5])]
#[case::constant_first(vec![lit(5i64).lt(col("pop"))], vec![true], vec![1, 2, 5])]
#[case::date(vec![col("opened").eq(lit(ScalarValue::Date32(Some(JAN_1_2024))))], vec![true], vec![1, 3])]
#[case::function(vec![lower_udf().call(vec![col("name")]).eq(lit("paris"))], vec![false], vec![1, 5])]
#[case::mixed(
    vec![col("name").is_not_null(), col("whole").eq(lit(1i64)), col("flag").eq(lit(true))],
    vec![true, false, true],
    vec![1]
)]
fn pushdown_matches_local_filtering(
    #[case] predicates: Vec<Expr>,
    #[case] expected_consumed: Vec<bool>,
    #[case] expected_fids: Vec<i64>,
) {
    let fixture = Fixture::new();

    let (all_rows, _) = fixture.scan(&[]);
    assert_eq!(all_rows.len(), 5);
    let local = keep(all_rows, &predicates.iter().collect::<Vec<_>>());

    let (pushed_rows, consumed) = fixture.scan(&predicates);
    assert_eq!(consumed, expected_consumed);
    let remaining = predicates
        .iter()
        .zip(&consumed)
        .filter(|(_, consumed)| !**consumed)
        .map(|(p, _)| p)
        .collect::<Vec<_>>();
    let pushed = keep(pushed_rows, &remaining);

    assert_eq!(pushed, local);
    assert_eq!(fids(&local), expected_fids);
}
