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
//! Translation of relational predicates into OGR attribute filters
//!
//! Each top-level predicate is translated as a whole or not at all. Anything
//! that can't be rendered safely (unknown functions, volatile expressions,
//! feature id or geometry columns, values that don't survive a round trip
//! through the column's conversions, literals that can't be quoted) is left
//! for the caller to evaluate against materialized rows.
use arrow_schema::{DataType, TimeUnit};
use datafusion_common::ScalarValue;
use datafusion_expr::{BinaryExpr, Cast, Expr, Operator};
use sedona_ogr_common::CharacterEncoding;

use crate::{
    catalog::{OgrFdwColumn, OgrFdwTable},
    constant::{constant_value, ParamBindings},
    field::OgrFieldType,
    spatial_filter::{extract_spatial_filter, OgrSpatialFilter},
};

/// What the deparser needs to know about the target table and session
#[derive(Debug, Clone, Copy)]
pub struct DeparseContext<'a> {
    pub table: &'a OgrFdwTable,
    pub encoding: &'a CharacterEncoding,
    pub bindings: &'a ParamBindings,
}

/// Output of [deparse]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeparseResult {
    /// The attribute filter, or `None` if nothing could be translated
    pub filter: Option<String>,
    /// Placeholder bindings the filter text depends on
    pub params: Vec<(String, ScalarValue)>,
    /// Per predicate: was it translated into the filter
    pub consumed: Vec<bool>,
}

/// Translate a conjunction of predicates into an OGR attribute filter
pub fn deparse(predicates: &[Expr], ctx: &DeparseContext) -> DeparseResult {
    let mut result = DeparseResult {
        consumed: vec![false; predicates.len()],
        ..Default::default()
    };

    let mut clauses = Vec::new();
    for (i, predicate) in predicates.iter().enumerate() {
        let mut deparser = Deparser {
            ctx,
            params: Vec::new(),
        };

        match deparser.deparse_expr(predicate) {
            Some(clause) => {
                result.consumed[i] = true;
                clauses.push(clause);
                for (id, value) in deparser.params {
                    if !result.params.iter().any(|(existing, _)| *existing == id) {
                        result.params.push((id, value));
                    }
                }
            }
            None => log::debug!("Predicate not pushed down to OGR: {predicate}"),
        }
    }

    result.filter = match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(
            clauses
                .iter()
                .map(|clause| format!("({clause})"))
                .collect::<Vec<_>>()
                .join(" AND "),
        ),
    };

    result
}

/// Spatial and attribute filters planned for one scan
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PushdownPlan {
    pub spatial_filter: Option<OgrSpatialFilter>,
    pub attribute_filter: Option<String>,
    pub params: Vec<(String, ScalarValue)>,
    /// Per predicate of the caller's list: is it fully handled by the layer
    pub consumed: Vec<bool>,
}

impl PushdownPlan {
    pub fn num_consumed(&self) -> usize {
        self.consumed.iter().filter(|consumed| **consumed).count()
    }

    /// The predicates the caller still has to evaluate
    pub fn unconsumed<'a>(&self, predicates: &'a [Expr]) -> Vec<&'a Expr> {
        predicates
            .iter()
            .zip(&self.consumed)
            .filter(|(_, consumed)| !**consumed)
            .map(|(predicate, _)| predicate)
            .collect()
    }
}

/// Extract the spatial filter then deparse what remains
pub fn plan_pushdown(predicates: &[Expr], ctx: &DeparseContext) -> PushdownPlan {
    let extraction = extract_spatial_filter(predicates, ctx.table, ctx.bindings);
    let remaining = extraction
        .remaining
        .iter()
        .map(|i| predicates[*i].clone())
        .collect::<Vec<_>>();
    let deparsed = deparse(&remaining, ctx);

    let mut consumed = vec![false; predicates.len()];
    if let Some(i) = extraction.consumed {
        consumed[i] = true;
    }
    for (i, was_consumed) in extraction.remaining.iter().zip(deparsed.consumed) {
        consumed[*i] = was_consumed;
    }

    PushdownPlan {
        spatial_filter: extraction.filter,
        attribute_filter: deparsed.filter,
        params: deparsed.params,
        consumed,
    }
}

/// Quote an OGR field name
///
/// Names containing a double quote can't be expressed.
pub fn quote_identifier(name: &str, encoding: &CharacterEncoding) -> Option<String> {
    if name.contains('"') || name.contains('\0') || (!encoding.is_utf8() && !name.is_ascii()) {
        return None;
    }

    Some(format!("\"{name}\""))
}

/// Quote a string literal, doubling embedded single quotes
pub fn quote_literal(text: &str, encoding: &CharacterEncoding) -> Option<String> {
    if text.contains('\0') || (!encoding.is_utf8() && !text.is_ascii()) {
        return None;
    }

    Some(format!("'{}'", text.replace('\'', "''")))
}

struct Deparser<'a, 'b> {
    ctx: &'b DeparseContext<'a>,
    params: Vec<(String, ScalarValue)>,
}

impl Deparser<'_, '_> {
    fn deparse_expr(&mut self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::BinaryExpr(BinaryExpr { left, op, right }) => match op {
                Operator::And | Operator::Or => {
                    let left = self.deparse_expr(left)?;
                    let right = self.deparse_expr(right)?;
                    let connective = if *op == Operator::And { "AND" } else { "OR" };
                    Some(format!("({left} {connective} {right})"))
                }
                _ => self.deparse_comparison(left, *op, right),
            },
            Expr::Not(inner) => Some(format!("NOT ({})", self.deparse_expr(inner)?)),
            Expr::IsNull(inner) => Some(format!("{} IS NULL", self.deparse_field(inner)?.0)),
            Expr::IsNotNull(inner) => {
                Some(format!("{} IS NOT NULL", self.deparse_field(inner)?.0))
            }
            _ => None,
        }
    }

    fn deparse_comparison(&mut self, left: &Expr, op: Operator, right: &Expr) -> Option<String> {
        let (column_expr, constant_expr, op) = if self.column(left).is_some() {
            (left, right, op)
        } else {
            (right, left, op.swap()?)
        };

        let (identifier, column) = self.deparse_field(column_expr)?;
        let constant = constant_value(constant_expr, self.ctx.bindings)?;
        let clause = if *column.rel_type.storage_type() == DataType::Boolean {
            boolean_comparison(&identifier, column, op, &constant.value)?
        } else {
            let op = comparison_operator(op)?;
            let value = self.render_value(column, &constant.value)?;
            format!("{identifier} {op} {value}")
        };

        if let Some(id) = constant.param_id {
            self.params.push((id, constant.value));
        }

        Some(clause)
    }

    /// The ordinary attribute column an expression refers to
    ///
    /// A column wrapped in a cast that can't change comparison results is
    /// accepted as the column itself.
    fn column(&self, expr: &Expr) -> Option<&OgrFdwColumn> {
        let column_expr = match expr {
            Expr::Cast(Cast { expr, data_type }) => {
                let column = self.column(expr)?;
                if !is_preserving_cast(column.rel_type.storage_type(), data_type) {
                    return None;
                }
                return Some(column);
            }
            Expr::Column(column_expr) => column_expr,
            _ => return None,
        };

        let column = self.ctx.table.column_by_name(&column_expr.name)?;
        if column.is_array || column.ogr_field().is_none() {
            return None;
        }

        Some(column)
    }

    fn deparse_field(&self, expr: &Expr) -> Option<(String, &OgrFdwColumn)> {
        let column = self.column(expr)?;
        let (field_name, _) = column.ogr_field()?;
        Some((quote_identifier(field_name, self.ctx.encoding)?, column))
    }

    fn render_value(&self, column: &OgrFdwColumn, value: &ScalarValue) -> Option<String> {
        let (_, field_type) = column.ogr_field()?;
        let column_type = column.rel_type.storage_type();
        let conversions = column.conversions.as_ref()?;

        if value.is_null()
            || !reads_losslessly(field_type, column_type)
            || type_family(&value.data_type()) != type_family(column_type)
        {
            return None;
        }

        // The constant must survive the trip to the column type and back
        let cast = value.cast_to(column_type).ok()?;
        if cast.is_null() || cast.cast_to(&value.data_type()).ok()? != *value {
            return None;
        }

        // ...and be representable in the field's own type
        let native = cast.cast_to(&field_type.native_type()).ok()?;
        if native.is_null() || native.cast_to(column_type).ok()? != cast {
            return None;
        }

        let text = (conversions.output)(&cast).ok()?;
        let reparsed = (conversions.input)(&text, &conversions.input_param).ok()?;
        if reparsed != cast {
            return None;
        }

        match field_type {
            OgrFieldType::Integer | OgrFieldType::Integer64 | OgrFieldType::Real => {
                is_numeric_text(&text).then_some(text)
            }
            OgrFieldType::String | OgrFieldType::WideString => {
                quote_literal(&text, self.ctx.encoding)
            }
            OgrFieldType::Date => quote_literal(&ogr_date(&text)?, self.ctx.encoding),
            OgrFieldType::Time => quote_literal(&ogr_time(&text)?, self.ctx.encoding),
            OgrFieldType::DateTime => {
                let (date, time) = text.split_once(['T', ' '])?;
                let datetime = format!("{} {}", ogr_date(date)?, ogr_time(time)?);
                quote_literal(&datetime, self.ctx.encoding)
            }
            _ => None,
        }
    }
}

fn comparison_operator(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Eq => Some("="),
        Operator::NotEq => Some("<>"),
        Operator::Lt => Some("<"),
        Operator::LtEq => Some("<="),
        Operator::Gt => Some(">"),
        Operator::GtEq => Some(">="),
        _ => None,
    }
}

/// Whether reading a field into a column of `data_type` keeps every value
/// distinct and ordered, so comparing native values in the layer agrees with
/// comparing the values the scan produces
fn reads_losslessly(field_type: OgrFieldType, data_type: &DataType) -> bool {
    match field_type {
        OgrFieldType::Integer => matches!(data_type, DataType::Int32 | DataType::Int64),
        OgrFieldType::Integer64 => matches!(data_type, DataType::Int64),
        OgrFieldType::Real => matches!(data_type, DataType::Float64),
        OgrFieldType::String | OgrFieldType::WideString => matches!(
            data_type,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View
        ),
        OgrFieldType::Date => matches!(data_type, DataType::Date32),
        OgrFieldType::Time => matches!(
            data_type,
            DataType::Time64(TimeUnit::Microsecond | TimeUnit::Nanosecond)
        ),
        OgrFieldType::DateTime => matches!(
            data_type,
            DataType::Timestamp(TimeUnit::Microsecond | TimeUnit::Nanosecond, None)
        ),
        _ => false,
    }
}

/// Compare a boolean column read from an integer field
///
/// Scans read any non-zero integer as true, so only equality against a boolean
/// constant has an exact translation.
fn boolean_comparison(
    identifier: &str,
    column: &OgrFdwColumn,
    op: Operator,
    value: &ScalarValue,
) -> Option<String> {
    let (_, field_type) = column.ogr_field()?;
    if !matches!(field_type, OgrFieldType::Integer | OgrFieldType::Integer64) {
        return None;
    }

    let ScalarValue::Boolean(Some(value)) = value else {
        return None;
    };

    let is_true = match op {
        Operator::Eq => *value,
        Operator::NotEq => !*value,
        _ => return None,
    };

    Some(if is_true {
        format!("{identifier} <> 0")
    } else {
        format!("{identifier} = 0")
    })
}

#[derive(Debug, PartialEq)]
enum TypeFamily {
    Numeric,
    Boolean,
    Text,
    Date,
    Time,
    Timestamp,
    Other,
}

fn type_family(data_type: &DataType) -> TypeFamily {
    match data_type {
        DataType::Boolean => TypeFamily::Boolean,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => TypeFamily::Text,
        DataType::Date32 | DataType::Date64 => TypeFamily::Date,
        DataType::Time32(_) | DataType::Time64(_) => TypeFamily::Time,
        DataType::Timestamp(_, _) => TypeFamily::Timestamp,
        data_type if data_type.is_numeric() => TypeFamily::Numeric,
        _ => TypeFamily::Other,
    }
}

/// Casts of a column that keep every value distinct and ordered the same way
fn is_preserving_cast(from: &DataType, to: &DataType) -> bool {
    use DataType::*;

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (Int8, Int16 | Int32 | Int64)
            | (Int16, Int32 | Int64)
            | (Int32, Int64)
            | (UInt8, UInt16 | UInt32 | UInt64 | Int16 | Int32 | Int64)
            | (UInt16, UInt32 | UInt64 | Int32 | Int64)
            | (UInt32, UInt64 | Int64)
            | (Float32, Float64)
            | (
                Utf8 | LargeUtf8 | Utf8View,
                Utf8 | LargeUtf8 | Utf8View
            )
    )
}

fn is_numeric_text(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().any(|c| c.is_ascii_digit())
}

/// `YYYY-MM-DD` to `YYYY/MM/DD`
fn ogr_date(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());

    well_formed.then(|| text.replace('-', "/"))
}

/// `HH:MM:SS[.fff]`
fn ogr_time(text: &str) -> Option<String> {
    let (hms, fraction) = match text.split_once('.') {
        Some((hms, fraction)) => (hms, Some(fraction)),
        None => (text, None),
    };

    let bytes = hms.as_bytes();
    let well_formed = bytes.len() == 8
        && bytes[2] == b':'
        && bytes[5] == b':'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 2 || i == 5 || b.is_ascii_digit())
        && fraction.is_none_or(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()));

    well_formed.then(|| text.to_string())
}
