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
//! Evaluation of OGR SQL attribute filters over in-memory features
//!
//! Supports the subset of the OGR SQL `WHERE` grammar that deparsed
//! predicates use: comparisons of a quoted field against a literal,
//! `IS [NOT] NULL`, `NOT`, `AND` and `OR`. Comparisons involving a null field
//! are unknown and unknown rows are filtered out.
use std::cmp::Ordering;

use arrow_schema::DataType;
use datafusion_common::{plan_err, Result, ScalarValue};
use sedona_ogr::{
    connection::OgrFeature,
    field::{OgrFieldType, OgrLayerDefn},
};

/// A parsed attribute filter bound to a layer's fields
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    expr: FilterExpr,
}

#[derive(Debug, Clone, PartialEq)]
enum FilterExpr {
    Compare {
        field: usize,
        op: CompareOp,
        value: ScalarValue,
    },
    IsNull {
        field: usize,
        negated: bool,
    },
    Not(Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::NotEq => ordering.is_ne(),
            Self::Lt => ordering.is_lt(),
            Self::LtEq => ordering.is_le(),
            Self::Gt => ordering.is_gt(),
            Self::GtEq => ordering.is_ge(),
        }
    }
}

impl AttributeFilter {
    /// Parse `text` against the fields of `defn`
    pub fn try_new(text: &str, defn: &OgrLayerDefn) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            defn,
        };

        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return plan_err!("Unexpected {:?} in attribute filter {text}", parser.peek());
        }

        Ok(Self { expr })
    }

    /// Whether the filter is true for `feature`
    pub fn matches(&self, feature: &OgrFeature) -> bool {
        evaluate(&self.expr, feature) == Some(true)
    }
}

fn evaluate(expr: &FilterExpr, feature: &OgrFeature) -> Option<bool> {
    match expr {
        FilterExpr::Compare { field, op, value } => {
            let field_value = feature.fields.get(*field)?;
            if field_value.is_null() {
                return None;
            }

            let field_value = field_value.cast_to(&value.data_type()).ok()?;
            let ordering = field_value.partial_cmp(value)?;
            Some(op.accepts(ordering))
        }
        FilterExpr::IsNull { field, negated } => {
            let is_null = feature.fields.get(*field).is_none_or(|v| v.is_null());
            Some(is_null != *negated)
        }
        FilterExpr::Not(inner) => evaluate(inner, feature).map(|v| !v),
        FilterExpr::And(left, right) => {
            match (evaluate(left, feature), evaluate(right, feature)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        }
        FilterExpr::Or(left, right) => {
            match (evaluate(left, feature), evaluate(right, feature)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Text(String),
    Number(String),
    Word(String),
    Op(CompareOp),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '"' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => name.push(c),
                        None => return plan_err!("Unterminated identifier in {text}"),
                    }
                }
                tokens.push(Token::Identifier(name));
            }
            '\'' => {
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                            value.push('\'');
                        }
                        Some('\'') => break,
                        Some(c) => value.push(c),
                        None => return plan_err!("Unterminated string in {text}"),
                    }
                }
                tokens.push(Token::Text(value));
            }
            '=' => tokens.push(Token::Op(CompareOp::Eq)),
            '<' => match chars.peek() {
                Some('>') => {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::NotEq));
                }
                Some('=') => {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::LtEq));
                }
                _ => tokens.push(Token::Op(CompareOp::Lt)),
            },
            '>' => match chars.peek() {
                Some('=') => {
                    chars.next();
                    tokens.push(Token::Op(CompareOp::GtEq));
                }
                _ => tokens.push(Token::Op(CompareOp::Gt)),
            },
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let mut number = c.to_string();
                while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
                    number.push(c);
                }
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = c.to_string();
                while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    word.push(c);
                }
                tokens.push(Token::Word(word.to_ascii_uppercase()));
            }
            c => return plan_err!("Unexpected character '{c}' in {text}"),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    defn: &'a OgrLayerDefn,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn next_is_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr> {
        let mut expr = self.parse_and()?;
        while self.next_is_word("OR") {
            expr = FilterExpr::Or(Box::new(expr), Box::new(self.parse_and()?));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<FilterExpr> {
        let mut expr = self.parse_unary()?;
        while self.next_is_word("AND") {
            expr = FilterExpr::And(Box::new(expr), Box::new(self.parse_unary()?));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr> {
        if self.next_is_word("NOT") {
            return Ok(FilterExpr::Not(Box::new(self.parse_unary()?)));
        }

        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    other => plan_err!("Expected ')' but got {other:?}"),
                }
            }
            Some(Token::Identifier(name)) => self.parse_predicate(&name),
            other => plan_err!("Expected a field or '(' but got {other:?}"),
        }
    }

    fn parse_predicate(&mut self, name: &str) -> Result<FilterExpr> {
        let Some(field) = self.defn.field_index(name) else {
            return plan_err!("Layer '{}' has no field '{name}'", self.defn.name);
        };

        if self.next_is_word("IS") {
            let negated = self.next_is_word("NOT");
            if !self.next_is_word("NULL") {
                return plan_err!("Expected NULL after IS");
            }
            return Ok(FilterExpr::IsNull { field, negated });
        }

        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            other => {
                return plan_err!("Expected a comparison after '{name}' but got {other:?}")
            }
        };

        let field_type = self.defn.fields[field].field_type;
        let value = match self.advance() {
            Some(literal) => literal_value(field_type, literal)?,
            None => return plan_err!("Missing value after '{name}'"),
        };

        Ok(FilterExpr::Compare { field, op, value })
    }
}

/// Type a literal for comparison with a field of `field_type`
fn literal_value(field_type: OgrFieldType, literal: Token) -> Result<ScalarValue> {
    let (target, text) = match (field_type, literal) {
        (OgrFieldType::Integer | OgrFieldType::Integer64, Token::Number(n))
            if !n.contains('.') =>
        {
            (DataType::Int64, n)
        }
        (
            OgrFieldType::Integer | OgrFieldType::Integer64 | OgrFieldType::Real,
            Token::Number(n),
        ) => (DataType::Float64, n),
        (OgrFieldType::String | OgrFieldType::WideString, Token::Text(s)) => (DataType::Utf8, s),
        (OgrFieldType::Date | OgrFieldType::DateTime, Token::Text(s)) => {
            (field_type.native_type(), s.replace('/', "-"))
        }
        (OgrFieldType::Time, Token::Text(s)) => (field_type.native_type(), s),
        (field_type, literal) => {
            return plan_err!(
                "Can't compare a {} field with {literal:?}",
                field_type.name()
            )
        }
    };

    let value = ScalarValue::Utf8(Some(text.clone())).cast_to(&target)?;
    if value.is_null() {
        return plan_err!("Invalid {} literal '{text}'", field_type.name());
    }

    Ok(value)
}

#[cfg(test)]
mod test {
    use arrow_schema::TimeUnit;
    use rstest::rstest;

    use super::*;

    fn defn() -> OgrLayerDefn {
        OgrLayerDefn::new("things")
            .with_field("name", OgrFieldType::String)
            .with_field("pop", OgrFieldType::Integer64)
            .with_field("area", OgrFieldType::Real)
            .with_field("flag", OgrFieldType::Integer)
            .with_field("opened", OgrFieldType::Date)
            .with_field("stamp", OgrFieldType::DateTime)
    }

    fn feature(
        name: Option<&str>,
        pop: Option<i64>,
        area: Option<f64>,
        flag: Option<i32>,
    ) -> OgrFeature {
        OgrFeature {
            fid: None,
            fields: vec![
                ScalarValue::Utf8(name.map(|s| s.to_string())),
                ScalarValue::Int64(pop),
                ScalarValue::Float64(area),
                ScalarValue::Int32(flag),
                ScalarValue::Date32(Some(19723)),
                ScalarValue::TimestampMicrosecond(Some(1_704_164_400_000_000), None),
            ],
            geometry: None,
        }
    }

    #[rstest]
    #[case("\"name\" = 'Paris'", true)]
    #[case("\"name\" <> 'Paris'", false)]
    #[case("\"name\" = 'O''Brien'", false)]
    #[case("\"pop\" > 100", true)]
    #[case("\"pop\" <= -5", false)]
    #[case("\"pop\" >= 100.5", true)]
    #[case("\"area\" < 1.5", true)]
    #[case("\"area\" = 1", false)]
    #[case("\"flag\" <> 0", true)]
    #[case("\"name\" IS NULL", false)]
    #[case("\"name\" IS NOT NULL", true)]
    #[case("NOT (\"pop\" = 2000)", false)]
    #[case("(\"pop\" = 2 OR \"area\" > 1)", true)]
    #[case("(\"pop\" = 2000) AND (\"flag\" = 0)", false)]
    #[case("\"opened\" = '2024/01/01'", true)]
    #[case("\"opened\" < '2023/12/31'", false)]
    #[case("\"stamp\" = '2024/01/02 03:00:00'", true)]
    fn evaluates(#[case] text: &str, #[case] expected: bool) {
        let filter = AttributeFilter::try_new(text, &defn()).unwrap();
        let paris = feature(Some("Paris"), Some(2000), Some(1.25), Some(7));
        assert_eq!(filter.matches(&paris), expected, "{text}");
    }

    #[test]
    fn nulls_are_unknown() {
        let nameless = feature(None, None, Some(1.0), None);
        let cases = [
            ("\"name\" = 'Paris'", false),
            ("NOT (\"name\" = 'Paris')", false),
            ("(\"name\" = 'Paris' OR \"area\" = 1)", true),
            ("(\"pop\" > 1 AND \"area\" = 2)", false),
            ("NOT ((\"pop\" > 1 AND \"area\" = 2))", true),
            ("\"name\" IS NULL", true),
        ];

        for (text, expected) in cases {
            let filter = AttributeFilter::try_new(text, &defn()).unwrap();
            assert_eq!(filter.matches(&nameless), expected, "{text}");
        }
    }

    #[rstest]
    #[case("\"missing\" = 1")]
    #[case("\"name\" = 5")]
    #[case("\"pop\" = 'five'")]
    #[case("\"opened\" = 'yesterday'")]
    #[case("\"name\" = 'Paris")]
    #[case("\"name\" IS 5")]
    #[case("(\"pop\" = 1")]
    #[case("\"pop\" = 1 \"area\"")]
    #[case("pop = 1")]
    fn rejects(#[case] text: &str) {
        assert!(AttributeFilter::try_new(text, &defn()).is_err(), "{text}");
    }

    #[test]
    fn literal_types() {
        assert_eq!(
            literal_value(OgrFieldType::Time, Token::Text("12:30:00.5".to_string())).unwrap(),
            ScalarValue::Time64Microsecond(Some(45_000_500_000))
        );
        assert_eq!(
            literal_value(OgrFieldType::Integer, Token::Number("-2147483648".to_string()))
                .unwrap(),
            ScalarValue::Int64(Some(-2147483648))
        );
        assert_eq!(
            literal_value(OgrFieldType::Real, Token::Number("2".to_string()))
                .unwrap()
                .data_type(),
            DataType::Float64
        );
        assert_eq!(
            OgrFieldType::DateTime.native_type(),
            DataType::Timestamp(TimeUnit::Microsecond, None)
        );
    }
}
