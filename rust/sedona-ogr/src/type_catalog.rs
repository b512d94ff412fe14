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
//! Conversion function resolution for relational types
//!
//! Every column bound to a layer carries four conversions resolved from its
//! relational type: text in, binary receive, text out and binary send. They are
//! plain function pointers so a column catalog can be shared freely between
//! operations once built.
use std::fmt::Debug;

use arrow_schema::{DataType, Field, FieldRef, TimeUnit};
use datafusion_common::{exec_datafusion_err, exec_err, Result, ScalarValue};
use sedona_ogr_common::ogr_config_err;

use crate::{
    codec::{geometry_receive, geometry_send, geometry_text_in, geometry_text_out},
    extension_type::{is_geometry_field, is_wkb_storage},
};

/// Parse the text form of a value into a scalar of the given type
pub type TextInFn = fn(&str, &DataType) -> Result<ScalarValue>;

/// Decode the binary form of a value into a scalar of the given type
pub type ReceiveFn = fn(&[u8], &DataType) -> Result<ScalarValue>;

/// Render a non-null scalar as text
pub type TextOutFn = fn(&ScalarValue) -> Result<String>;

/// Encode a non-null scalar in its binary form
pub type SendFn = fn(&ScalarValue) -> Result<Vec<u8>>;

/// The relational type of a column as far as conversions are concerned
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationalType {
    /// A plain Arrow type
    Arrow(DataType),
    /// A geometry stored as EWKB in the given binary storage type
    Geometry(DataType),
}

impl RelationalType {
    pub fn from_field(field: &Field) -> Self {
        if is_geometry_field(field) {
            Self::Geometry(field.data_type().clone())
        } else {
            Self::Arrow(field.data_type().clone())
        }
    }

    pub fn storage_type(&self) -> &DataType {
        match self {
            Self::Arrow(data_type) | Self::Geometry(data_type) => data_type,
        }
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self, Self::Geometry(_))
    }

    /// The element field if this is an Arrow list type
    pub fn element_field(&self) -> Option<&FieldRef> {
        match self {
            Self::Arrow(DataType::List(field))
            | Self::Arrow(DataType::LargeList(field))
            | Self::Arrow(DataType::FixedSizeList(field, _)) => Some(field),
            _ => None,
        }
    }
}

/// Conversion functions resolved for one relational type
///
/// The `*_param` members are the type passed back into the input conversions;
/// the `*_varlena` flags record whether the encoded form has variable length.
#[derive(Debug, Clone)]
pub struct ConversionFunctions {
    pub input: TextInFn,
    pub input_param: DataType,
    pub receive: ReceiveFn,
    pub receive_param: DataType,
    pub output: TextOutFn,
    pub output_varlena: bool,
    pub send: SendFn,
    pub send_varlena: bool,
}

/// Resolves conversion functions by relational type
pub trait TypeCatalog: Debug + Send + Sync {
    /// Resolve the conversions of `rel_type`
    ///
    /// Types without conversions are a configuration error.
    fn resolve(&self, rel_type: &RelationalType) -> Result<ConversionFunctions>;
}

/// [TypeCatalog] covering the Arrow types that can be exchanged with OGR fields
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrowTypeCatalog;

impl TypeCatalog for ArrowTypeCatalog {
    fn resolve(&self, rel_type: &RelationalType) -> Result<ConversionFunctions> {
        match rel_type {
            RelationalType::Geometry(storage_type) => {
                if !is_wkb_storage(storage_type) {
                    return ogr_config_err!(
                        "Geometry columns must be stored as Binary, LargeBinary or BinaryView but got {storage_type}"
                    );
                }

                Ok(ConversionFunctions {
                    input: geometry_text_in,
                    input_param: storage_type.clone(),
                    receive: geometry_receive,
                    receive_param: storage_type.clone(),
                    output: geometry_text_out,
                    output_varlena: true,
                    send: geometry_send,
                    send_varlena: true,
                })
            }
            RelationalType::Arrow(data_type) if is_supported(data_type) => {
                let varlena = is_varlena(data_type);
                Ok(ConversionFunctions {
                    input: text_in_scalar,
                    input_param: data_type.clone(),
                    receive: receive_scalar,
                    receive_param: data_type.clone(),
                    output: text_out_scalar,
                    output_varlena: varlena,
                    send: send_scalar,
                    send_varlena: varlena,
                })
            }
            RelationalType::Arrow(data_type) => {
                ogr_config_err!("No OGR conversion available for column type {data_type}")
            }
        }
    }
}

fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(_, _)
            | DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Utf8View
            | DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
            | DataType::Date32
            | DataType::Date64
            | DataType::Time64(_)
            | DataType::Timestamp(_, None)
    )
}

fn is_varlena(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Utf8View
            | DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
    )
}

/// The bytes of a non-null binary scalar
pub fn binary_bytes(value: &ScalarValue) -> Option<&[u8]> {
    match value {
        ScalarValue::Binary(Some(bytes))
        | ScalarValue::LargeBinary(Some(bytes))
        | ScalarValue::BinaryView(Some(bytes))
        | ScalarValue::FixedSizeBinary(_, Some(bytes)) => Some(bytes),
        _ => None,
    }
}

/// Wrap bytes in a binary scalar of the given storage type
pub fn binary_scalar(bytes: Vec<u8>, storage_type: &DataType) -> Result<ScalarValue> {
    match storage_type {
        DataType::Binary => Ok(ScalarValue::Binary(Some(bytes))),
        DataType::LargeBinary => Ok(ScalarValue::LargeBinary(Some(bytes))),
        DataType::BinaryView => Ok(ScalarValue::BinaryView(Some(bytes))),
        _ => exec_err!("Expected binary storage type but got {storage_type}"),
    }
}

fn text_in_scalar(text: &str, data_type: &DataType) -> Result<ScalarValue> {
    match data_type {
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
            binary_scalar(decode_hex(text)?, data_type)
        }
        _ => ScalarValue::try_from_string(text.to_string(), data_type),
    }
}

fn text_out_scalar(value: &ScalarValue) -> Result<String> {
    if value.is_null() {
        return exec_err!("Can't render NULL as text");
    }

    match value {
        ScalarValue::Float32(Some(v)) => Ok(v.to_string()),
        ScalarValue::Float64(Some(v)) => Ok(v.to_string()),
        ScalarValue::Utf8(Some(v))
        | ScalarValue::LargeUtf8(Some(v))
        | ScalarValue::Utf8View(Some(v)) => Ok(v.clone()),
        _ => {
            if let Some(bytes) = binary_bytes(value) {
                return Ok(encode_hex(bytes));
            }

            match value.cast_to(&DataType::Utf8)? {
                ScalarValue::Utf8(Some(text)) => Ok(text),
                other => exec_err!("Can't render {value:?} as text (got {other:?})"),
            }
        }
    }
}

fn send_scalar(value: &ScalarValue) -> Result<Vec<u8>> {
    let bytes = match value {
        ScalarValue::Boolean(Some(v)) => vec![u8::from(*v)],
        ScalarValue::Int8(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::Int16(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::Int32(Some(v)) | ScalarValue::Date32(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::Int64(Some(v))
        | ScalarValue::Date64(Some(v))
        | ScalarValue::Time64Microsecond(Some(v))
        | ScalarValue::Time64Nanosecond(Some(v))
        | ScalarValue::TimestampSecond(Some(v), None)
        | ScalarValue::TimestampMillisecond(Some(v), None)
        | ScalarValue::TimestampMicrosecond(Some(v), None)
        | ScalarValue::TimestampNanosecond(Some(v), None) => v.to_le_bytes().to_vec(),
        ScalarValue::UInt8(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::UInt16(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::UInt32(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::UInt64(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::Float32(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::Float64(Some(v)) => v.to_le_bytes().to_vec(),
        ScalarValue::Decimal128(Some(v), _, _) => v.to_le_bytes().to_vec(),
        ScalarValue::Utf8(Some(v))
        | ScalarValue::LargeUtf8(Some(v))
        | ScalarValue::Utf8View(Some(v)) => v.as_bytes().to_vec(),
        ScalarValue::Binary(Some(v))
        | ScalarValue::LargeBinary(Some(v))
        | ScalarValue::BinaryView(Some(v)) => v.clone(),
        _ => return exec_err!("Can't send value {value:?}"),
    };

    Ok(bytes)
}

fn fixed<const N: usize>(buf: &[u8]) -> Result<[u8; N]> {
    <[u8; N]>::try_from(buf)
        .map_err(|_| exec_datafusion_err!("Expected {N} bytes but got {}", buf.len()))
}

fn receive_scalar(buf: &[u8], data_type: &DataType) -> Result<ScalarValue> {
    let value = match data_type {
        DataType::Boolean => ScalarValue::Boolean(Some(fixed::<1>(buf)?[0] != 0)),
        DataType::Int8 => ScalarValue::Int8(Some(i8::from_le_bytes(fixed(buf)?))),
        DataType::Int16 => ScalarValue::Int16(Some(i16::from_le_bytes(fixed(buf)?))),
        DataType::Int32 => ScalarValue::Int32(Some(i32::from_le_bytes(fixed(buf)?))),
        DataType::Int64 => ScalarValue::Int64(Some(i64::from_le_bytes(fixed(buf)?))),
        DataType::UInt8 => ScalarValue::UInt8(Some(u8::from_le_bytes(fixed(buf)?))),
        DataType::UInt16 => ScalarValue::UInt16(Some(u16::from_le_bytes(fixed(buf)?))),
        DataType::UInt32 => ScalarValue::UInt32(Some(u32::from_le_bytes(fixed(buf)?))),
        DataType::UInt64 => ScalarValue::UInt64(Some(u64::from_le_bytes(fixed(buf)?))),
        DataType::Float32 => ScalarValue::Float32(Some(f32::from_le_bytes(fixed(buf)?))),
        DataType::Float64 => ScalarValue::Float64(Some(f64::from_le_bytes(fixed(buf)?))),
        DataType::Decimal128(precision, scale) => {
            ScalarValue::Decimal128(Some(i128::from_le_bytes(fixed(buf)?)), *precision, *scale)
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let text = std::str::from_utf8(buf)
                .map_err(|e| exec_datafusion_err!("Invalid UTF-8 in received text: {e}"))?;
            ScalarValue::Utf8(Some(text.to_string())).cast_to(data_type)?
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
            binary_scalar(buf.to_vec(), data_type)?
        }
        DataType::Date32 => ScalarValue::Date32(Some(i32::from_le_bytes(fixed(buf)?))),
        DataType::Date64 => ScalarValue::Date64(Some(i64::from_le_bytes(fixed(buf)?))),
        DataType::Time64(TimeUnit::Microsecond) => {
            ScalarValue::Time64Microsecond(Some(i64::from_le_bytes(fixed(buf)?)))
        }
        DataType::Time64(TimeUnit::Nanosecond) => {
            ScalarValue::Time64Nanosecond(Some(i64::from_le_bytes(fixed(buf)?)))
        }
        DataType::Timestamp(unit, None) => {
            let v = Some(i64::from_le_bytes(fixed(buf)?));
            match unit {
                TimeUnit::Second => ScalarValue::TimestampSecond(v, None),
                TimeUnit::Millisecond => ScalarValue::TimestampMillisecond(v, None),
                TimeUnit::Microsecond => ScalarValue::TimestampMicrosecond(v, None),
                TimeUnit::Nanosecond => ScalarValue::TimestampNanosecond(v, None),
            }
        }
        _ => return exec_err!("Can't receive value of type {data_type}"),
    };

    Ok(value)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let hex = text.strip_prefix("\\x").unwrap_or(text);
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return exec_err!("Invalid hex encoded binary: '{text}'");
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| exec_datafusion_err!("Invalid hex encoded binary: {e}"))
        })
        .collect()
}
