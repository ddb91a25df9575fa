//! Typed payload codec.
//!
//! All multi-byte elements are little-endian. Consumer values arrive as `f64`
//! and are coerced deterministically:
//!
//! | Type      | Tag | Width | Coercion from `f64`                          |
//! |-----------|-----|-------|----------------------------------------------|
//! | `Float32` | `f` | 4     | round to nearest `f32`                       |
//! | `Int32`   | `i` | 4     | truncate toward zero, wrap modulo 2^32       |
//! | `Char`    | `c` | 1     | truncate toward zero, wrap modulo 2^8        |
//!
//! NaN and infinities coerce to 0 for the integer types. Samples are never
//! rejected for being out of range.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Numeric element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float32,
    Int32,
    Char,
}

impl ElementType {
    /// Encoded width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementType::Float32 | ElementType::Int32 => 4,
            ElementType::Char => 1,
        }
    }

    /// Short name used on the command line and in logs.
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Float32 => "float",
            ElementType::Int32 => "int",
            ElementType::Char => "char",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementType {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" | "f" | "f32" | "float32" => Ok(ElementType::Float32),
            "int" | "i" | "i32" | "int32" => Ok(ElementType::Int32),
            "char" | "c" | "u8" | "byte" => Ok(ElementType::Char),
            other => Err(FrameError::UnknownElementType(other.to_string())),
        }
    }
}

/// Type tag carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Float32,
    Int32,
    Char,
    /// UTF-8 JSON session control message.
    Json,
}

impl TypeTag {
    /// Decode a tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'f' => Some(TypeTag::Float32),
            b'i' => Some(TypeTag::Int32),
            b'c' => Some(TypeTag::Char),
            b'j' => Some(TypeTag::Json),
            _ => None,
        }
    }

    /// The tag byte written on the wire.
    pub fn as_byte(self) -> u8 {
        match self {
            TypeTag::Float32 => b'f',
            TypeTag::Int32 => b'i',
            TypeTag::Char => b'c',
            TypeTag::Json => b'j',
        }
    }

    /// Element width in bytes. Payload lengths are always a multiple of this.
    pub fn width(self) -> usize {
        match self.element() {
            Some(element) => element.width(),
            None => 1,
        }
    }

    /// The numeric element type, if this tag carries samples.
    pub fn element(self) -> Option<ElementType> {
        match self {
            TypeTag::Float32 => Some(ElementType::Float32),
            TypeTag::Int32 => Some(ElementType::Int32),
            TypeTag::Char => Some(ElementType::Char),
            TypeTag::Json => None,
        }
    }
}

impl From<ElementType> for TypeTag {
    fn from(element: ElementType) -> Self {
        match element {
            ElementType::Float32 => TypeTag::Float32,
            ElementType::Int32 => TypeTag::Int32,
            ElementType::Char => TypeTag::Char,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// An ordered sequence of samples with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Char(Vec<u8>),
}

impl Samples {
    /// Coerce consumer values into the requested element type.
    pub fn coerce(element: ElementType, values: &[f64]) -> Self {
        match element {
            ElementType::Float32 => Samples::Float32(values.iter().map(|&v| v as f32).collect()),
            ElementType::Int32 => Samples::Int32(values.iter().map(|&v| to_int32(v)).collect()),
            ElementType::Char => Samples::Char(values.iter().map(|&v| to_uint8(v)).collect()),
        }
    }

    /// Element type of these samples.
    pub fn element_type(&self) -> ElementType {
        match self {
            Samples::Float32(_) => ElementType::Float32,
            Samples::Int32(_) => ElementType::Int32,
            Samples::Char(_) => ElementType::Char,
        }
    }

    /// Wire tag of these samples.
    pub fn tag(&self) -> TypeTag {
        self.element_type().into()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            Samples::Float32(v) => v.len(),
            Samples::Int32(v) => v.len(),
            Samples::Char(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().width()
    }

    /// Element `i` widened to `f64`.
    pub fn get(&self, i: usize) -> Option<f64> {
        match self {
            Samples::Float32(v) => v.get(i).map(|&x| f64::from(x)),
            Samples::Int32(v) => v.get(i).map(|&x| f64::from(x)),
            Samples::Char(v) => v.get(i).map(|&x| f64::from(x)),
        }
    }

    /// All elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Keep at most `len` elements.
    pub fn truncate(&mut self, len: usize) {
        match self {
            Samples::Float32(v) => v.truncate(len),
            Samples::Int32(v) => v.truncate(len),
            Samples::Char(v) => v.truncate(len),
        }
    }
}

impl From<Vec<f32>> for Samples {
    fn from(values: Vec<f32>) -> Self {
        Samples::Float32(values)
    }
}

impl From<Vec<i32>> for Samples {
    fn from(values: Vec<i32>) -> Self {
        Samples::Int32(values)
    }
}

impl From<Vec<u8>> for Samples {
    fn from(values: Vec<u8>) -> Self {
        Samples::Char(values)
    }
}

/// Truncate toward zero and wrap modulo 2^32 into an `i32`.
pub fn to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    let wrapped = value.trunc().rem_euclid(4_294_967_296.0);
    wrapped as u32 as i32
}

/// Truncate toward zero and wrap modulo 2^8 into a `u8`.
pub fn to_uint8(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    let wrapped = value.trunc().rem_euclid(256.0);
    wrapped as u8
}

/// Encode samples into their little-endian payload.
pub fn encode(samples: &Samples) -> Bytes {
    let mut dst = BytesMut::with_capacity(samples.byte_len());
    encode_into(samples, &mut dst);
    dst.freeze()
}

/// Append the little-endian payload of `samples` to `dst`.
pub fn encode_into(samples: &Samples, dst: &mut BytesMut) {
    dst.reserve(samples.byte_len());
    match samples {
        Samples::Float32(values) => values.iter().for_each(|&v| dst.put_f32_le(v)),
        Samples::Int32(values) => values.iter().for_each(|&v| dst.put_i32_le(v)),
        Samples::Char(values) => dst.put_slice(values),
    }
}

/// Decode a payload according to its type tag.
pub fn decode(tag: TypeTag, mut bytes: &[u8]) -> Result<Samples> {
    let element = tag
        .element()
        .ok_or(FrameError::NotNumeric(tag.as_byte() as char))?;
    let width = element.width();
    if bytes.len() % width != 0 {
        return Err(FrameError::MisalignedPayload {
            len: bytes.len(),
            width,
        });
    }

    let count = bytes.len() / width;
    let samples = match element {
        ElementType::Float32 => Samples::Float32((0..count).map(|_| bytes.get_f32_le()).collect()),
        ElementType::Int32 => Samples::Int32((0..count).map(|_| bytes.get_i32_le()).collect()),
        ElementType::Char => Samples::Char(bytes.to_vec()),
    };
    Ok(samples)
}
