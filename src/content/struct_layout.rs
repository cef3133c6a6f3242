//! # Struct Layout
//!
//! Typed, fixed-size binary record descriptions used for per-block custom
//! fields. A layout is built once from an ordered list of field descriptors;
//! fields are packed sequentially without padding and the layout is
//! immutable afterwards.
//!
//! Values are stored little-endian inside the record buffer.
//!
//! The same type also answers "can records written with layout A be read
//! with layout B?" ([`StructLayout::check_compatibility`]) and performs the
//! conversion ([`StructLayout::convert`]). Every block-type schema change
//! in a world migration goes through these two functions.

use std::collections::HashMap;
use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Largest record a layout may describe; block metadata stores sizes as `u16`.
pub const MAX_RECORD_SIZE: usize = u16::MAX as usize;

/// Element type of a field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Signed 8-bit integer.
    #[serde(rename = "int8")]
    I8,
    /// Signed 16-bit integer.
    #[serde(rename = "int16")]
    I16,
    /// Signed 32-bit integer.
    #[serde(rename = "int32")]
    I32,
    /// Signed 64-bit integer.
    #[serde(rename = "int64")]
    I64,
    /// 32-bit float.
    #[serde(rename = "float32")]
    F32,
    /// 64-bit float.
    #[serde(rename = "float64")]
    F64,
    /// A byte of UTF-8 text.
    #[serde(rename = "char")]
    Char,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TypeClass {
    Integer,
    Float,
    Char,
}

impl FieldType {
    /// Size of a single element in bytes.
    pub fn size(self) -> usize {
        match self {
            FieldType::I8 | FieldType::Char => 1,
            FieldType::I16 => 2,
            FieldType::I32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::F64 => 8,
        }
    }

    /// Name used in serialized layouts.
    pub fn name(self) -> &'static str {
        match self {
            FieldType::I8 => "int8",
            FieldType::I16 => "int16",
            FieldType::I32 => "int32",
            FieldType::I64 => "int64",
            FieldType::F32 => "float32",
            FieldType::F64 => "float64",
            FieldType::Char => "char",
        }
    }

    fn class(self) -> TypeClass {
        match self {
            FieldType::I8 | FieldType::I16 | FieldType::I32 | FieldType::I64 => TypeClass::Integer,
            FieldType::F32 | FieldType::F64 => TypeClass::Float,
            FieldType::Char => TypeClass::Char,
        }
    }

    fn integer_range(self) -> (i64, i64) {
        match self {
            FieldType::I8 => (i8::MIN as i64, i8::MAX as i64),
            FieldType::I16 => (i16::MIN as i64, i16::MAX as i64),
            FieldType::I32 => (i32::MIN as i64, i32::MAX as i64),
            _ => (i64::MIN, i64::MAX),
        }
    }

    /// Whether every value of `self` survives conversion to `target`.
    fn converts_losslessly_to(self, target: FieldType) -> bool {
        match (self.class(), target.class()) {
            (TypeClass::Char, TypeClass::Char) => true,
            (TypeClass::Char, _) | (_, TypeClass::Char) => false,
            (TypeClass::Integer, TypeClass::Integer) | (TypeClass::Float, TypeClass::Float) => {
                target.size() >= self.size()
            }
            (TypeClass::Float, TypeClass::Integer) => false,
            // the float mantissa must hold every integer value
            (TypeClass::Integer, TypeClass::Float) => match self {
                FieldType::I8 | FieldType::I16 => true,
                FieldType::I32 => target == FieldType::F64,
                _ => false,
            },
        }
    }
}

/// What happens to a value that does not fit the destination field when
/// conversion with data loss is allowed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldConvertStrategy {
    /// Out-of-range values become zero.
    #[default]
    Reset,
    /// Out-of-range values saturate at the nearest bound.
    Clamp,
}

fn default_elements() -> usize {
    1
}

/// Serialized form of a single field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Element type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Field name, unique within the layout.
    pub name: String,
    /// Number of elements, at least 1.
    #[serde(default = "default_elements")]
    pub elements: usize,
    /// How out-of-range values are narrowed.
    #[serde(rename = "convert-strategy", default)]
    pub convert_strategy: FieldConvertStrategy,
}

impl FieldDescriptor {
    /// A field using the [`FieldConvertStrategy::Reset`] strategy.
    pub fn new(field_type: FieldType, name: impl Into<String>, elements: usize) -> Self {
        Self {
            field_type,
            name: name.into(),
            elements,
            convert_strategy: FieldConvertStrategy::Reset,
        }
    }

    /// Sets the narrowing strategy.
    pub fn with_strategy(mut self, strategy: FieldConvertStrategy) -> Self {
        self.convert_strategy = strategy;
        self
    }
}

/// A packed field with its computed position inside the record.
#[derive(Clone, Debug)]
pub struct Field {
    /// Element type.
    pub field_type: FieldType,
    /// Field name.
    pub name: String,
    /// Number of elements.
    pub elements: usize,
    /// Byte offset from the record start.
    pub offset: usize,
    /// Total size in bytes (`elements * field_type.size()`).
    pub size: usize,
    /// How out-of-range values are narrowed.
    pub convert_strategy: FieldConvertStrategy,
}

impl Field {
    fn element_range(&self, index: usize) -> Result<Range<usize>> {
        if index >= self.elements {
            return Err(StorageError::FieldIndexOutOfRange {
                field: self.name.clone(),
                index,
                elements: self.elements,
            });
        }
        let start = self.offset + index * self.field_type.size();
        Ok(start..start + self.field_type.size())
    }

    fn type_mismatch(&self, expected: &'static str) -> StorageError {
        StorageError::FieldTypeMismatch {
            field: self.name.clone(),
            expected,
            actual: self.field_type.name(),
        }
    }
}

/// Reason a stored field cannot be carried over to a new layout losslessly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldIncompatibilityType {
    /// The field no longer exists.
    Missing,
    /// The field exists but is narrower.
    DataLoss,
}

/// A stored field that cannot be carried over losslessly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldIncompatibility {
    /// Field name.
    pub name: String,
    /// Why it is incompatible.
    pub kind: FieldIncompatibilityType,
}

/// Fixed-size binary record description.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldDescriptor>", into = "Vec<FieldDescriptor>")]
pub struct StructLayout {
    size: usize,
    fields: Vec<Field>,
    indices: HashMap<String, usize>,
}

#[derive(Copy, Clone)]
enum Numeric {
    Integer(i64),
    Float(f64),
}

impl StructLayout {
    /// Packs `descriptors` sequentially into a new layout.
    ///
    /// # Errors
    /// Fails on empty or duplicate names, zero-element fields, and records
    /// larger than `u16::MAX` bytes (the block metadata heap stores sizes as `u16`).
    pub fn create(descriptors: Vec<FieldDescriptor>) -> Result<Self> {
        let mut fields = Vec::with_capacity(descriptors.len());
        let mut indices = HashMap::with_capacity(descriptors.len());
        let mut offset = 0usize;

        for descriptor in descriptors {
            if descriptor.name.is_empty() {
                return Err(StorageError::InvalidLayout("empty field name".into()));
            }
            if descriptor.elements == 0 {
                return Err(StorageError::InvalidLayout(format!(
                    "field '{}' has zero elements",
                    descriptor.name
                )));
            }
            if indices.contains_key(&descriptor.name) {
                return Err(StorageError::InvalidLayout(format!(
                    "duplicate field '{}'",
                    descriptor.name
                )));
            }
            let size = descriptor
                .field_type
                .size()
                .checked_mul(descriptor.elements)
                .filter(|size| *size <= MAX_RECORD_SIZE)
                .ok_or_else(|| {
                    StorageError::InvalidLayout(format!(
                        "field '{}' with {} elements exceeds the record size limit",
                        descriptor.name, descriptor.elements
                    ))
                })?;
            indices.insert(descriptor.name.clone(), fields.len());
            fields.push(Field {
                field_type: descriptor.field_type,
                name: descriptor.name,
                elements: descriptor.elements,
                offset,
                size,
                convert_strategy: descriptor.convert_strategy,
            });
            offset += size;
            if offset > MAX_RECORD_SIZE {
                return Err(StorageError::InvalidLayout(format!(
                    "record size {offset} exceeds {MAX_RECORD_SIZE}"
                )));
            }
        }

        Ok(Self {
            size: offset,
            fields,
            indices,
        })
    }

    /// Total record size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fields in layout order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field named `name`.
    pub fn find(&self, name: &str) -> Option<&Field> {
        self.indices.get(name).map(|&index| &self.fields[index])
    }

    /// Returns the serialized form of this layout.
    pub fn descriptors(&self) -> Vec<FieldDescriptor> {
        self.fields
            .iter()
            .map(|field| FieldDescriptor {
                field_type: field.field_type,
                name: field.name.clone(),
                elements: field.elements,
                convert_strategy: field.convert_strategy,
            })
            .collect()
    }

    fn require(&self, name: &str) -> Result<&Field> {
        self.find(name)
            .ok_or_else(|| StorageError::UnknownField(name.to_string()))
    }

    fn check_buffer(&self, len: usize, field: &Field) -> Result<()> {
        let needed = field.offset + field.size;
        if len < needed {
            return Err(StorageError::BufferUnderflow {
                needed,
                available: len,
            });
        }
        Ok(())
    }

    /// Reads element `index` of an integer field.
    pub fn get_integer(&self, src: &[u8], name: &str, index: usize) -> Result<i64> {
        let field = self.require(name)?;
        if field.field_type.class() != TypeClass::Integer {
            return Err(field.type_mismatch("integer"));
        }
        let range = field.element_range(index)?;
        self.check_buffer(src.len(), field)?;
        Ok(read_integer(&src[range], field.field_type))
    }

    /// Reads element `index` of an integer or float field as `f64`.
    pub fn get_number(&self, src: &[u8], name: &str, index: usize) -> Result<f64> {
        let field = self.require(name)?;
        let range = field.element_range(index)?;
        self.check_buffer(src.len(), field)?;
        match read_numeric(&src[range], field.field_type) {
            Some(Numeric::Integer(value)) => Ok(value as f64),
            Some(Numeric::Float(value)) => Ok(value),
            None => Err(field.type_mismatch("number")),
        }
    }

    /// Reads a char field up to its first NUL byte.
    pub fn get_chars<'a>(&self, src: &'a [u8], name: &str) -> Result<&'a str> {
        let field = self.require(name)?;
        if field.field_type != FieldType::Char {
            return Err(field.type_mismatch("char"));
        }
        self.check_buffer(src.len(), field)?;
        let bytes = &src[field.offset..field.offset + field.size];
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end])
            .map_err(|err| StorageError::Corrupted(format!("field '{name}': {err}")))
    }

    /// Writes element `index` of an integer field, saturating at the type bounds.
    pub fn set_integer(&self, dst: &mut [u8], value: i64, name: &str, index: usize) -> Result<()> {
        let field = self.require(name)?;
        if field.field_type.class() != TypeClass::Integer {
            return Err(field.type_mismatch("integer"));
        }
        let range = field.element_range(index)?;
        self.check_buffer(dst.len(), field)?;
        let (min, max) = field.field_type.integer_range();
        write_integer(&mut dst[range], field.field_type, value.clamp(min, max));
        Ok(())
    }

    /// Writes element `index` of a numeric field.
    ///
    /// Integer fields receive the value truncated toward zero and saturated;
    /// `float32` fields saturate at `f32::MAX`.
    pub fn set_number(&self, dst: &mut [u8], value: f64, name: &str, index: usize) -> Result<()> {
        let field = self.require(name)?;
        if field.field_type == FieldType::Char {
            return Err(field.type_mismatch("number"));
        }
        let range = field.element_range(index)?;
        self.check_buffer(dst.len(), field)?;
        write_converted(
            &mut dst[range],
            field.field_type,
            Numeric::Float(value),
            FieldConvertStrategy::Clamp,
        );
        Ok(())
    }

    /// Writes an ASCII string into a char field, truncating to the field size.
    ///
    /// # Returns
    /// The number of characters written.
    pub fn set_ascii(&self, dst: &mut [u8], value: &str, name: &str) -> Result<usize> {
        if !value.is_ascii() {
            return Err(StorageError::InvalidInput(format!(
                "'{value}' is not an ASCII string"
            )));
        }
        self.write_chars(dst, value.as_bytes(), name, value.len())
    }

    /// Writes a UTF-8 string into a char field, truncating at a code point
    /// boundary so the stored bytes always stay valid UTF-8.
    ///
    /// # Returns
    /// The number of code points written.
    pub fn set_unicode(&self, dst: &mut [u8], value: &str, name: &str) -> Result<usize> {
        let field = self.require(name)?;
        let prefix = utf8_prefix(value.as_bytes(), field.size);
        let chars = value[..prefix].chars().count();
        self.write_chars(dst, &value.as_bytes()[..prefix], name, chars)
    }

    fn write_chars(&self, dst: &mut [u8], bytes: &[u8], name: &str, count: usize) -> Result<usize> {
        let field = self.require(name)?;
        if field.field_type != FieldType::Char {
            return Err(field.type_mismatch("char"));
        }
        self.check_buffer(dst.len(), field)?;
        let length = bytes.len().min(field.size);
        let target = &mut dst[field.offset..field.offset + field.size];
        target[..length].copy_from_slice(&bytes[..length]);
        target[length..].fill(0);
        Ok(count.min(length))
    }

    /// Lists the fields of `self` that cannot be carried into `new_layout`
    /// without loss. An empty result means [`StructLayout::convert`] with
    /// `allow_loss = false` succeeds for any record.
    pub fn check_compatibility(&self, new_layout: &StructLayout) -> Vec<FieldIncompatibility> {
        self.fields
            .iter()
            .filter_map(|field| {
                let kind = match new_layout.find(&field.name) {
                    None => FieldIncompatibilityType::Missing,
                    Some(target)
                        if target.elements < field.elements
                            || !field.field_type.converts_losslessly_to(target.field_type) =>
                    {
                        FieldIncompatibilityType::DataLoss
                    }
                    Some(_) => return None,
                };
                Some(FieldIncompatibility {
                    name: field.name.clone(),
                    kind,
                })
            })
            .collect()
    }

    /// Converts a record written with `src_layout` into this layout.
    ///
    /// Fields present in both layouts are copied element by element; fields
    /// absent from `src_layout` are zeroed; fields absent from this layout are
    /// dropped. When `allow_loss` is false any incompatibility fails the whole
    /// conversion before `dst` is touched. Otherwise narrowing follows each
    /// destination field's [`FieldConvertStrategy`].
    ///
    /// # Arguments
    /// * `src_layout` - layout `src` was written with
    /// * `src` - the stored record
    /// * `dst` - output record, `self.size()` bytes long
    /// * `allow_loss` - whether narrowing may drop values
    pub fn convert(
        &self,
        src_layout: &StructLayout,
        src: &[u8],
        dst: &mut [u8],
        allow_loss: bool,
    ) -> Result<()> {
        if !allow_loss {
            let issues = src_layout.check_compatibility(self);
            if !issues.is_empty() {
                return Err(StorageError::DataLoss {
                    fields: issues.into_iter().map(|issue| issue.name).collect(),
                });
            }
        }
        if src.len() < src_layout.size {
            return Err(StorageError::BufferUnderflow {
                needed: src_layout.size,
                available: src.len(),
            });
        }
        if dst.len() < self.size {
            return Err(StorageError::BufferUnderflow {
                needed: self.size,
                available: dst.len(),
            });
        }

        dst[..self.size].fill(0);
        for field in &self.fields {
            let Some(src_field) = src_layout.find(&field.name) else {
                continue;
            };
            convert_field(
                src_field,
                &src[src_field.offset..src_field.offset + src_field.size],
                field,
                &mut dst[field.offset..field.offset + field.size],
            );
        }
        Ok(())
    }
}

impl PartialEq for StructLayout {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| {
                a.name == b.name && a.field_type == b.field_type && a.size == b.size
            })
    }
}

impl Eq for StructLayout {}

impl TryFrom<Vec<FieldDescriptor>> for StructLayout {
    type Error = StorageError;

    fn try_from(descriptors: Vec<FieldDescriptor>) -> Result<Self> {
        StructLayout::create(descriptors)
    }
}

impl From<StructLayout> for Vec<FieldDescriptor> {
    fn from(layout: StructLayout) -> Self {
        layout.descriptors()
    }
}

/// Longest prefix of `bytes` not exceeding `limit` that ends on a UTF-8
/// code point boundary.
fn utf8_prefix(bytes: &[u8], limit: usize) -> usize {
    if bytes.len() <= limit {
        return bytes.len();
    }
    let mut end = limit;
    // continuation bytes look like 0b10xx_xxxx
    while end > 0 && bytes[end] & 0xC0 == 0x80 {
        end -= 1;
    }
    end
}

fn read_integer(bytes: &[u8], field_type: FieldType) -> i64 {
    match field_type {
        FieldType::I8 => bytes[0] as i8 as i64,
        FieldType::I16 => LittleEndian::read_i16(bytes) as i64,
        FieldType::I32 => LittleEndian::read_i32(bytes) as i64,
        _ => LittleEndian::read_i64(bytes),
    }
}

fn write_integer(bytes: &mut [u8], field_type: FieldType, value: i64) {
    match field_type {
        FieldType::I8 => bytes[0] = value as i8 as u8,
        FieldType::I16 => LittleEndian::write_i16(bytes, value as i16),
        FieldType::I32 => LittleEndian::write_i32(bytes, value as i32),
        _ => LittleEndian::write_i64(bytes, value),
    }
}

fn read_numeric(bytes: &[u8], field_type: FieldType) -> Option<Numeric> {
    match field_type.class() {
        TypeClass::Integer => Some(Numeric::Integer(read_integer(bytes, field_type))),
        TypeClass::Float if field_type == FieldType::F32 => {
            Some(Numeric::Float(LittleEndian::read_f32(bytes) as f64))
        }
        TypeClass::Float => Some(Numeric::Float(LittleEndian::read_f64(bytes))),
        TypeClass::Char => None,
    }
}

/// Writes `value` into a numeric element, applying `strategy` when it does
/// not fit.
fn write_converted(
    bytes: &mut [u8],
    field_type: FieldType,
    value: Numeric,
    strategy: FieldConvertStrategy,
) {
    match field_type.class() {
        TypeClass::Integer => {
            let (min, max) = field_type.integer_range();
            let converted = match value {
                Numeric::Integer(value) if (min..=max).contains(&value) => Some(value),
                Numeric::Float(value)
                    if value.is_finite()
                        && value.trunc() >= min as f64
                        && value.trunc() <= max as f64 =>
                {
                    Some(value.trunc() as i64)
                }
                _ => None,
            };
            let stored = match (converted, strategy) {
                (Some(value), _) => value,
                (None, FieldConvertStrategy::Reset) => 0,
                (None, FieldConvertStrategy::Clamp) => match value {
                    Numeric::Integer(value) => value.clamp(min, max),
                    Numeric::Float(value) if value.is_nan() => 0,
                    // saturating float-to-int cast
                    Numeric::Float(value) => (value as i64).clamp(min, max),
                },
            };
            write_integer(bytes, field_type, stored);
        }
        TypeClass::Float => {
            let value = match value {
                Numeric::Integer(value) => value as f64,
                Numeric::Float(value) => value,
            };
            if field_type == FieldType::F64 {
                LittleEndian::write_f64(bytes, value);
                return;
            }
            let narrowed = if value.is_finite() && value.abs() > f32::MAX as f64 {
                match strategy {
                    FieldConvertStrategy::Reset => 0.0,
                    FieldConvertStrategy::Clamp => f32::MAX.copysign(value as f32),
                }
            } else {
                value as f32
            };
            LittleEndian::write_f32(bytes, narrowed);
        }
        TypeClass::Char => {}
    }
}

fn convert_field(src_field: &Field, src: &[u8], dst_field: &Field, dst: &mut [u8]) {
    match (src_field.field_type.class(), dst_field.field_type.class()) {
        (TypeClass::Char, TypeClass::Char) => {
            let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
            let length = utf8_prefix(&src[..end], dst.len());
            dst[..length].copy_from_slice(&src[..length]);
        }
        (TypeClass::Char, _) | (_, TypeClass::Char) => {}
        _ => {
            let src_size = src_field.field_type.size();
            let dst_size = dst_field.field_type.size();
            for index in 0..src_field.elements.min(dst_field.elements) {
                let element = &src[index * src_size..(index + 1) * src_size];
                if let Some(value) = read_numeric(element, src_field.field_type) {
                    write_converted(
                        &mut dst[index * dst_size..(index + 1) * dst_size],
                        dst_field.field_type,
                        value,
                        dst_field.convert_strategy,
                    );
                }
            }
        }
    }
}
