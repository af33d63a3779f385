//! Canonical text form of any `Serialize` value.
//!
//! The canonical form is JSON-like with two differences that make it a
//! structural identity: map and struct keys are always emitted in sorted
//! order, and in [`FingerprintMode::Sorted`] sequence elements are sorted by
//! their own canonical form before joining.

use serde::ser::{self, Impossible, Serialize, Serializer};

use crate::error::SerializationError;

use super::FingerprintMode;

/// Maximum nesting depth accepted before canonicalization gives up.
pub const MAX_DEPTH: usize = 128;

type Result<T> = std::result::Result<T, SerializationError>;

/// Render `value` in canonical form.
pub fn to_canonical<T: Serialize + ?Sized>(value: &T, mode: FingerprintMode) -> Result<String> {
    value.serialize(Canonicalizer { mode, depth: 0 })
}

fn json_string(s: &str) -> Result<String> {
    serde_json::to_string(s).map_err(|e| SerializationError::Custom {
        message: e.to_string(),
    })
}

/// Render a float the way a JSON literal would look in a browser console:
/// integral values drop the fraction, very large or very small magnitudes
/// switch to exponent form, non-finite values become `null`.
fn float_literal(v: f64) -> String {
    if !v.is_finite() {
        return "null".to_string();
    }
    if v == 0.0 {
        return "0".to_string();
    }

    let abs = v.abs();
    if abs >= 1e21 || abs < 1e-6 {
        let s = format!("{v:e}");
        return match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
            _ => s,
        };
    }
    // Shortest round-trip digits, zero-padded for large integral values.
    format!("{v}")
}

fn render_seq(mut items: Vec<String>, mode: FingerprintMode) -> String {
    if mode == FingerprintMode::Sorted {
        items.sort();
    }
    format!("[{}]", items.join(","))
}

fn render_object(mut entries: Vec<(String, String)>) -> Result<String> {
    entries.sort();
    let mut pairs = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        pairs.push(format!("{}:{}", json_string(&key)?, value));
    }
    Ok(format!("{{{}}}", pairs.join(",")))
}

fn wrap_variant(variant: &str, payload: &str) -> Result<String> {
    Ok(format!("{{{}:{}}}", json_string(variant)?, payload))
}

#[derive(Debug, Clone, Copy)]
struct Canonicalizer {
    mode: FingerprintMode,
    depth: usize,
}

impl Canonicalizer {
    fn nested(self) -> Result<Self> {
        let depth = self.depth + 1;
        if depth > MAX_DEPTH {
            return Err(SerializationError::DepthExceeded { max_depth: MAX_DEPTH });
        }
        Ok(Self { depth, ..self })
    }
}

impl ser::Serializer for Canonicalizer {
    type Ok = String;
    type Error = SerializationError;

    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = VariantSeq;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = VariantMap;

    fn serialize_bool(self, v: bool) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i128(self, v: i128) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u128(self, v: u128) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, v: f32) -> Result<String> {
        // Go through the shortest f32 text so 0.1f32 renders as 0.1.
        let widened = v.to_string().parse::<f64>().unwrap_or_else(|_| f64::from(v));
        Ok(float_literal(widened))
    }

    fn serialize_f64(self, v: f64) -> Result<String> {
        Ok(float_literal(v))
    }

    fn serialize_char(self, v: char) -> Result<String> {
        json_string(v.encode_utf8(&mut [0u8; 4]))
    }

    fn serialize_str(self, v: &str) -> Result<String> {
        json_string(v)
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<String> {
        let items = v.iter().map(u8::to_string).collect();
        Ok(render_seq(items, self.mode))
    }

    fn serialize_none(self) -> Result<String> {
        Ok("null".to_string())
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<String> {
        value.serialize(self.nested()?)
    }

    fn serialize_unit(self) -> Result<String> {
        Ok("null".to_string())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String> {
        Ok("null".to_string())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String> {
        json_string(variant)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String> {
        value.serialize(self.nested()?)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<String> {
        let payload = value.serialize(self.nested()?)?;
        wrap_variant(variant, &payload)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector> {
        Ok(SeqCollector {
            child: self.nested()?,
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqCollector> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeq> {
        Ok(VariantSeq {
            variant,
            seq: self.serialize_seq(Some(len))?,
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapCollector> {
        Ok(MapCollector {
            child: self.nested()?,
            entries: Vec::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapCollector> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantMap> {
        Ok(VariantMap {
            variant,
            map: self.serialize_map(Some(len))?,
        })
    }
}

#[doc(hidden)]
pub struct SeqCollector {
    child: Canonicalizer,
    items: Vec<String>,
}

impl SeqCollector {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(self.child)?);
        Ok(())
    }

    fn finish(self) -> String {
        render_seq(self.items, self.child.mode)
    }
}

impl ser::SerializeSeq for SeqCollector {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<String> {
        Ok(self.finish())
    }
}

impl ser::SerializeTuple for SeqCollector {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<String> {
        Ok(self.finish())
    }
}

impl ser::SerializeTupleStruct for SeqCollector {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<String> {
        Ok(self.finish())
    }
}

#[doc(hidden)]
pub struct VariantSeq {
    variant: &'static str,
    seq: SeqCollector,
}

impl ser::SerializeTupleVariant for VariantSeq {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.seq.push(value)
    }

    fn end(self) -> Result<String> {
        let payload = self.seq.finish();
        wrap_variant(self.variant, &payload)
    }
}

#[doc(hidden)]
pub struct MapCollector {
    child: Canonicalizer,
    entries: Vec<(String, String)>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapCollector {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self.pending_key.take().ok_or_else(|| SerializationError::Custom {
            message: "map value serialized before its key".to_string(),
        })?;
        self.entries.push((key, value.serialize(self.child)?));
        Ok(())
    }

    fn end(self) -> Result<String> {
        render_object(self.entries)
    }
}

impl ser::SerializeStruct for MapCollector {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.entries.push((key.to_string(), value.serialize(self.child)?));
        Ok(())
    }

    fn end(self) -> Result<String> {
        render_object(self.entries)
    }
}

#[doc(hidden)]
pub struct VariantMap {
    variant: &'static str,
    map: MapCollector,
}

impl ser::SerializeStructVariant for VariantMap {
    type Ok = String;
    type Error = SerializationError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T) -> Result<()> {
        ser::SerializeStruct::serialize_field(&mut self.map, key, value)
    }

    fn end(self) -> Result<String> {
        let payload = render_object(self.map.entries)?;
        wrap_variant(self.variant, &payload)
    }
}

/// Renders map keys as raw text. Scalars are coerced the way object keys are.
struct KeySerializer;

fn key_error(kind: &'static str) -> SerializationError {
    SerializationError::KeyMustBeString { kind }
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = SerializationError;

    type SerializeSeq = Impossible<String, SerializationError>;
    type SerializeTuple = Impossible<String, SerializationError>;
    type SerializeTupleStruct = Impossible<String, SerializationError>;
    type SerializeTupleVariant = Impossible<String, SerializationError>;
    type SerializeMap = Impossible<String, SerializationError>;
    type SerializeStruct = Impossible<String, SerializationError>;
    type SerializeStructVariant = Impossible<String, SerializationError>;

    fn serialize_bool(self, v: bool) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_i128(self, v: i128) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_u128(self, v: u128) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, _v: f32) -> Result<String> {
        Err(key_error("f32"))
    }

    fn serialize_f64(self, _v: f64) -> Result<String> {
        Err(key_error("f64"))
    }

    fn serialize_char(self, v: char) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<String> {
        Ok(v.to_string())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String> {
        Err(key_error("bytes"))
    }

    fn serialize_none(self) -> Result<String> {
        Err(key_error("none"))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<String> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<String> {
        Err(key_error("unit"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String> {
        Err(key_error("unit struct"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String> {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String> {
        Err(key_error("newtype variant"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        Err(key_error("sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(key_error("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(key_error("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(key_error("tuple variant"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(key_error("map"))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self::SerializeStruct> {
        Err(key_error("struct"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(key_error("struct variant"))
    }
}
