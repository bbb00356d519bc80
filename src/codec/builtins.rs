//! Built-in data type operations.
//!
//! One operation set per built-in wire type. Scalars encode in network
//! byte order; variable-size types carry a u32 length prefix. The
//! byte-object comparison keeps the historical checksum ordering: it is
//! not byte-wise precedence, it is a consistent total order used as a
//! sort/dedup key by downstream consumers.

use std::sync::Arc;

use super::registry::{DataTypeOps, TypeRegistry};
use super::value::{ids, ByteObject, CompareResult, InfoPair, ProcId, Value};
use crate::buffer::Buffer;
use crate::error::{ProclinkError, Result};

/// Register every built-in type. Called once while the registry is
/// still private to the constructing thread.
pub(super) fn register_builtins(reg: &mut TypeRegistry) -> Result<()> {
    reg.register("bool", ids::BOOL, false, Arc::new(BoolOps))?;
    reg.register("byte", ids::BYTE, false, Arc::new(ByteOps))?;
    reg.register("string", ids::STRING, false, Arc::new(StringOps))?;
    reg.register("int8", ids::INT8, false, Arc::new(Int8Ops))?;
    reg.register("int16", ids::INT16, false, Arc::new(Int16Ops))?;
    reg.register("int32", ids::INT32, false, Arc::new(Int32Ops))?;
    reg.register("int64", ids::INT64, false, Arc::new(Int64Ops))?;
    reg.register("uint8", ids::UINT8, false, Arc::new(Uint8Ops))?;
    reg.register("uint16", ids::UINT16, false, Arc::new(Uint16Ops))?;
    reg.register("uint32", ids::UINT32, false, Arc::new(Uint32Ops))?;
    reg.register("uint64", ids::UINT64, false, Arc::new(Uint64Ops))?;
    reg.register("float", ids::FLOAT, false, Arc::new(FloatOps))?;
    reg.register("double", ids::DOUBLE, false, Arc::new(DoubleOps))?;
    reg.register("time", ids::TIME, false, Arc::new(TimeOps))?;
    reg.register("value", ids::VALUE, true, Arc::new(ValueOps))?;
    reg.register("byte-object", ids::BYTE_OBJECT, true, Arc::new(ByteObjectOps))?;
    reg.register("proc", ids::PROC, true, Arc::new(ProcOps))?;
    reg.register("info", ids::INFO, true, Arc::new(InfoOps))?;
    Ok(())
}

fn mismatch(requested: u16, value: &Value) -> ProclinkError {
    ProclinkError::TypeMismatch {
        requested,
        stored: value.type_id(),
    }
}

/// Pack a value through its built-in operation set. Used by the generic
/// tagged-value and info encodings for their inner payload.
pub(super) fn pack_builtin(buf: &mut Buffer, value: &Value) -> Result<()> {
    builtin_ops(value.type_id())
        .ok_or(ProclinkError::UnknownDataType(value.type_id()))?
        .pack(buf, value)
}

/// Unpack one value of the given built-in id.
pub(super) fn unpack_builtin(buf: &mut Buffer, id: u16) -> Result<Value> {
    builtin_ops(id)
        .ok_or(ProclinkError::UnknownDataType(id))?
        .unpack(buf)
}

/// Compare two values of the same built-in type.
pub(super) fn compare_builtin(id: u16, a: &Value, b: &Value) -> Result<CompareResult> {
    builtin_ops(id)
        .ok_or(ProclinkError::UnknownDataType(id))?
        .compare(a, b)
}

/// All built-in operation sets are zero-sized, so inner dispatch just
/// instantiates the right one by id.
fn builtin_ops(id: u16) -> Option<&'static dyn DataTypeOps> {
    Some(match id {
        ids::BOOL => &BoolOps,
        ids::BYTE => &ByteOps,
        ids::STRING => &StringOps,
        ids::INT8 => &Int8Ops,
        ids::INT16 => &Int16Ops,
        ids::INT32 => &Int32Ops,
        ids::INT64 => &Int64Ops,
        ids::UINT8 => &Uint8Ops,
        ids::UINT16 => &Uint16Ops,
        ids::UINT32 => &Uint32Ops,
        ids::UINT64 => &Uint64Ops,
        ids::FLOAT => &FloatOps,
        ids::DOUBLE => &DoubleOps,
        ids::TIME => &TimeOps,
        ids::VALUE => &ValueOps,
        ids::BYTE_OBJECT => &ByteObjectOps,
        ids::PROC => &ProcOps,
        ids::INFO => &InfoOps,
        _ => return None,
    })
}

/// Widen or narrow a sized-integer value to the requested width.
///
/// The source value is already in host order (decoded by the stored
/// type's own unpack), so this is a plain integral cast; narrowing
/// truncates the way the original did.
pub(super) fn convert_integer(value: Value, want: u16) -> Result<Value> {
    let raw: i128 = match &value {
        Value::Int8(v) => *v as i128,
        Value::Int16(v) => *v as i128,
        Value::Int32(v) => *v as i128,
        Value::Int64(v) => *v as i128,
        Value::Uint8(v) => *v as i128,
        Value::Uint16(v) => *v as i128,
        Value::Uint32(v) => *v as i128,
        Value::Uint64(v) => *v as i128,
        _ => return Err(mismatch(want, &value)),
    };
    Ok(match want {
        ids::INT8 => Value::Int8(raw as i8),
        ids::INT16 => Value::Int16(raw as i16),
        ids::INT32 => Value::Int32(raw as i32),
        ids::INT64 => Value::Int64(raw as i64),
        ids::UINT8 => Value::Uint8(raw as u8),
        ids::UINT16 => Value::Uint16(raw as u16),
        ids::UINT32 => Value::Uint32(raw as u32),
        ids::UINT64 => Value::Uint64(raw as u64),
        _ => return Err(mismatch(want, &value)),
    })
}

// ---------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------

struct BoolOps;

impl DataTypeOps for BoolOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Bool(v) => {
                buf.put_u8(u8::from(*v));
                Ok(())
            }
            other => Err(mismatch(ids::BOOL, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        Ok(Value::Bool(buf.get_u8()? != 0))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Ok(if *x && !*y {
                CompareResult::FirstGreater
            } else if *y && !*x {
                CompareResult::SecondGreater
            } else {
                CompareResult::Equal
            }),
            _ => Err(mismatch(ids::BOOL, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Bool(v) => format!("{}", v),
            other => format!("<not a bool: {:?}>", other),
        }
    }
}

struct ByteOps;

impl DataTypeOps for ByteOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Byte(v) => {
                buf.put_u8(*v);
                Ok(())
            }
            other => Err(mismatch(ids::BYTE, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        Ok(Value::Byte(buf.get_u8()?))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Byte(x), Value::Byte(y)) => Ok(CompareResult::from_ord(x.cmp(y))),
            _ => Err(mismatch(ids::BYTE, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Byte(v) => format!("0x{:02x}", v),
            other => format!("<not a byte: {:?}>", other),
        }
    }
}

macro_rules! integer_ops {
    ($name:ident, $variant:ident, $ty:ty, $id:expr, $put:ident, $get:ident) => {
        struct $name;

        impl DataTypeOps for $name {
            fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
                match value {
                    Value::$variant(v) => {
                        buf.$put(*v as _);
                        Ok(())
                    }
                    other => Err(mismatch($id, other)),
                }
            }

            fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
                Ok(Value::$variant(buf.$get()? as $ty))
            }

            fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
                match (a, b) {
                    (Value::$variant(x), Value::$variant(y)) => {
                        Ok(CompareResult::from_ord(x.cmp(y)))
                    }
                    _ => Err(mismatch($id, a)),
                }
            }

            fn print(&self, value: &Value) -> String {
                match value {
                    Value::$variant(v) => format!("{}", v),
                    other => format!("<wrong type: {:?}>", other),
                }
            }
        }
    };
}

integer_ops!(Int8Ops, Int8, i8, ids::INT8, put_u8, get_u8);
integer_ops!(Int16Ops, Int16, i16, ids::INT16, put_u16, get_u16);
integer_ops!(Int32Ops, Int32, i32, ids::INT32, put_u32, get_u32);
integer_ops!(Int64Ops, Int64, i64, ids::INT64, put_u64, get_u64);
integer_ops!(Uint8Ops, Uint8, u8, ids::UINT8, put_u8, get_u8);
integer_ops!(Uint16Ops, Uint16, u16, ids::UINT16, put_u16, get_u16);
integer_ops!(Uint32Ops, Uint32, u32, ids::UINT32, put_u32, get_u32);
integer_ops!(Uint64Ops, Uint64, u64, ids::UINT64, put_u64, get_u64);

struct FloatOps;

impl DataTypeOps for FloatOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Float(v) => {
                buf.put_u32(v.to_bits());
                Ok(())
            }
            other => Err(mismatch(ids::FLOAT, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        Ok(Value::Float(f32::from_bits(buf.get_u32()?)))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Float(x), Value::Float(y)) => Ok(x
                .partial_cmp(y)
                .map(CompareResult::from_ord)
                .unwrap_or(CompareResult::Equal)),
            _ => Err(mismatch(ids::FLOAT, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Float(v) => format!("{}", v),
            other => format!("<not a float: {:?}>", other),
        }
    }
}

struct DoubleOps;

impl DataTypeOps for DoubleOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Double(v) => {
                buf.put_u64(v.to_bits());
                Ok(())
            }
            other => Err(mismatch(ids::DOUBLE, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        Ok(Value::Double(f64::from_bits(buf.get_u64()?)))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Double(x), Value::Double(y)) => Ok(x
                .partial_cmp(y)
                .map(CompareResult::from_ord)
                .unwrap_or(CompareResult::Equal)),
            _ => Err(mismatch(ids::DOUBLE, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Double(v) => format!("{}", v),
            other => format!("<not a double: {:?}>", other),
        }
    }
}

struct TimeOps;

impl DataTypeOps for TimeOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Time(v) => {
                buf.put_u64(*v as u64);
                Ok(())
            }
            other => Err(mismatch(ids::TIME, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        Ok(Value::Time(buf.get_u64()? as i64))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Time(x), Value::Time(y)) => Ok(CompareResult::from_ord(x.cmp(y))),
            _ => Err(mismatch(ids::TIME, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Time(v) => format!("@{}", v),
            other => format!("<not a time: {:?}>", other),
        }
    }
}

// ---------------------------------------------------------------------
// Variable-size and compound types
// ---------------------------------------------------------------------

struct StringOps;

impl DataTypeOps for StringOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::String(s) => {
                buf.put_string(s);
                Ok(())
            }
            other => Err(mismatch(ids::STRING, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        Ok(Value::String(buf.get_string()?))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::String(x), Value::String(y)) => Ok(CompareResult::from_ord(x.cmp(y))),
            _ => Err(mismatch(ids::STRING, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("{:?}", s),
            other => format!("<not a string: {:?}>", other),
        }
    }
}

struct ByteObjectOps;

impl DataTypeOps for ByteObjectOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::ByteObject(bo) => {
                buf.put_u32(bo.0.len() as u32);
                buf.put_bytes(&bo.0);
                Ok(())
            }
            other => Err(mismatch(ids::BYTE_OBJECT, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        let len = buf.get_u32()? as usize;
        let bytes = buf.get_bytes(len)?.to_vec();
        Ok(Value::ByteObject(ByteObject(bytes)))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::ByteObject(x), Value::ByteObject(y)) => Ok(compare_byte_objects(&x.0, &y.0)),
            _ => Err(mismatch(ids::BYTE_OBJECT, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::ByteObject(bo) => format!("byte-object[{}]", bo.len()),
            other => format!("<not a byte-object: {:?}>", other),
        }
    }
}

/// Checksum-style byte-object ordering.
///
/// Larger blob orders first. On equal sizes, sum the signed per-byte
/// differences; if accumulating the next difference would overflow, the
/// running sum resets to zero before the add. The sign of the final sum
/// decides the order. This is a stable total order, not a magnitude
/// comparison, and must not be replaced by lexicographic precedence.
fn compare_byte_objects(a: &[u8], b: &[u8]) -> CompareResult {
    if a.len() > b.len() {
        return CompareResult::FirstGreater;
    }
    if b.len() > a.len() {
        return CompareResult::SecondGreater;
    }

    let mut checksum: i32 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = *x as i32 - *y as i32;
        if i32::MAX - checksum.abs() - diff.abs() < 0 {
            checksum = 0;
        }
        checksum += diff;
    }

    if checksum < 0 {
        CompareResult::SecondGreater
    } else if checksum > 0 {
        CompareResult::FirstGreater
    } else {
        CompareResult::Equal
    }
}

/// Generic tagged value: [u16 inner id][inner encoding]. Lets a value
/// of any built-in type ride in a non-described buffer.
struct ValueOps;

impl DataTypeOps for ValueOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        buf.put_u16(value.type_id());
        pack_builtin(buf, value)
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        let inner = buf.get_u16()?;
        unpack_builtin(buf, inner)
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        let (ta, tb) = (a.type_id(), b.type_id());
        if ta != tb {
            return Ok(CompareResult::from_ord(ta.cmp(&tb)));
        }
        compare_builtin(ta, a, b)
    }

    fn print(&self, value: &Value) -> String {
        match builtin_ops(value.type_id()) {
            Some(ops) => ops.print(value),
            None => format!("<unknown value type {}>", value.type_id()),
        }
    }
}

struct ProcOps;

impl DataTypeOps for ProcOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Proc(p) => {
                buf.put_string(&p.nspace);
                buf.put_u32(p.rank);
                Ok(())
            }
            other => Err(mismatch(ids::PROC, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        let nspace = buf.get_string()?;
        let rank = buf.get_u32()?;
        Ok(Value::Proc(ProcId { nspace, rank }))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Proc(x), Value::Proc(y)) => {
                match CompareResult::from_ord(x.nspace.cmp(&y.nspace)) {
                    CompareResult::Equal => Ok(CompareResult::from_ord(x.rank.cmp(&y.rank))),
                    other => Ok(other),
                }
            }
            _ => Err(mismatch(ids::PROC, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Proc(p) => p.to_string(),
            other => format!("<not a proc: {:?}>", other),
        }
    }
}

struct InfoOps;

impl DataTypeOps for InfoOps {
    fn pack(&self, buf: &mut Buffer, value: &Value) -> Result<()> {
        match value {
            Value::Info(info) => {
                buf.put_string(&info.key);
                buf.put_u16(info.value.type_id());
                pack_builtin(buf, &info.value)
            }
            other => Err(mismatch(ids::INFO, other)),
        }
    }

    fn unpack(&self, buf: &mut Buffer) -> Result<Value> {
        let key = buf.get_string()?;
        let inner = buf.get_u16()?;
        let value = unpack_builtin(buf, inner)?;
        Ok(Value::Info(InfoPair {
            key,
            value: Box::new(value),
        }))
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<CompareResult> {
        match (a, b) {
            (Value::Info(x), Value::Info(y)) => {
                // key length first, then lexicographic, then the value
                if x.key.len() != y.key.len() {
                    return Ok(CompareResult::from_ord(x.key.len().cmp(&y.key.len())));
                }
                match CompareResult::from_ord(x.key.cmp(&y.key)) {
                    CompareResult::Equal => ValueOps.compare(&x.value, &y.value),
                    other => Ok(other),
                }
            }
            _ => Err(mismatch(ids::INFO, a)),
        }
    }

    fn print(&self, value: &Value) -> String {
        match value {
            Value::Info(info) => format!("{}={}", info.key, ValueOps.print(&info.value)),
            other => format!("<not an info: {:?}>", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferKind;

    fn round_trip(value: Value) -> Value {
        let mut buf = Buffer::new(BufferKind::NonDescribed);
        pack_builtin(&mut buf, &value).unwrap();
        unpack_builtin(&mut buf, value.type_id()).unwrap()
    }

    #[test]
    fn test_scalar_round_trips() {
        let samples = vec![
            Value::Bool(true),
            Value::Bool(false),
            Value::Byte(0xA5),
            Value::Int8(-7),
            Value::Int16(-30000),
            Value::Int32(i32::MIN),
            Value::Int64(i64::MAX),
            Value::Uint8(255),
            Value::Uint16(65535),
            Value::Uint32(0xDEADBEEF),
            Value::Uint64(u64::MAX),
            Value::Float(3.5),
            Value::Double(-2.25e100),
            Value::Time(1_700_000_000),
        ];
        for v in samples {
            assert_eq!(round_trip(v.clone()), v);
        }
    }

    #[test]
    fn test_string_and_blob_round_trips() {
        assert_eq!(
            round_trip(Value::String("metadata".into())),
            Value::String("metadata".into())
        );
        let blob = Value::ByteObject(ByteObject((0u8..=255).collect()));
        assert_eq!(round_trip(blob.clone()), blob);
    }

    #[test]
    fn test_compound_round_trips() {
        let proc = Value::Proc(ProcId::new("job-42", 17));
        assert_eq!(round_trip(proc.clone()), proc);

        let info = Value::Info(InfoPair::new("cpu-count", Value::Uint32(64)));
        assert_eq!(round_trip(info.clone()), info);
    }

    #[test]
    fn test_tagged_value_carries_inner_type() {
        let mut buf = Buffer::new(BufferKind::NonDescribed);
        ValueOps.pack(&mut buf, &Value::Uint32(42)).unwrap();
        // inner tag on the wire even in a non-described buffer
        assert_eq!(buf.peek_u16().unwrap(), ids::UINT32);
        assert_eq!(ValueOps.unpack(&mut buf).unwrap(), Value::Uint32(42));
    }

    #[test]
    fn test_pack_wrong_variant_is_mismatch() {
        let mut buf = Buffer::new(BufferKind::NonDescribed);
        let err = StringOps.pack(&mut buf, &Value::Uint32(1)).unwrap_err();
        assert!(matches!(err, ProclinkError::TypeMismatch { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_compare_equal_reflexive() {
        let samples = vec![
            Value::Bool(true),
            Value::Int32(-4),
            Value::Uint64(9),
            Value::String("same".into()),
            Value::ByteObject(ByteObject(vec![1, 2, 3])),
            Value::Proc(ProcId::new("ns", 0)),
            Value::Info(InfoPair::new("k", Value::Int8(1))),
        ];
        for v in samples {
            assert_eq!(
                compare_builtin(v.type_id(), &v, &v).unwrap(),
                CompareResult::Equal
            );
        }
    }

    #[test]
    fn test_compare_antisymmetric() {
        let pairs = vec![
            (Value::Int32(1), Value::Int32(2)),
            (Value::String("a".into()), Value::String("b".into())),
            (
                Value::ByteObject(ByteObject(vec![1])),
                Value::ByteObject(ByteObject(vec![1, 2])),
            ),
        ];
        for (a, b) in pairs {
            let fwd = compare_builtin(a.type_id(), &a, &b).unwrap();
            let rev = compare_builtin(a.type_id(), &b, &a).unwrap();
            assert_eq!(fwd.reversed(), rev);
            assert_ne!(fwd, CompareResult::Equal);
        }
    }

    #[test]
    fn test_string_compare_lexicographic() {
        let a = Value::String("abc".into());
        let b = Value::String("abd".into());
        assert_eq!(
            compare_builtin(ids::STRING, &a, &b).unwrap(),
            CompareResult::SecondGreater
        );
        assert_eq!(
            compare_builtin(ids::STRING, &b, &a).unwrap(),
            CompareResult::FirstGreater
        );
    }

    #[test]
    fn test_byte_object_size_dominates() {
        // bigger blob wins regardless of content
        assert_eq!(
            compare_byte_objects(&[0, 0, 0], &[255, 255]),
            CompareResult::FirstGreater
        );
        assert_eq!(
            compare_byte_objects(&[255], &[0, 0]),
            CompareResult::SecondGreater
        );
    }

    #[test]
    fn test_byte_object_checksum_order() {
        // equal sizes: sum of signed differences decides
        assert_eq!(
            compare_byte_objects(&[5, 0], &[0, 4]),
            CompareResult::FirstGreater
        );
        assert_eq!(
            compare_byte_objects(&[0, 4], &[5, 0]),
            CompareResult::SecondGreater
        );
        // differences cancel: checksum zero means equal, even though
        // the blobs differ byte-wise
        assert_eq!(
            compare_byte_objects(&[5, 0], &[0, 5]),
            CompareResult::Equal
        );
    }

    #[test]
    fn test_integer_width_conversion() {
        assert_eq!(
            convert_integer(Value::Uint8(42), ids::UINT64).unwrap(),
            Value::Uint64(42)
        );
        assert_eq!(
            convert_integer(Value::Int64(-1), ids::INT8).unwrap(),
            Value::Int8(-1)
        );
        // narrowing truncates
        assert_eq!(
            convert_integer(Value::Uint32(0x1_02), ids::UINT8).unwrap(),
            Value::Uint8(0x02)
        );
        assert!(convert_integer(Value::String("x".into()), ids::UINT8).is_err());
    }

    #[test]
    fn test_info_compare_key_length_first() {
        let short = Value::Info(InfoPair::new("zz", Value::Bool(true)));
        let long = Value::Info(InfoPair::new("aaa", Value::Bool(true)));
        // longer key orders first despite "zz" > "aaa" lexicographically
        assert_eq!(
            compare_builtin(ids::INFO, &long, &short).unwrap(),
            CompareResult::FirstGreater
        );
    }

    #[test]
    fn test_print_formats() {
        assert_eq!(BoolOps.print(&Value::Bool(true)), "true");
        assert_eq!(StringOps.print(&Value::String("x".into())), "\"x\"");
        assert_eq!(
            ProcOps.print(&Value::Proc(ProcId::new("ns", 3))),
            "ns:3"
        );
        assert_eq!(
            InfoOps.print(&Value::Info(InfoPair::new("k", Value::Uint8(1)))),
            "k=1"
        );
    }
}
