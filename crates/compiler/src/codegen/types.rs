//! Mapping from semantic types to LLVM IR types.
//!
//! Signedness lives in the operations, not the types, so signed and
//! unsigned integers of one width share an `iN`. Compound values (text,
//! slices, records, entities, choices) are opaque pointers managed by the
//! runtime.

use super::platform::{c_alias_bits, TargetPlatform};
use crate::types::{Type, TypeId, TypeInterner};

/// The LLVM type for a value of `id`.
pub fn llvm_type(interner: &TypeInterner, target: &TargetPlatform, id: TypeId) -> String {
    match interner.get(id) {
        Type::Unit => "void".to_string(),
        Type::Bool => "i1".to_string(),
        Type::Int { bits, .. } => format!("i{}", bits),
        Type::Letter { bits } => format!("i{}", bits),
        Type::Float { bits } | Type::Decimal { bits } => float_type(*bits),
        Type::Address { .. } => target.word_type(),
        Type::CAlias { name } => format!("i{}", c_alias_bits(name, target.os)),
        Type::MemorySize | Type::Duration => target.word_type(),
        // Fallible and optional values carry their payload; the error path
        // transfers control instead of returning
        Type::Fallible { inner } | Type::Optional { inner } => llvm_type(interner, target, *inner),
        // Everything compound is an opaque runtime pointer
        Type::Text { .. }
        | Type::Pointer { .. }
        | Type::Slice { .. }
        | Type::Record { .. }
        | Type::Entity { .. }
        | Type::Choice { .. }
        | Type::Protocol { .. }
        | Type::Function { .. }
        | Type::Range
        | Type::Generic { .. }
        | Type::Error => "ptr".to_string(),
    }
}

fn float_type(bits: u16) -> String {
    match bits {
        16 => "half".to_string(),
        32 => "float".to_string(),
        128 => "fp128".to_string(),
        _ => "double".to_string(),
    }
}

/// Size in bytes of a value of `id`, for `size_of` and slice math.
pub fn byte_size(interner: &TypeInterner, target: &TargetPlatform, id: TypeId) -> u64 {
    match interner.get(id) {
        Type::Unit => 0,
        Type::Bool => 1,
        Type::Int { bits, .. } | Type::Float { bits } | Type::Decimal { bits } | Type::Letter { bits } => {
            u64::from(*bits) / 8
        }
        Type::CAlias { name } => u64::from(c_alias_bits(name, target.os)) / 8,
        Type::Fallible { inner } | Type::Optional { inner } => byte_size(interner, target, *inner),
        _ => u64::from(target.word_bits) / 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::platform::host_target;
    use crate::types::SliceKind;

    #[test]
    fn test_integer_mapping_drops_signedness() {
        let mut interner = TypeInterner::new();
        let target = host_target();
        let s32 = interner.intern(Type::Int { bits: 32, signed: true });
        let u32 = interner.intern(Type::Int { bits: 32, signed: false });
        assert_eq!(llvm_type(&interner, &target, s32), "i32");
        assert_eq!(llvm_type(&interner, &target, u32), "i32");
    }

    #[test]
    fn test_float_and_bool_mapping() {
        let mut interner = TypeInterner::new();
        let target = host_target();
        let f16 = interner.intern(Type::Float { bits: 16 });
        let f128 = interner.intern(Type::Float { bits: 128 });
        assert_eq!(llvm_type(&interner, &target, f16), "half");
        assert_eq!(llvm_type(&interner, &target, f128), "fp128");
        let b = interner.bool();
        assert_eq!(llvm_type(&interner, &target, b), "i1");
    }

    #[test]
    fn test_compound_types_are_opaque_pointers() {
        let mut interner = TypeInterner::new();
        let target = host_target();
        let text = interner.text();
        assert_eq!(llvm_type(&interner, &target, text), "ptr");
        let u8 = interner.intern(Type::Int { bits: 8, signed: false });
        let slice = interner.intern(Type::Slice {
            kind: SliceKind::Dynamic,
            element: u8,
        });
        assert_eq!(llvm_type(&interner, &target, slice), "ptr");
    }

    #[test]
    fn test_address_uses_word_size() {
        let mut interner = TypeInterner::new();
        let target = host_target();
        let addr = interner.uaddr();
        assert_eq!(llvm_type(&interner, &target, addr), target.word_type());
    }

    #[test]
    fn test_byte_sizes() {
        let mut interner = TypeInterner::new();
        let target = host_target();
        let s32 = interner.intern(Type::Int { bits: 32, signed: true });
        assert_eq!(byte_size(&interner, &target, s32), 4);
        let text = interner.text();
        assert_eq!(byte_size(&interner, &target, text), 8);
    }
}
