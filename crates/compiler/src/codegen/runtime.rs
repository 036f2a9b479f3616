//! Runtime ABI declarations
//!
//! The compiler core never links the runtime; it only emits `declare`
//! lines against this fixed ABI and calls into it. The symbols here must
//! be present at link time with exactly these signatures.

use super::platform::TargetPlatform;
use std::fmt::Write as _;

/// Emit the external declarations for the runtime ABI.
pub fn emit_runtime_declarations(ir: &mut String, target: &TargetPlatform) -> std::fmt::Result {
    let word = target.word_type();

    writeln!(ir, "; Runtime ABI")?;
    // Allocators
    writeln!(ir, "declare ptr @heap_alloc({} %bytes)", word)?;
    writeln!(ir, "declare ptr @stack_alloc({} %bytes)", word)?;
    writeln!(ir, "declare void @heap_free(ptr %p)")?;
    writeln!(ir, "declare ptr @heap_realloc(ptr %p, {} %bytes)", word)?;
    // Byte operations
    writeln!(ir, "declare void @memory_copy(ptr %dst, ptr %src, {} %bytes)", word)?;
    writeln!(ir, "declare void @memory_fill(ptr %dst, i8 %byte, {} %bytes)", word)?;
    writeln!(ir, "declare void @memory_zero(ptr %dst, {} %bytes)", word)?;
    // Slice operations
    writeln!(ir, "declare {} @slice_size(ptr %p)", word)?;
    writeln!(ir, "declare {} @slice_address(ptr %p)", word)?;
    writeln!(ir, "declare i1 @slice_is_valid(ptr %p)")?;
    writeln!(ir, "declare {} @slice_unsafe_ptr(ptr %p, {} %off)", word, word)?;
    writeln!(ir, "declare ptr @slice_subslice(ptr %p, {} %off, {} %len)", word, word)?;
    writeln!(ir, "declare ptr @slice_hijack(ptr %p)")?;
    writeln!(ir, "declare {} @slice_refer(ptr %p)", word)?;
    // Danger-zone operations
    writeln!(ir, "declare {} @read_as_bytes({} %addr, {} %bytes)", word, word, word)?;
    writeln!(ir, "declare void @write_as_bytes({} %addr, {} %value, {} %bytes)", word, word, word)?;
    writeln!(ir, "declare {} @volatile_read_bytes({} %addr, {} %bytes)", word, word, word)?;
    writeln!(
        ir,
        "declare void @volatile_write_bytes({} %addr, {} %value, {} %bytes)",
        word, word, word
    )?;
    writeln!(ir, "declare {} @address_of(ptr %p)", word)?;
    writeln!(ir, "declare void @invalidate_memory({} %addr)", word)?;
    // Crash and stack-trace throw entry
    writeln!(ir, "declare void @rf_crash(ptr %message)")?;
    writeln!(ir, "declare void @rf_throw(ptr %type_name, ptr %message)")?;
    writeln!(ir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::platform::host_target;

    #[test]
    fn test_abi_declarations_present() {
        let mut ir = String::new();
        emit_runtime_declarations(&mut ir, &host_target()).unwrap();
        for symbol in [
            "heap_alloc",
            "stack_alloc",
            "heap_free",
            "heap_realloc",
            "memory_copy",
            "memory_fill",
            "memory_zero",
            "slice_size",
            "slice_address",
            "slice_is_valid",
            "slice_unsafe_ptr",
            "slice_subslice",
            "slice_hijack",
            "slice_refer",
            "read_as_bytes",
            "write_as_bytes",
            "volatile_read_bytes",
            "volatile_write_bytes",
            "address_of",
            "invalidate_memory",
            "rf_crash",
            "rf_throw",
        ] {
            assert!(ir.contains(&format!("@{}", symbol)), "missing {}", symbol);
        }
    }

    #[test]
    fn test_word_width_in_signatures() {
        let mut ir = String::new();
        emit_runtime_declarations(&mut ir, &host_target()).unwrap();
        assert!(ir.contains("declare ptr @heap_alloc(i64 %bytes)"));
        assert!(ir.contains("declare i1 @slice_is_valid(ptr %p)"));
    }
}
