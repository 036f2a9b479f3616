//! Target platform description and calling-convention mapping.

/// Operating-system family, for the OS-sensitive C aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    MacOs,
    Windows,
}

/// Everything IR emission needs to know about the target.
#[derive(Debug, Clone)]
pub struct TargetPlatform {
    pub triple: &'static str,
    pub data_layout: &'static str,
    /// Pointer width; also the width of `uaddr`/`saddr`
    pub word_bits: u16,
    pub os: TargetOs,
}

impl TargetPlatform {
    /// The LLVM integer type of a machine word.
    pub fn word_type(&self) -> String {
        format!("i{}", self.word_bits)
    }
}

/// Describe the platform this compiler is running on.
pub fn host_target() -> TargetPlatform {
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        TargetPlatform {
            triple: "arm64-apple-macosx14.0.0",
            data_layout: "e-m:o-i64:64-i128:128-n32:64-S128",
            word_bits: 64,
            os: TargetOs::MacOs,
        }
    }

    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        TargetPlatform {
            triple: "x86_64-apple-darwin",
            data_layout: "e-m:o-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128",
            word_bits: 64,
            os: TargetOs::MacOs,
        }
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        TargetPlatform {
            triple: "x86_64-unknown-linux-gnu",
            data_layout: "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128",
            word_bits: 64,
            os: TargetOs::Linux,
        }
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        TargetPlatform {
            triple: "aarch64-unknown-linux-gnu",
            data_layout: "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128",
            word_bits: 64,
            os: TargetOs::Linux,
        }
    }

    #[cfg(target_os = "windows")]
    {
        TargetPlatform {
            triple: "x86_64-pc-windows-msvc",
            data_layout: "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128",
            word_bits: 64,
            os: TargetOs::Windows,
        }
    }

    #[cfg(not(any(
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64"),
        target_os = "windows"
    )))]
    {
        TargetPlatform {
            triple: "x86_64-unknown-linux-gnu",
            data_layout: "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128",
            word_bits: 64,
            os: TargetOs::Linux,
        }
    }
}

/// Map a source-level calling-convention annotation to the LLVM attribute.
/// Unknown names fall back to the C default.
pub fn map_calling_convention(name: &str) -> &'static str {
    match name.to_ascii_lowercase().as_str() {
        "c" | "cdecl" | "ccc" => "ccc",
        "stdcall" => "x86_stdcallcc",
        "fastcall" => "x86_fastcallcc",
        "thiscall" => "x86_thiscallcc",
        "vectorcall" => "x86_vectorcallcc",
        "win64" => "win64cc",
        "sysv" | "sysv64" => "x86_64_sysvcc",
        "aapcs" => "arm_aapcscc",
        "aapcs_vfp" => "arm_aapcs_vfpcc",
        _ => "ccc",
    }
}

/// Width of an OS-sensitive C-ABI alias on the given target.
pub fn c_alias_bits(name: &str, os: TargetOs) -> u16 {
    match name {
        "cchar" | "cuchar" => 8,
        "cshort" | "cushort" => 16,
        "cint" | "cuint" => 32,
        "cll" | "cull" => 64,
        "clong" | "culong" => {
            if os == TargetOs::Windows {
                32
            } else {
                64
            }
        }
        "cwchar" => {
            if os == TargetOs::Windows {
                16
            } else {
                32
            }
        }
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_target_is_complete() {
        let target = host_target();
        assert!(!target.triple.is_empty());
        assert!(!target.data_layout.is_empty());
        assert_eq!(target.word_type(), "i64");
    }

    #[test]
    fn test_calling_convention_mapping() {
        assert_eq!(map_calling_convention("stdcall"), "x86_stdcallcc");
        assert_eq!(map_calling_convention("FASTCALL"), "x86_fastcallcc");
        assert_eq!(map_calling_convention("aapcs_vfp"), "arm_aapcs_vfpcc");
        assert_eq!(map_calling_convention("win64"), "win64cc");
        // Unknown names fall back to the default
        assert_eq!(map_calling_convention("mystery"), "ccc");
    }

    #[test]
    fn test_os_sensitive_aliases() {
        assert_eq!(c_alias_bits("clong", TargetOs::Windows), 32);
        assert_eq!(c_alias_bits("clong", TargetOs::Linux), 64);
        assert_eq!(c_alias_bits("cwchar", TargetOs::Windows), 16);
        assert_eq!(c_alias_bits("cwchar", TargetOs::MacOs), 32);
        assert_eq!(c_alias_bits("cint", TargetOs::Linux), 32);
    }
}
