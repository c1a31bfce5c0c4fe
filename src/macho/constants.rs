//! Mach-O constants.

// =============================================================================
// Magic Numbers
// =============================================================================

/// 64-bit Mach-O magic (native byte order)
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// 64-bit Mach-O magic (reversed byte order)
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;

/// 32-bit Mach-O magic (native byte order)
pub const MH_MAGIC: u32 = 0xFEEDFACE;

/// 32-bit Mach-O magic (reversed byte order)
pub const MH_CIGAM: u32 = 0xCEFAEDFE;

/// FAT binary magic (big-endian on disk)
pub const FAT_MAGIC: u32 = 0xCAFEBABE;

/// FAT binary magic as seen when read in little-endian order
pub const FAT_CIGAM: u32 = 0xBEBAFECA;

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit architecture flag
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;

/// ARM CPU type
pub const CPU_TYPE_ARM: u32 = 12;
/// ARM64 CPU type
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;

/// x86 CPU type
pub const CPU_TYPE_X86: u32 = 7;
/// x86_64 CPU type
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;

/// PowerPC CPU type
pub const CPU_TYPE_POWERPC: u32 = 18;
/// PowerPC 64 CPU type
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

// =============================================================================
// File Types
// =============================================================================

/// Executable
pub const MH_EXECUTE: u32 = 0x2;
/// Dynamically bound shared library
pub const MH_DYLIB: u32 = 0x6;

// =============================================================================
// Load Commands
// =============================================================================

/// Load command requiring dynamic linker
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

/// Segment of this file (32-bit)
pub const LC_SEGMENT: u32 = 0x1;
/// Link-edit symbol table info
pub const LC_SYMTAB: u32 = 0x2;
/// Dynamic link-edit symbol table info
pub const LC_DYSYMTAB: u32 = 0xB;
/// Load a dynamically linked shared library
pub const LC_LOAD_DYLIB: u32 = 0xC;
/// Dynamically linked shared lib identification
pub const LC_ID_DYLIB: u32 = 0xD;
/// Load a dynamically linked shared library that is allowed to be missing
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
/// Segment of this file (64-bit)
pub const LC_SEGMENT_64: u32 = 0x19;
/// Code signature
pub const LC_CODE_SIGNATURE: u32 = 0x1D;
/// Segment split info
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1E;
/// Encrypted segment information (32-bit)
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
/// Compressed dyld information
pub const LC_DYLD_INFO: u32 = 0x22;
/// Compressed dyld information only
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
/// Compressed table of function start addresses
pub const LC_FUNCTION_STARTS: u32 = 0x26;
/// Entry point (replacement for LC_UNIXTHREAD)
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
/// Table of non-instructions in __text
pub const LC_DATA_IN_CODE: u32 = 0x29;
/// Encrypted segment information (64-bit)
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
/// Linker optimization hints
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2E;
/// Exports trie (superseding dyld info exports)
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
/// Chained fixups
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;

// =============================================================================
// Insertion Conventions
// =============================================================================

/// Timestamp written into inserted dylib commands.
///
/// A fixed sentinel keeps repeated patch runs reproducible; the value 2 is the
/// long-standing convention among load-command patching tools.
pub const INSERTED_DYLIB_TIMESTAMP: u32 = 2;
