//! Mach-O binary structures.
//!
//! These structures match the on-disk format of Mach-O files. Multi-byte
//! fields are stored in the byte order of the containing slice; structures
//! read from a reversed-order slice are normalized with [`swap_fields`]
//! before use and swapped back before being written out.
//!
//! [`swap_fields`]: MachHeader64::swap_fields

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::constants::*;

// =============================================================================
// Fat Container Structures
// =============================================================================

/// FAT (universal) binary header. Stored big-endian on disk.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    /// FAT_MAGIC
    pub magic: u32,
    /// Number of architecture slices that follow
    pub nfat_arch: u32,
}

impl FatHeader {
    /// Size of the fat header in bytes.
    pub const SIZE: usize = 8;
}

/// Per-architecture entry in a FAT binary. Stored big-endian on disk.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch {
    /// CPU type of this slice
    pub cputype: u32,
    /// CPU subtype of this slice
    pub cpusubtype: u32,
    /// File offset of the slice
    pub offset: u32,
    /// Byte size of the slice
    pub size: u32,
    /// Alignment of the slice as a power of 2
    pub align: u32,
}

impl FatArch {
    /// Size of a fat arch entry in bytes.
    pub const SIZE: usize = 20;

    /// Swaps the byte order of every field.
    pub fn swap_fields(&mut self) {
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.size = self.size.swap_bytes();
        self.align = self.align.swap_bytes();
    }
}

// =============================================================================
// Header Structures
// =============================================================================

/// 32-bit Mach-O header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader32 {
    /// Magic number (MH_MAGIC)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
}

impl MachHeader32 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;

    /// Swaps the byte order of every field.
    pub fn swap_fields(&mut self) {
        self.magic = self.magic.swap_bytes();
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.filetype = self.filetype.swap_bytes();
        self.ncmds = self.ncmds.swap_bytes();
        self.sizeofcmds = self.sizeofcmds.swap_bytes();
        self.flags = self.flags.swap_bytes();
    }
}

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    /// Magic number (MH_MAGIC_64)
    pub magic: u32,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Size of load commands
    pub sizeofcmds: u32,
    /// Flags
    pub flags: u32,
    /// Reserved
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;

    /// Swaps the byte order of every field.
    pub fn swap_fields(&mut self) {
        self.magic = self.magic.swap_bytes();
        self.cputype = self.cputype.swap_bytes();
        self.cpusubtype = self.cpusubtype.swap_bytes();
        self.filetype = self.filetype.swap_bytes();
        self.ncmds = self.ncmds.swap_bytes();
        self.sizeofcmds = self.sizeofcmds.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved = self.reserved.swap_bytes();
    }
}

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommand {
    /// Type of load command
    pub cmd: u32,
    /// Size of load command
    pub cmdsize: u32,
}

impl LoadCommand {
    /// Size of the load command header.
    pub const SIZE: usize = 8;
}

// =============================================================================
// Segment Commands
// =============================================================================

/// 32-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand32 {
    /// LC_SEGMENT
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u32,
    /// Virtual memory size
    pub vmsize: u32,
    /// File offset
    pub fileoff: u32,
    /// Amount of file to map
    pub filesize: u32,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand32 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 56;

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        let end = self.segname.iter().position(|&b| b == 0).unwrap_or(16);
        std::str::from_utf8(&self.segname[..end]).unwrap_or("")
    }

    /// Swaps the byte order of every numeric field.
    pub fn swap_fields(&mut self) {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.vmaddr = self.vmaddr.swap_bytes();
        self.vmsize = self.vmsize.swap_bytes();
        self.fileoff = self.fileoff.swap_bytes();
        self.filesize = self.filesize.swap_bytes();
        self.maxprot = self.maxprot.swap_bytes();
        self.initprot = self.initprot.swap_bytes();
        self.nsects = self.nsects.swap_bytes();
        self.flags = self.flags.swap_bytes();
    }
}

/// 64-bit segment command.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    /// LC_SEGMENT_64
    pub cmd: u32,
    /// Size of this load command
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub vmaddr: u64,
    /// Virtual memory size
    pub vmsize: u64,
    /// File offset
    pub fileoff: u64,
    /// Amount of file to map
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    /// Number of sections
    pub nsects: u32,
    /// Flags
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 72;

    /// Returns the segment name as a string.
    pub fn name(&self) -> &str {
        let end = self.segname.iter().position(|&b| b == 0).unwrap_or(16);
        std::str::from_utf8(&self.segname[..end]).unwrap_or("")
    }

    /// Swaps the byte order of every numeric field.
    pub fn swap_fields(&mut self) {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.vmaddr = self.vmaddr.swap_bytes();
        self.vmsize = self.vmsize.swap_bytes();
        self.fileoff = self.fileoff.swap_bytes();
        self.filesize = self.filesize.swap_bytes();
        self.maxprot = self.maxprot.swap_bytes();
        self.initprot = self.initprot.swap_bytes();
        self.nsects = self.nsects.swap_bytes();
        self.flags = self.flags.swap_bytes();
    }
}

// =============================================================================
// Sections
// =============================================================================

/// 32-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section32 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u32,
    /// Size in bytes
    pub size: u32,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved (for runtime use)
    pub reserved1: u32,
    /// Reserved (for runtime use)
    pub reserved2: u32,
}

impl Section32 {
    /// Size of a section entry.
    pub const SIZE: usize = 68;

    /// Swaps the byte order of every numeric field.
    pub fn swap_fields(&mut self) {
        self.addr = self.addr.swap_bytes();
        self.size = self.size.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reloff = self.reloff.swap_bytes();
        self.nreloc = self.nreloc.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved1 = self.reserved1.swap_bytes();
        self.reserved2 = self.reserved2.swap_bytes();
    }
}

/// 64-bit section.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    /// Section name (16 bytes, null-padded)
    pub sectname: [u8; 16],
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    /// Virtual memory address
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// File offset
    pub offset: u32,
    /// Alignment (power of 2)
    pub align: u32,
    /// File offset of relocation entries
    pub reloff: u32,
    /// Number of relocation entries
    pub nreloc: u32,
    /// Flags
    pub flags: u32,
    /// Reserved (for runtime use)
    pub reserved1: u32,
    /// Reserved (for runtime use)
    pub reserved2: u32,
    /// Reserved
    pub reserved3: u32,
}

impl Section64 {
    /// Size of a section entry.
    pub const SIZE: usize = 80;

    /// Swaps the byte order of every numeric field.
    pub fn swap_fields(&mut self) {
        self.addr = self.addr.swap_bytes();
        self.size = self.size.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reloff = self.reloff.swap_bytes();
        self.nreloc = self.nreloc.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved1 = self.reserved1.swap_bytes();
        self.reserved2 = self.reserved2.swap_bytes();
        self.reserved3 = self.reserved3.swap_bytes();
    }
}

// =============================================================================
// Dylib Command
// =============================================================================

/// Dylib reference (shared by several load commands).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Dylib {
    /// Library's path name offset, relative to the start of the command
    pub name_offset: u32,
    /// Library's build timestamp
    pub timestamp: u32,
    /// Library's current version number
    pub current_version: u32,
    /// Library's compatibility version number
    pub compatibility_version: u32,
}

/// Dylib load command.
///
/// The install-name string follows the fixed fields, starting at
/// `dylib.name_offset` bytes from the start of the command, null-terminated
/// and padded to the slice's pointer alignment.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylibCommand {
    /// LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_ID_DYLIB, etc.
    pub cmd: u32,
    /// Total size (includes path string)
    pub cmdsize: u32,
    /// Library identification
    pub dylib: Dylib,
}

impl DylibCommand {
    /// Minimum size of this command (without path string).
    pub const SIZE: usize = 24;

    /// Swaps the byte order of every field.
    pub fn swap_fields(&mut self) {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.dylib.name_offset = self.dylib.name_offset.swap_bytes();
        self.dylib.timestamp = self.dylib.timestamp.swap_bytes();
        self.dylib.current_version = self.dylib.current_version.swap_bytes();
        self.dylib.compatibility_version = self.dylib.compatibility_version.swap_bytes();
    }
}

impl Default for DylibCommand {
    fn default() -> Self {
        Self {
            cmd: LC_LOAD_DYLIB,
            cmdsize: Self::SIZE as u32,
            dylib: Dylib {
                name_offset: Self::SIZE as u32,
                timestamp: INSERTED_DYLIB_TIMESTAMP,
                current_version: 0,
                compatibility_version: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn test_struct_sizes_match_on_disk_layout() {
        assert_eq!(std::mem::size_of::<FatHeader>(), FatHeader::SIZE);
        assert_eq!(std::mem::size_of::<FatArch>(), FatArch::SIZE);
        assert_eq!(std::mem::size_of::<MachHeader32>(), MachHeader32::SIZE);
        assert_eq!(std::mem::size_of::<MachHeader64>(), MachHeader64::SIZE);
        assert_eq!(std::mem::size_of::<LoadCommand>(), LoadCommand::SIZE);
        assert_eq!(std::mem::size_of::<SegmentCommand32>(), SegmentCommand32::SIZE);
        assert_eq!(std::mem::size_of::<SegmentCommand64>(), SegmentCommand64::SIZE);
        assert_eq!(std::mem::size_of::<Section32>(), Section32::SIZE);
        assert_eq!(std::mem::size_of::<Section64>(), Section64::SIZE);
        assert_eq!(std::mem::size_of::<DylibCommand>(), DylibCommand::SIZE);
    }

    #[test]
    fn test_swap_fields_round_trips() {
        let mut header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            ncmds: 3,
            sizeofcmds: 0x200,
            flags: 0x21,
            reserved: 0,
        };
        let original = header;
        header.swap_fields();
        assert_eq!(header.magic, MH_CIGAM_64);
        header.swap_fields();
        assert_eq!(header.as_bytes(), original.as_bytes());
    }

    #[test]
    fn test_dylib_command_default_carries_sentinel_timestamp() {
        let cmd = DylibCommand::default();
        assert_eq!(cmd.cmd, LC_LOAD_DYLIB);
        assert_eq!(cmd.dylib.timestamp, INSERTED_DYLIB_TIMESTAMP);
        assert_eq!(cmd.dylib.name_offset as usize, DylibCommand::SIZE);
    }

    #[test]
    fn test_segment_name() {
        let mut seg = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: SegmentCommand64::SIZE as u32,
            segname: [0u8; 16],
            vmaddr: 0,
            vmsize: 0,
            fileoff: 0,
            filesize: 0,
            maxprot: 0,
            initprot: 0,
            nsects: 0,
            flags: 0,
        };
        seg.segname[..6].copy_from_slice(b"__TEXT");
        assert_eq!(seg.name(), "__TEXT");
    }
}
