//! Single-slice load-command insertion.
//!
//! The inserter appends a dylib-load command to the end of a slice's
//! load-command table. When the header padding between the table and the
//! first file content is large enough, the command is written in place and
//! no other byte of the file moves. Otherwise the file content is shifted
//! forward and every recorded file offset that points past the insertion
//! point is adjusted in one explicit pass over the known offset fields.

use tracing::{debug, warn};
use zerocopy::{FromBytes, IntoBytes};

use super::{LoadKind, SliceOutcome};
use crate::error::{Error, Result};
use crate::macho::*;
use crate::util::{align_up, read_u32_at, read_u64_at, write_u32_at, write_u64_at, Endian};

// =============================================================================
// Offset Field Inventory
// =============================================================================

/// One file-offset field recorded in a load command.
///
/// `at` is the absolute offset of the field within the slice; `wide` selects
/// u64 vs u32 storage. Only active fields (guarded by their count/size
/// sibling) are inventoried, so shifting can treat the list uniformly.
#[derive(Debug, Clone, Copy)]
struct OffsetField {
    at: usize,
    wide: bool,
}

impl OffsetField {
    fn load(&self, data: &[u8], endian: Endian) -> u64 {
        if self.wide {
            read_u64_at(data, self.at, endian)
        } else {
            read_u32_at(data, self.at, endian) as u64
        }
    }

    fn store(&self, data: &mut [u8], endian: Endian, value: u64) -> Result<()> {
        if self.wide {
            write_u64_at(data, self.at, value, endian);
        } else {
            if value > u32::MAX as u64 {
                return Err(Error::OffsetOverflow {
                    field_offset: self.at,
                    value,
                });
            }
            write_u32_at(data, self.at, value as u32, endian);
        }
        Ok(())
    }
}

/// Requires that a command is at least `needed` bytes long.
fn require_len(entry: &CommandRef<'_>, needed: usize) -> Result<()> {
    if (entry.cmdsize as usize) < needed {
        return Err(Error::BadCommandSize {
            offset: entry.offset,
            cmdsize: entry.cmdsize,
        });
    }
    Ok(())
}

/// Inventories every active file-offset field in the slice's load commands.
///
/// This is the single source of truth for "which fields reference absolute
/// file offsets": the fast-path gap computation and the general shifting
/// path both consume it, so an offset that is considered when measuring free
/// space is guaranteed to be adjusted when content moves.
fn collect_offset_fields(view: &SliceView<'_>) -> Result<Vec<OffsetField>> {
    let endian = view.header.endian;
    let data = view.data;
    let mut fields = Vec::new();

    for entry in view.commands() {
        let entry = entry?;
        let base = entry.offset;
        match entry.cmd {
            LC_SEGMENT => {
                require_len(&entry, SegmentCommand32::SIZE)?;
                // fileoff at 32, filesize at 36, nsects at 48
                if read_u32_at(data, base + 32, endian) != 0 {
                    fields.push(OffsetField {
                        at: base + 32,
                        wide: false,
                    });
                }
                let nsects = read_u32_at(data, base + 48, endian) as usize;
                require_len(&entry, SegmentCommand32::SIZE + nsects * Section32::SIZE)?;
                for i in 0..nsects {
                    let sect = base + SegmentCommand32::SIZE + i * Section32::SIZE;
                    // offset at 40, reloff at 48, nreloc at 52
                    if read_u32_at(data, sect + 40, endian) != 0 {
                        fields.push(OffsetField {
                            at: sect + 40,
                            wide: false,
                        });
                    }
                    if read_u32_at(data, sect + 52, endian) != 0 {
                        fields.push(OffsetField {
                            at: sect + 48,
                            wide: false,
                        });
                    }
                }
            }
            LC_SEGMENT_64 => {
                require_len(&entry, SegmentCommand64::SIZE)?;
                // fileoff at 40, filesize at 48, nsects at 64
                if read_u64_at(data, base + 40, endian) != 0 {
                    fields.push(OffsetField {
                        at: base + 40,
                        wide: true,
                    });
                }
                let nsects = read_u32_at(data, base + 64, endian) as usize;
                require_len(&entry, SegmentCommand64::SIZE + nsects * Section64::SIZE)?;
                for i in 0..nsects {
                    let sect = base + SegmentCommand64::SIZE + i * Section64::SIZE;
                    // offset at 48, reloff at 56, nreloc at 60
                    if read_u32_at(data, sect + 48, endian) != 0 {
                        fields.push(OffsetField {
                            at: sect + 48,
                            wide: false,
                        });
                    }
                    if read_u32_at(data, sect + 60, endian) != 0 {
                        fields.push(OffsetField {
                            at: sect + 56,
                            wide: false,
                        });
                    }
                }
            }
            LC_SYMTAB => {
                require_len(&entry, 24)?;
                // symoff/nsyms at 8/12, stroff/strsize at 16/20
                if read_u32_at(data, base + 12, endian) != 0 {
                    fields.push(OffsetField {
                        at: base + 8,
                        wide: false,
                    });
                }
                if read_u32_at(data, base + 20, endian) != 0 {
                    fields.push(OffsetField {
                        at: base + 16,
                        wide: false,
                    });
                }
            }
            LC_DYSYMTAB => {
                require_len(&entry, 80)?;
                // offset/count pairs: toc (32/36), modtab (40/44),
                // extrefsym (48/52), indirectsym (56/60), extrel (64/68),
                // locrel (72/76)
                for (off, count) in [(32, 36), (40, 44), (48, 52), (56, 60), (64, 68), (72, 76)] {
                    if read_u32_at(data, base + count, endian) != 0 {
                        fields.push(OffsetField {
                            at: base + off,
                            wide: false,
                        });
                    }
                }
            }
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => {
                require_len(&entry, 48)?;
                // offset/size pairs: rebase (8/12), bind (16/20),
                // weak_bind (24/28), lazy_bind (32/36), export (40/44)
                for (off, size) in [(8, 12), (16, 20), (24, 28), (32, 36), (40, 44)] {
                    if read_u32_at(data, base + size, endian) != 0 {
                        fields.push(OffsetField {
                            at: base + off,
                            wide: false,
                        });
                    }
                }
            }
            LC_CODE_SIGNATURE
            | LC_SEGMENT_SPLIT_INFO
            | LC_FUNCTION_STARTS
            | LC_DATA_IN_CODE
            | LC_DYLD_EXPORTS_TRIE
            | LC_DYLD_CHAINED_FIXUPS
            | LC_LINKER_OPTIMIZATION_HINT => {
                require_len(&entry, 16)?;
                // dataoff at 8, datasize at 12
                if read_u32_at(data, base + 12, endian) != 0 {
                    fields.push(OffsetField {
                        at: base + 8,
                        wide: false,
                    });
                }
            }
            LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
                require_len(&entry, 20)?;
                // cryptoff at 8, cryptsize at 12
                if read_u32_at(data, base + 12, endian) != 0 {
                    fields.push(OffsetField {
                        at: base + 8,
                        wide: false,
                    });
                }
            }
            LC_MAIN => {
                require_len(&entry, 16)?;
                // entryoff at 8 (u64 file offset of the entry point)
                fields.push(OffsetField {
                    at: base + 8,
                    wide: true,
                });
            }
            _ => {}
        }
    }

    Ok(fields)
}

// =============================================================================
// Insertion
// =============================================================================

/// Inserts a dylib-load command for `install_name` into one slice.
///
/// The slice buffer is the full content of one architecture's Mach-O image.
/// Returns [`SliceOutcome::AlreadyPresent`] without touching the buffer when
/// a matching command exists; otherwise the buffer is mutated (and possibly
/// grown) in place.
pub fn insert_into_slice(
    slice: &mut Vec<u8>,
    install_name: &[u8],
    kind: LoadKind,
) -> Result<SliceOutcome> {
    let view = SliceView::parse(slice)?;
    let mut header = view.header;
    let endian = header.endian;

    if view.has_install_name(install_name)? {
        debug!(
            arch = header.arch_name(),
            "install name already present, skipping insertion"
        );
        return Ok(SliceOutcome::AlreadyPresent);
    }

    let align = header.alignment() as u64;
    let cmdsize = align_up((DylibCommand::SIZE + install_name.len() + 1) as u64, align) as u32;
    let insertion_offset = header.commands_end();

    let fields = collect_offset_fields(&view)?;

    // First content byte recorded anywhere past the command table. Everything
    // between the table and this point is header padding.
    let content_floor = fields
        .iter()
        .map(|f| f.load(slice, endian))
        .filter(|&v| v >= insertion_offset as u64)
        .min()
        .unwrap_or(slice.len() as u64);
    let gap = content_floor.saturating_sub(insertion_offset as u64);

    let in_place =
        gap >= cmdsize as u64 && insertion_offset + cmdsize as usize <= slice.len();

    if in_place {
        let pad = &slice[insertion_offset..insertion_offset + cmdsize as usize];
        if pad.iter().any(|&b| b != 0) {
            warn!(
                arch = header.arch_name(),
                offset = insertion_offset,
                "header padding is not zeroed; overwriting it anyway"
            );
        }
        debug!(
            arch = header.arch_name(),
            cmdsize, "inserting in place into header padding"
        );
        slice[insertion_offset..insertion_offset + cmdsize as usize].fill(0);
    } else {
        debug!(
            arch = header.arch_name(),
            cmdsize,
            available = gap,
            "padding exhausted, shifting file content"
        );
        shift_file_content(slice, &mut header, &fields, insertion_offset, cmdsize)?;
    }

    write_dylib_command(slice, insertion_offset, cmdsize, install_name, kind, endian);

    header.ncmds += 1;
    header.sizeofcmds += cmdsize;
    header.store(slice)?;

    Ok(SliceOutcome::Inserted)
}

/// Grows the file at the insertion point and rewrites every offset field
/// that referenced content past it.
fn shift_file_content(
    slice: &mut Vec<u8>,
    header: &mut SliceHeader,
    fields: &[OffsetField],
    insertion_offset: usize,
    cmdsize: u32,
) -> Result<()> {
    let shift = cmdsize as u64;
    let endian = header.endian;

    // Splice first so field writes below land in the final layout; every
    // inventoried field lives in the command region, before the splice point.
    slice.splice(
        insertion_offset..insertion_offset,
        std::iter::repeat(0u8).take(cmdsize as usize),
    );

    for field in fields {
        let value = field.load(slice, endian);
        if value >= insertion_offset as u64 {
            field.store(slice, endian, value + shift)?;
        }
    }

    grow_covering_segment(slice, header, insertion_offset, shift)?;

    Ok(())
}

/// The segment command covering the load-command region, ready to rewrite.
enum CoveringSegment {
    Seg32(usize, SegmentCommand32),
    Seg64(usize, SegmentCommand64),
}

/// Finds the segment whose file range covers the load-command region and
/// grows its file size (and, if it falls behind, its VM size) by `shift`.
fn grow_covering_segment(
    slice: &mut [u8],
    header: &SliceHeader,
    insertion_offset: usize,
    shift: u64,
) -> Result<()> {
    let endian = header.endian;

    let covering = {
        let view = SliceView::parse(slice)?;
        let mut found = None;
        for entry in view.commands() {
            let entry = entry?;
            match entry.cmd {
                LC_SEGMENT => {
                    let mut seg = SegmentCommand32::read_from_prefix(entry.bytes)
                        .map_err(|_| Error::BadCommandSize {
                            offset: entry.offset,
                            cmdsize: entry.cmdsize,
                        })?
                        .0;
                    if endian == Endian::Big {
                        seg.swap_fields();
                    }
                    if (seg.fileoff as u64) <= insertion_offset as u64
                        && (insertion_offset as u64) < seg.fileoff as u64 + seg.filesize as u64
                    {
                        found = Some(CoveringSegment::Seg32(entry.offset, seg));
                        break;
                    }
                }
                LC_SEGMENT_64 => {
                    let mut seg = SegmentCommand64::read_from_prefix(entry.bytes)
                        .map_err(|_| Error::BadCommandSize {
                            offset: entry.offset,
                            cmdsize: entry.cmdsize,
                        })?
                        .0;
                    if endian == Endian::Big {
                        seg.swap_fields();
                    }
                    if seg.fileoff <= insertion_offset as u64
                        && (insertion_offset as u64) < seg.fileoff + seg.filesize
                    {
                        found = Some(CoveringSegment::Seg64(entry.offset, seg));
                        break;
                    }
                }
                _ => {}
            }
        }
        found
    };

    match covering {
        Some(CoveringSegment::Seg32(at, mut seg)) => {
            let new_filesize = seg.filesize as u64 + shift;
            if new_filesize > u32::MAX as u64 {
                return Err(Error::OffsetOverflow {
                    field_offset: at + 36,
                    value: new_filesize,
                });
            }
            seg.filesize = new_filesize as u32;
            if (seg.vmsize as u64) < new_filesize {
                seg.vmsize = align_up(new_filesize, 0x1000) as u32;
            }
            if endian == Endian::Big {
                seg.swap_fields();
            }
            slice[at..at + SegmentCommand32::SIZE].copy_from_slice(seg.as_bytes());
        }
        Some(CoveringSegment::Seg64(at, mut seg)) => {
            seg.filesize += shift;
            if seg.vmsize < seg.filesize {
                seg.vmsize = align_up(seg.filesize, 0x1000);
            }
            if endian == Endian::Big {
                seg.swap_fields();
            }
            slice[at..at + SegmentCommand64::SIZE].copy_from_slice(seg.as_bytes());
        }
        // No segment maps the header; nothing to grow (true of object files
        // and of some synthetic images used in tests).
        None => {}
    }

    Ok(())
}

/// Writes the new dylib command and its padded install name at `offset`.
fn write_dylib_command(
    slice: &mut [u8],
    offset: usize,
    cmdsize: u32,
    install_name: &[u8],
    kind: LoadKind,
    endian: Endian,
) {
    let mut command = DylibCommand {
        cmd: kind.command(),
        cmdsize,
        ..DylibCommand::default()
    };
    if endian == Endian::Big {
        command.swap_fields();
    }
    slice[offset..offset + DylibCommand::SIZE].copy_from_slice(command.as_bytes());

    let name_start = offset + DylibCommand::SIZE;
    slice[name_start..name_start + install_name.len()].copy_from_slice(install_name);
    // Name terminator and alignment padding are already zero.
}
