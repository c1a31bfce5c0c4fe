//! FAT (universal) binary dispatch.
//!
//! A universal binary is a big-endian arch table followed by per-architecture
//! Mach-O slices. The dispatcher validates the table, runs the single-slice
//! pipeline over every slice, and reassembles the container only after every
//! slice has succeeded, so a failing slice can never leave a partially
//! patched file.

use tracing::debug;
use zerocopy::{FromBytes, IntoBytes};

use super::inserter::insert_into_slice;
use super::{LoadKind, PatchReport, SliceOutcome, SliceReport};
use crate::error::{Error, Result};
use crate::macho::*;
use crate::util::{align_up, Endian};

// =============================================================================
// Fat Table Parsing
// =============================================================================

/// Parses and validates the fat arch table.
///
/// Entries are returned with native-order fields. Validation enforces the
/// container invariants: every slice lies within the file and no two slices
/// overlap.
fn parse_fat_arches(data: &[u8], endian: Endian) -> Result<Vec<FatArch>> {
    if data.len() < FatHeader::SIZE {
        return Err(Error::buffer_too_small(FatHeader::SIZE, data.len()));
    }
    let mut header = FatHeader::read_from_prefix(data)
        .map_err(|_| Error::buffer_too_small(FatHeader::SIZE, data.len()))?
        .0;
    if endian == Endian::Big {
        header.magic = header.magic.swap_bytes();
        header.nfat_arch = header.nfat_arch.swap_bytes();
    }
    if header.nfat_arch == 0 {
        return Err(Error::EmptyFatBinary);
    }

    let table_end = FatHeader::SIZE + header.nfat_arch as usize * FatArch::SIZE;
    if table_end > data.len() {
        return Err(Error::buffer_too_small(table_end, data.len()));
    }

    let mut arches = Vec::with_capacity(header.nfat_arch as usize);
    for i in 0..header.nfat_arch as usize {
        let at = FatHeader::SIZE + i * FatArch::SIZE;
        let mut arch = FatArch::read_from_prefix(&data[at..])
            .map_err(|_| Error::buffer_too_small(at + FatArch::SIZE, data.len()))?
            .0;
        if endian == Endian::Big {
            arch.swap_fields();
        }

        let end = arch.offset as u64 + arch.size as u64;
        if end > data.len() as u64 {
            return Err(Error::SliceOutOfBounds {
                offset: arch.offset as u64,
                size: arch.size as u64,
                file_size: data.len() as u64,
            });
        }
        arches.push(arch);
    }

    let mut spans: Vec<(u64, u64)> = arches
        .iter()
        .map(|a| (a.offset as u64, a.offset as u64 + a.size as u64))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(Error::OverlappingSlices {
                first: pair[0].0,
                second: pair[1].0,
            });
        }
    }

    Ok(arches)
}

// =============================================================================
// Presence Check
// =============================================================================

/// Returns true if at least one slice of the image carries the install name.
///
/// Read-only: works directly on the borrowed bytes. Malformed input is an
/// error, never `false`.
pub fn image_has_install_name(data: &[u8], install_name: &[u8]) -> Result<bool> {
    match classify(data)? {
        Magic::Mach { .. } => SliceView::parse(data)?.has_install_name(install_name),
        Magic::Fat { endian } => {
            for arch in parse_fat_arches(data, endian)? {
                let start = arch.offset as usize;
                let end = start + arch.size as usize;
                let view = SliceView::parse(&data[start..end])?;
                if view.has_install_name(install_name)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

// =============================================================================
// Patching
// =============================================================================

/// Runs the insertion pipeline over every slice of an image.
///
/// Returns the patched image and a per-slice report. The input is never
/// mutated; when no slice changes, the returned buffer is byte-identical to
/// the input. All-or-nothing: the first failing slice aborts with an error
/// and nothing is returned.
pub fn patch_image(
    data: &[u8],
    install_name: &[u8],
    kind: LoadKind,
) -> Result<(Vec<u8>, PatchReport)> {
    match classify(data)? {
        Magic::Mach { .. } => {
            let mut slice = data.to_vec();
            let outcome = insert_into_slice(&mut slice, install_name, kind)?;
            let arch = SliceView::parse(&slice)?.header.arch_name();
            Ok((
                slice,
                PatchReport {
                    slices: vec![SliceReport { arch, outcome }],
                },
            ))
        }
        Magic::Fat { endian } => {
            let arches = parse_fat_arches(data, endian)?;
            debug!(slices = arches.len(), "patching universal binary");

            let mut patched: Vec<Vec<u8>> = Vec::with_capacity(arches.len());
            let mut reports = Vec::with_capacity(arches.len());
            for arch in &arches {
                let start = arch.offset as usize;
                let end = start + arch.size as usize;
                let mut slice = data[start..end].to_vec();
                let outcome = insert_into_slice(&mut slice, install_name, kind)?;
                let name = SliceView::parse(&slice)?.header.arch_name();
                reports.push(SliceReport {
                    arch: name,
                    outcome,
                });
                patched.push(slice);
            }

            let report = PatchReport { slices: reports };
            let grew = patched
                .iter()
                .zip(&arches)
                .any(|(slice, arch)| slice.len() != arch.size as usize);

            let output = if !report.changed() {
                data.to_vec()
            } else if !grew {
                // Every insert fit into header padding: overwrite each slice
                // at its original position and leave the rest of the
                // container untouched.
                let mut output = data.to_vec();
                for (slice, arch) in patched.iter().zip(&arches) {
                    let start = arch.offset as usize;
                    output[start..start + slice.len()].copy_from_slice(slice);
                }
                output
            } else {
                reassemble_fat(&arches, &patched, endian)?
            };

            Ok((output, report))
        }
    }
}

/// Rebuilds a fat container around resized slices.
///
/// Slice order is preserved and each slice is placed at the next boundary
/// satisfying its declared alignment; the arch table is rewritten with the
/// new offsets and sizes.
fn reassemble_fat(arches: &[FatArch], slices: &[Vec<u8>], endian: Endian) -> Result<Vec<u8>> {
    let table_end = FatHeader::SIZE + arches.len() * FatArch::SIZE;

    let mut placements = Vec::with_capacity(slices.len());
    let mut cursor = table_end as u64;
    for (arch, slice) in arches.iter().zip(slices) {
        cursor = align_up(cursor, 1u64 << arch.align);
        if cursor + slice.len() as u64 > u32::MAX as u64 {
            return Err(Error::InsufficientSpace {
                needed: (cursor + slice.len() as u64) as usize,
                available: u32::MAX as usize,
            });
        }
        placements.push((cursor as u32, slice.len() as u32));
        cursor += slice.len() as u64;
    }

    let mut output = vec![0u8; cursor as usize];

    let mut header = FatHeader {
        magic: FAT_MAGIC,
        nfat_arch: arches.len() as u32,
    };
    if endian == Endian::Big {
        header.magic = header.magic.swap_bytes();
        header.nfat_arch = header.nfat_arch.swap_bytes();
    }
    output[..FatHeader::SIZE].copy_from_slice(header.as_bytes());

    for (i, (arch, &(offset, size))) in arches.iter().zip(&placements).enumerate() {
        let mut entry = FatArch {
            cputype: arch.cputype,
            cpusubtype: arch.cpusubtype,
            offset,
            size,
            align: arch.align,
        };
        if endian == Endian::Big {
            entry.swap_fields();
        }
        let at = FatHeader::SIZE + i * FatArch::SIZE;
        output[at..at + FatArch::SIZE].copy_from_slice(entry.as_bytes());
    }

    for (slice, &(offset, _)) in slices.iter().zip(&placements) {
        output[offset as usize..offset as usize + slice.len()].copy_from_slice(slice);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::write_u32_at;

    const NAME: &[u8] = b"@rpath/libpatched.dylib";

    /// A minimal thin 64-bit slice with `padding` spare bytes after the
    /// command table and a single __TEXT section.
    fn thin_slice(cputype: u32, padding: usize) -> Vec<u8> {
        let sizeofcmds = SegmentCommand64::SIZE + Section64::SIZE;
        let content_start = MachHeader64::SIZE + sizeofcmds + padding;
        let total = content_start + 0x40;
        let mut data = vec![0u8; total];

        let header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            ncmds: 1,
            sizeofcmds: sizeofcmds as u32,
            flags: 0,
            reserved: 0,
        };
        data[..MachHeader64::SIZE].copy_from_slice(header.as_bytes());

        let mut seg = SegmentCommand64 {
            cmd: LC_SEGMENT_64,
            cmdsize: sizeofcmds as u32,
            segname: [0u8; 16],
            vmaddr: 0x100000000,
            vmsize: 0x1000,
            fileoff: 0,
            filesize: total as u64,
            maxprot: 5,
            initprot: 5,
            nsects: 1,
            flags: 0,
        };
        seg.segname[..6].copy_from_slice(b"__TEXT");
        let mut at = MachHeader64::SIZE;
        data[at..at + SegmentCommand64::SIZE].copy_from_slice(seg.as_bytes());
        at += SegmentCommand64::SIZE;

        let mut sect = Section64 {
            sectname: [0u8; 16],
            segname: [0u8; 16],
            addr: 0x100001000,
            size: 0x40,
            offset: content_start as u32,
            align: 2,
            reloff: 0,
            nreloc: 0,
            flags: 0,
            reserved1: 0,
            reserved2: 0,
            reserved3: 0,
        };
        sect.sectname[..6].copy_from_slice(b"__text");
        sect.segname[..6].copy_from_slice(b"__TEXT");
        data[at..at + Section64::SIZE].copy_from_slice(sect.as_bytes());

        for (i, byte) in data[content_start..].iter_mut().enumerate() {
            *byte = 0x90u8.wrapping_add(i as u8);
        }
        data
    }

    /// Assembles slices into a fat container with a standard big-endian table.
    fn fat_binary(slices: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let align_bits = 4u32;
        let table_end = FatHeader::SIZE + slices.len() * FatArch::SIZE;
        let mut placements = Vec::new();
        let mut cursor = align_up(table_end as u64, 1 << align_bits);
        for (_, slice) in slices {
            placements.push(cursor as usize);
            cursor = align_up(cursor + slice.len() as u64, 1 << align_bits);
        }

        let mut data = vec![0u8; cursor as usize];
        write_u32_at(&mut data, 0, FAT_MAGIC, Endian::Big);
        write_u32_at(&mut data, 4, slices.len() as u32, Endian::Big);
        for (i, ((cputype, slice), &offset)) in slices.iter().zip(&placements).enumerate() {
            let at = FatHeader::SIZE + i * FatArch::SIZE;
            write_u32_at(&mut data, at, *cputype, Endian::Big);
            write_u32_at(&mut data, at + 4, 0, Endian::Big);
            write_u32_at(&mut data, at + 8, offset as u32, Endian::Big);
            write_u32_at(&mut data, at + 12, slice.len() as u32, Endian::Big);
            write_u32_at(&mut data, at + 16, align_bits, Endian::Big);
            data[offset..offset + slice.len()].copy_from_slice(slice);
        }
        data
    }

    #[test]
    fn test_patch_every_fat_slice() {
        let fat = fat_binary(&[
            (CPU_TYPE_ARM64, thin_slice(CPU_TYPE_ARM64, 0x100)),
            (CPU_TYPE_X86_64, thin_slice(CPU_TYPE_X86_64, 0x100)),
        ]);
        let (patched, report) = patch_image(&fat, NAME, LoadKind::Load).unwrap();
        assert_eq!(report.slices.len(), 2);
        assert!(report
            .slices
            .iter()
            .all(|s| s.outcome == SliceOutcome::Inserted));
        assert_eq!(report.slices[0].arch, "arm64");
        assert_eq!(report.slices[1].arch, "x86_64");
        assert!(image_has_install_name(&patched, NAME).unwrap());
        // Fast-path inserts keep the container layout intact.
        assert_eq!(patched.len(), fat.len());
    }

    #[test]
    fn test_fat_reassembly_when_slices_grow() {
        let fat = fat_binary(&[
            (CPU_TYPE_ARM64, thin_slice(CPU_TYPE_ARM64, 0)),
            (CPU_TYPE_X86_64, thin_slice(CPU_TYPE_X86_64, 0)),
        ]);
        let (patched, report) = patch_image(&fat, NAME, LoadKind::Load).unwrap();
        assert!(report.changed());
        assert!(patched.len() > fat.len());
        assert!(image_has_install_name(&patched, NAME).unwrap());

        // The rebuilt table must still validate and describe aligned slices.
        let arches = parse_fat_arches(&patched, Endian::Big).unwrap();
        assert_eq!(arches.len(), 2);
        for arch in &arches {
            assert_eq!(arch.offset % (1 << arch.align), 0);
        }
    }

    #[test]
    fn test_failing_slice_aborts_whole_operation() {
        let mut bad_slice = thin_slice(CPU_TYPE_X86_64, 0x100);
        bad_slice[..4].copy_from_slice(&[0u8; 4]);
        let fat = fat_binary(&[
            (CPU_TYPE_ARM64, thin_slice(CPU_TYPE_ARM64, 0x100)),
            (CPU_TYPE_X86_64, bad_slice),
        ]);
        assert!(patch_image(&fat, NAME, LoadKind::Load).is_err());
    }

    #[test]
    fn test_no_op_when_all_slices_already_present() {
        let fat = fat_binary(&[(CPU_TYPE_ARM64, thin_slice(CPU_TYPE_ARM64, 0x100))]);
        let (once, _) = patch_image(&fat, NAME, LoadKind::Load).unwrap();
        let (twice, report) = patch_image(&once, NAME, LoadKind::Load).unwrap();
        assert!(!report.changed());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_slice_out_of_bounds_rejected() {
        let mut fat = fat_binary(&[(CPU_TYPE_ARM64, thin_slice(CPU_TYPE_ARM64, 0x100))]);
        // Point the slice past the end of the file.
        let len = fat.len() as u32;
        write_u32_at(&mut fat, FatHeader::SIZE + 8, len, Endian::Big);
        assert!(matches!(
            patch_image(&fat, NAME, LoadKind::Load),
            Err(Error::SliceOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_overlapping_slices_rejected() {
        let slice = thin_slice(CPU_TYPE_ARM64, 0x100);
        let mut fat = fat_binary(&[
            (CPU_TYPE_ARM64, slice.clone()),
            (CPU_TYPE_X86_64, thin_slice(CPU_TYPE_X86_64, 0x100)),
        ]);
        // Make the second entry point into the first slice's range.
        let first_offset = {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&fat[FatHeader::SIZE + 8..FatHeader::SIZE + 12]);
            u32::from_be_bytes(buf)
        };
        write_u32_at(
            &mut fat,
            FatHeader::SIZE + FatArch::SIZE + 8,
            first_offset + 16,
            Endian::Big,
        );
        assert!(matches!(
            patch_image(&fat, NAME, LoadKind::Load),
            Err(Error::OverlappingSlices { .. })
        ));
    }

    #[test]
    fn test_empty_fat_rejected() {
        let mut data = vec![0u8; 8];
        write_u32_at(&mut data, 0, FAT_MAGIC, Endian::Big);
        assert!(matches!(
            image_has_install_name(&data, NAME),
            Err(Error::EmptyFatBinary)
        ));
    }
}
