//! PE image loading.

use panopticon_region::{Blob, Layer, Region};
use panopticon_types::Bound;
use tracing::debug;

use crate::SessionError;

/// COFF machine id of IA-32.
pub const MACHINE_I386: u16 = 0x014c;
/// COFF machine id of AMD64.
pub const MACHINE_AMD64: u16 = 0x8664;

const IMAGE_FILE_EXECUTABLE: u16 = 0x0002;

/// A parsed PE image: the base region with every section mapped in, plus
/// the facts the disassembler seeds from.
#[derive(Debug)]
pub struct PeImage {
    /// Process memory with the sections layered over it.
    pub region: Region,
    /// COFF machine id.
    pub machine: u16,
    /// Preferred load address.
    pub image_base: u64,
    /// Entry point, relative to the image base.
    pub entry: u64,
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, SessionError> {
    let bytes: [u8; 2] = data
        .get(at..at + 2)
        .and_then(|s| s.try_into().ok())
        .ok_or(SessionError::BadImage("file too short"))?;

    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, SessionError> {
    let bytes: [u8; 4] = data
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(SessionError::BadImage("file too short"))?;

    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64, SessionError> {
    let bytes: [u8; 8] = data
        .get(at..at + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or(SessionError::BadImage("file too short"))?;

    Ok(u64::from_le_bytes(bytes))
}

/// Map the PE image in `file` into a fresh base region.
///
/// Sections with raw data become blob layers at
/// `image_base + virtual_address`; BSS-style sections with no raw data
/// become undefined layers of their virtual size. Only executable images
/// of the supported machine types load.
pub fn load(file: &Blob) -> Result<PeImage, SessionError> {
    let data = file.data();
    let mut region = Region::undefined("base", 0xc000_0000);

    if data.len() < 2 || &data[..2] != b"MZ" {
        return Err(SessionError::BadImage("missing MZ magic"));
    }

    let pe_offset = read_u32(data, 0x3c)? as usize;

    if data.get(pe_offset..pe_offset + 4) != Some(b"PE\0\0".as_slice()) {
        return Err(SessionError::BadImage("missing PE signature"));
    }

    let machine = read_u16(data, pe_offset + 4)?;
    let section_count = read_u16(data, pe_offset + 6)? as usize;
    let opthdr_size = read_u16(data, pe_offset + 20)? as usize;
    let flags = read_u16(data, pe_offset + 22)?;

    if machine != MACHINE_I386 && machine != MACHINE_AMD64 {
        return Err(SessionError::UnsupportedArchitecture(machine));
    }

    if flags & IMAGE_FILE_EXECUTABLE == 0 {
        return Err(SessionError::BadImage("image not executable"));
    }

    let opthdr = pe_offset + 24;
    let magic = read_u16(data, opthdr)?;
    let entry = u64::from(read_u32(data, opthdr + 16)?);
    let image_base = match magic {
        // PE32
        0x10b => u64::from(read_u32(data, opthdr + 28)?),
        // PE32+
        0x20b => read_u64(data, opthdr + 24)?,
        _ => return Err(SessionError::BadImage("unknown optional header magic")),
    };

    debug!(machine, image_base, entry, section_count, "PE header parsed");

    let mut sections = opthdr + opthdr_size;

    for _ in 0..section_count {
        let name_bytes = data
            .get(sections..sections + 8)
            .ok_or(SessionError::BadImage("file too short"))?;
        let name: String = name_bytes
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        let virtual_size = u64::from(read_u32(data, sections + 8)?);
        let virtual_address = u64::from(read_u32(data, sections + 12)?);
        let raw_size = u64::from(read_u32(data, sections + 16)?);
        let raw_pointer = read_u32(data, sections + 20)? as usize;

        if raw_size > 0 {
            let bytes = data
                .get(raw_pointer..raw_pointer + raw_size as usize)
                .ok_or(SessionError::BadImage("section data outside the file"))?;
            let at = image_base + virtual_address;

            debug!(section = %name, address = at, size = raw_size, "mapped");
            region.add(
                Bound::new(at, at + raw_size),
                Layer::blob(name, bytes.to_vec()),
            );
        } else if virtual_size > 0 {
            let at = image_base + virtual_address;

            debug!(section = %name, address = at, size = virtual_size, "uninitialized");
            region.add(
                Bound::new(at, at + virtual_size),
                Layer::undefined(name, virtual_size),
            );
        }

        sections += 40;
    }

    Ok(PeImage {
        region,
        machine,
        image_base,
        entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal PE32+ with one code and one bss section.
    pub fn sample_pe(machine: u16, flags: u16, code: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; 0x200 + code.len()];

        image[0] = b'M';
        image[1] = b'Z';
        image[0x3c..0x40].copy_from_slice(&0x80u32.to_le_bytes());

        // COFF header
        image[0x80..0x84].copy_from_slice(b"PE\0\0");
        image[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
        image[0x86..0x88].copy_from_slice(&2u16.to_le_bytes()); // sections
        image[0x94..0x96].copy_from_slice(&0x70u16.to_le_bytes()); // opt size
        image[0x96..0x98].copy_from_slice(&flags.to_le_bytes());

        // optional header (PE32+)
        let opt = 0x98;
        image[opt..opt + 2].copy_from_slice(&0x20bu16.to_le_bytes());
        image[opt + 16..opt + 20].copy_from_slice(&0x1000u32.to_le_bytes()); // entry
        image[opt + 24..opt + 32].copy_from_slice(&0x40_0000u64.to_le_bytes()); // base

        // section table
        let sec = opt + 0x70;
        image[sec..sec + 5].copy_from_slice(b".text");
        image[sec + 8..sec + 12].copy_from_slice(&(code.len() as u32).to_le_bytes());
        image[sec + 12..sec + 16].copy_from_slice(&0x1000u32.to_le_bytes()); // va
        image[sec + 16..sec + 20].copy_from_slice(&(code.len() as u32).to_le_bytes());
        image[sec + 20..sec + 24].copy_from_slice(&0x200u32.to_le_bytes()); // raw ptr

        let bss = sec + 40;
        image[bss..bss + 4].copy_from_slice(b".bss");
        image[bss + 8..bss + 12].copy_from_slice(&0x20u32.to_le_bytes()); // virt size
        image[bss + 12..bss + 16].copy_from_slice(&0x2000u32.to_le_bytes()); // va

        image[0x200..0x200 + code.len()].copy_from_slice(code);
        image
    }

    #[test]
    fn loads_sections() {
        let image = sample_pe(MACHINE_AMD64, IMAGE_FILE_EXECUTABLE, &[0x90, 0xc3]);
        let pe = load(&Blob::from_vec(image)).unwrap();

        assert_eq!(pe.machine, MACHINE_AMD64);
        assert_eq!(pe.image_base, 0x40_0000);
        assert_eq!(pe.entry, 0x1000);

        let slab = pe.region.read();

        assert_eq!(slab.read(0x40_1000).unwrap(), Some(0x90));
        assert_eq!(slab.read(0x40_1001).unwrap(), Some(0xc3));
        // the bss section reads as undefined, the unmapped rest as well
        assert_eq!(slab.read(0x40_2000).unwrap(), None);
        assert_eq!(slab.read(0x40_3000).unwrap(), None);
        assert_eq!(pe.region.stack().len(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(
            load(&Blob::from_vec(b"ELF!".to_vec())),
            Err(SessionError::BadImage(_))
        ));
    }

    #[test]
    fn rejects_unknown_machines() {
        let image = sample_pe(0x01c0, IMAGE_FILE_EXECUTABLE, &[0x90]);

        assert!(matches!(
            load(&Blob::from_vec(image)),
            Err(SessionError::UnsupportedArchitecture(0x01c0))
        ));
    }

    #[test]
    fn rejects_non_executable_images() {
        let image = sample_pe(MACHINE_AMD64, 0, &[0x90]);

        assert!(matches!(
            load(&Blob::from_vec(image)),
            Err(SessionError::BadImage(_))
        ));
    }
}
