//! Firmware image loading.
//!
//! Images are flat byte buffers starting at flash offset 0, zero padded to a
//! 64 byte boundary.
use std::path::Path;
use std::str;

use anyhow::Result;

use crate::constants::{IMAGE_ALIGNMENT, MAX_IMAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    Binary,
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    let image = match format {
        FirmwareFormat::PlainHex => read_hex(str::from_utf8(&raw)?)?,
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(&raw)?)?,
        FirmwareFormat::Binary => raw,
    };
    Ok(pad_image(image))
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }

    let is_line_break = |c: u8| c == b'\n' || c == b'\r';
    if raw.is_empty() {
        FirmwareFormat::Binary
    } else if raw[0] == b':'
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || is_line_break(c))
    {
        FirmwareFormat::IntelHex
    } else if raw
        .iter()
        .all(|&c| c.is_ascii_hexdigit() || is_line_break(c))
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_hex(data: &str) -> Result<Vec<u8>> {
    let digits: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(hex::decode(digits)?)
}

/// Flatten Intel HEX records into one buffer starting at the lowest address.
pub fn read_ihex(data: &str) -> Result<Vec<u8>> {
    use ihex::Record;

    let mut base_address = 0u32;
    let mut records: Vec<(u32, Vec<u8>)> = vec![];
    for record in ihex::Reader::new(data) {
        match record? {
            Record::Data { offset, value } => {
                records.push((base_address + offset as u32, value));
            }
            Record::ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            Record::ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            Record::EndOfFile
            | Record::StartSegmentAddress { .. }
            | Record::StartLinearAddress(_) => (),
        }
    }
    merge_sections(records)
}

fn merge_sections(mut sections: Vec<(u32, Vec<u8>)>) -> Result<Vec<u8>> {
    sections.sort_by_key(|(addr, _)| *addr);

    let Some(first) = sections.first().map(|(addr, _)| *addr) else {
        anyhow::bail!("no data records in firmware");
    };
    let mut end = first;
    for (addr, data) in &sections {
        let sect_end = u32::try_from(data.len())
            .ok()
            .and_then(|len| addr.checked_add(len))
            .ok_or_else(|| {
                anyhow::anyhow!("record @ {:#x} runs past the 4 GiB address space", addr)
            })?;
        end = end.max(sect_end);
    }

    let span = (end - first) as usize;
    if span > MAX_IMAGE_SIZE {
        anyhow::bail!(
            "firmware spans {:#x}..{:#x}, {} bytes is larger than any supported flash",
            first,
            end,
            span
        );
    }

    let mut binary = vec![0u8; span];
    for (addr, sect) in sections {
        let start = (addr - first) as usize;
        binary[start..start + sect.len()].copy_from_slice(&sect);
    }
    Ok(binary)
}

/// Zero pad to the next 64 byte boundary.
pub fn pad_image(mut image: Vec<u8>) -> Vec<u8> {
    let size = image.len().next_multiple_of(IMAGE_ALIGNMENT);
    image.resize(size, 0);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn padding_to_64() {
        assert_eq!(pad_image(vec![]).len(), 0);
        assert_eq!(pad_image(vec![1; 64]).len(), 64);
        let padded = pad_image(vec![1; 130]);
        assert_eq!(padded.len(), 192);
        assert!(padded[130..].iter().all(|&b| b == 0));
    }

    #[test]
    fn format_guessing() {
        let p = Path::new("fw.bin");
        assert_eq!(guess_format(Path::new("fw.hex"), b"\x00"), FirmwareFormat::IntelHex);
        assert_eq!(guess_format(p, b":0400000001020304F2\n"), FirmwareFormat::IntelHex);
        assert_eq!(guess_format(p, b"deadbeef\n"), FirmwareFormat::PlainHex);
        assert_eq!(guess_format(p, &[0x7f, 0x00, 0xff]), FirmwareFormat::Binary);
    }

    #[test]
    fn plain_hex() {
        assert_eq!(read_hex("dead\nbeef\r\n").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn intel_hex_with_gap() {
        let data = ":020000000102FB\n:020004000304F3\n:00000001FF\n";
        assert_eq!(read_ihex(data).unwrap(), vec![1, 2, 0, 0, 3, 4]);
    }

    #[test]
    fn intel_hex_past_address_space() {
        // extended linear address 0xffff, 16 bytes at 0xfff8
        let data = ":02000004FFFFFC\n:10FFF80000000000000000000000000000000000F9\n:00000001FF\n";
        let err = read_ihex(data).unwrap_err();
        assert!(err.to_string().contains("4 GiB"), "{err}");
    }

    #[test]
    fn intel_hex_span_too_wide() {
        // one byte at 0x0 and one at 0x0010_0000
        let data = ":0100000001FE\n:020000040010EA\n:0100000002FD\n:00000001FF\n";
        let err = read_ihex(data).unwrap_err();
        assert!(err.to_string().contains("larger than any supported flash"), "{err}");
    }

    #[test]
    fn intel_hex_span_at_limit() {
        // last byte of the first MiB, plus one byte at 0
        let data = ":0100000001FE\n:02000004000FEB\n:01FFFF0002FF\n:00000001FF\n";
        let image = read_ihex(data).unwrap();
        assert_eq!(image.len(), MAX_IMAGE_SIZE);
        assert_eq!(image[0], 1);
        assert_eq!(image[MAX_IMAGE_SIZE - 1], 2);
    }
}
