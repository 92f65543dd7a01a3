//! ELF features.

use super::{scalars, Feature, FeatureOutput};
use crate::entropy::{calculate_entropy, round_to};
use crate::error::FeatureError;
use goblin::elf::header::{et_to_str, machine_to_str};
use goblin::elf::section_header::{sht_to_str, SHT_NOBITS};
use goblin::elf::Elf;
use serde_json::{json, Value};

fn parse_elf(data: &[u8]) -> Result<Elf<'_>, FeatureError> {
    if !data.starts_with(b"\x7fELF") {
        return Err(FeatureError::UnsupportedFormat { expected: "ELF" });
    }
    Ok(Elf::parse(data)?)
}

/// ELF file header fields
#[derive(Debug, Default)]
pub struct ElfHeader;

impl Feature for ElfHeader {
    fn name(&self) -> &str {
        "elf_header"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let elf = parse_elf(data)?;
        let header = &elf.header;

        Ok(scalars([
            ("class", json!(if elf.is_64 { "ELF64" } else { "ELF32" })),
            (
                "endianness",
                json!(if elf.little_endian { "little" } else { "big" }),
            ),
            ("file_type", json!(et_to_str(header.e_type))),
            ("machine", json!(machine_to_str(header.e_machine))),
            ("version", json!(header.e_version)),
            ("entrypoint", json!(header.e_entry)),
            ("header_size", json!(header.e_ehsize)),
            ("program_header_offset", json!(header.e_phoff)),
            ("program_header_size", json!(header.e_phentsize)),
            ("program_header_count", json!(header.e_phnum)),
            ("section_header_offset", json!(header.e_shoff)),
            ("section_header_size", json!(header.e_shentsize)),
            ("section_header_count", json!(header.e_shnum)),
            ("processor_flag", json!(header.e_flags)),
            ("interpreter", json!(elf.interpreter)),
        ]))
    }
}

/// Section table with per-section entropy
#[derive(Debug, Default)]
pub struct ElfSections;

impl Feature for ElfSections {
    fn name(&self) -> &str {
        "elf_sections"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let elf = parse_elf(data)?;

        let sections: Vec<Value> = elf
            .section_headers
            .iter()
            .map(|section| {
                let name = elf.shdr_strtab.get_at(section.sh_name).unwrap_or("");
                let offset = section.sh_offset as usize;
                let size = section.sh_size as usize;
                // NOBITS sections (.bss) occupy no file bytes
                let entropy = match offset.checked_add(size) {
                    Some(end) if section.sh_type != SHT_NOBITS && end <= data.len() => {
                        round_to(calculate_entropy(&data[offset..end]), 6)
                    }
                    _ => 0.0,
                };
                json!({
                    "name": name,
                    "type": sht_to_str(section.sh_type),
                    "flags": section.sh_flags,
                    "address": section.sh_addr,
                    "offset": section.sh_offset,
                    "size": section.sh_size,
                    "entropy": entropy,
                })
            })
            .collect();

        Ok(scalars([
            ("sections_count", json!(sections.len())),
            ("sections", Value::Array(sections)),
        ]))
    }
}

/// DT_NEEDED libraries
#[derive(Debug, Default)]
pub struct ElfLibraries;

impl Feature for ElfLibraries {
    fn name(&self) -> &str {
        "elf_libraries"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let elf = parse_elf(data)?;
        Ok(scalars([
            ("libraries_count", json!(elf.libraries.len())),
            ("libraries", json!(elf.libraries)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ScalarMap;

    /// Smallest well-formed ELF64 little-endian executable header, no tables
    fn minimal_elf64(entry: u64) -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(b"\x7fELF");
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // little endian
        data[6] = 1; // EV_CURRENT
        data[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        data[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        data[20..24].copy_from_slice(&1u32.to_le_bytes());
        data[24..32].copy_from_slice(&entry.to_le_bytes());
        data[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        data[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        data[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        data
    }

    fn scalar_output(feature: &dyn Feature, data: &[u8]) -> ScalarMap {
        match feature.extract(data).unwrap() {
            FeatureOutput::Scalars(map) => map,
            FeatureOutput::Image(_) => panic!("expected scalars"),
        }
    }

    #[test]
    fn test_header_fields() {
        let map = scalar_output(&ElfHeader, &minimal_elf64(0x401000));
        assert_eq!(map["entrypoint"], json!(0x401000));
        assert_eq!(map["class"], json!("ELF64"));
        assert_eq!(map["endianness"], json!("little"));
        assert_eq!(map["file_type"], json!("EXEC"));
        assert_eq!(map["header_size"], json!(64));
        assert_eq!(map["section_header_count"], json!(0));
        assert_eq!(map["interpreter"], Value::Null);
    }

    #[test]
    fn test_no_sections_no_libraries() {
        let data = minimal_elf64(0x1000);
        let sections = scalar_output(&ElfSections, &data);
        assert_eq!(sections["sections_count"], json!(0));
        let libraries = scalar_output(&ElfLibraries, &data);
        assert_eq!(libraries["libraries"], json!([]));
    }

    #[test]
    fn test_rejects_non_elf() {
        let err = ElfHeader.extract(b"MZ\x90\x00").unwrap_err();
        assert_eq!(err, FeatureError::UnsupportedFormat { expected: "ELF" });
    }

    #[test]
    fn test_truncated_elf_is_parse_error() {
        let err = ElfHeader.extract(b"\x7fELF\x02\x01").unwrap_err();
        assert!(matches!(err, FeatureError::Parse(_)));
    }
}
