//! PE (Portable Executable) features for Windows binaries.

use super::{scalars, Feature, FeatureOutput};
use crate::entropy::{calculate_entropy, round_to};
use crate::error::FeatureError;
use goblin::pe::optional_header::OptionalHeader;
use goblin::pe::PE;
use serde_json::{json, Value};

const DOS_HEADER_LEN: usize = 64;

fn parse_pe(data: &[u8]) -> Result<PE<'_>, FeatureError> {
    if !data.starts_with(b"MZ") {
        return Err(FeatureError::UnsupportedFormat { expected: "PE" });
    }
    Ok(PE::parse(data)?)
}

fn optional_header<'a>(pe: &'a PE<'_>) -> Result<&'a OptionalHeader, FeatureError> {
    pe.header
        .optional_header
        .as_ref()
        .ok_or_else(|| FeatureError::parse("PE file has no optional header"))
}

fn machine_name(machine: u16) -> String {
    match machine {
        0x014c => "x86".to_string(),
        0x8664 => "x86_64".to_string(),
        0x01c0 => "ARM".to_string(),
        0x01c4 => "ARMv7".to_string(),
        0xaa64 => "ARM64".to_string(),
        _ => format!("unknown-{:#x}", machine),
    }
}

/// File-level summary: size, kind, directory presence and table counts
#[derive(Debug, Default)]
pub struct PeGeneralFileInfo;

impl Feature for PeGeneralFileInfo {
    fn name(&self) -> &str {
        "pe_general_file_info"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let pe = parse_pe(data)?;
        let optional = optional_header(&pe)?;
        let directories = &optional.data_directories;

        Ok(scalars([
            ("size", json!(data.len())),
            ("virtual_size", json!(optional.windows_fields.size_of_image as u64)),
            ("is_dll", json!(pe.is_lib)),
            ("is_64", json!(pe.is_64)),
            ("has_debug", json!(pe.debug_data.is_some())),
            (
                "has_relocations",
                json!(directories.get_base_relocation_table().is_some()),
            ),
            ("has_resources", json!(directories.get_resource_table().is_some())),
            (
                "has_signature",
                json!(directories.get_certificate_table().is_some()),
            ),
            ("has_tls", json!(directories.get_tls_table().is_some())),
            ("imports_count", json!(pe.imports.len())),
            ("exports_count", json!(pe.exports.len())),
            (
                "symbols_count",
                json!(pe.header.coff_header.number_of_symbol_table as u64),
            ),
        ]))
    }
}

/// MS-DOS stub header, read field by field from the first 64 bytes
#[derive(Debug, Default)]
pub struct PeMsDosHeader;

impl Feature for PeMsDosHeader {
    fn name(&self) -> &str {
        "pe_msdos_header"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        if !data.starts_with(b"MZ") {
            return Err(FeatureError::UnsupportedFormat { expected: "PE" });
        }
        if data.len() < DOS_HEADER_LEN {
            return Err(FeatureError::parse(format!(
                "MS-DOS header needs {} bytes, file has {}",
                DOS_HEADER_LEN,
                data.len()
            )));
        }

        let word = |offset: usize| u16::from_le_bytes([data[offset], data[offset + 1]]);
        let pe_pointer = u32::from_le_bytes([data[0x3c], data[0x3d], data[0x3e], data[0x3f]]);

        Ok(scalars([
            ("magic", json!(word(0x00))),
            ("used_bytes_in_last_page", json!(word(0x02))),
            ("file_size_in_pages", json!(word(0x04))),
            ("num_relocation", json!(word(0x06))),
            ("header_size_in_paragraph", json!(word(0x08))),
            ("minimum_extra_paragraphs", json!(word(0x0a))),
            ("maximum_extra_paragraphs", json!(word(0x0c))),
            ("initial_relative_ss", json!(word(0x0e))),
            ("initial_sp", json!(word(0x10))),
            ("checksum", json!(word(0x12))),
            ("initial_ip", json!(word(0x14))),
            ("initial_relative_cs", json!(word(0x16))),
            ("addressof_relocation_table", json!(word(0x18))),
            ("overlay_number", json!(word(0x1a))),
            ("oem_id", json!(word(0x24))),
            ("oem_info", json!(word(0x26))),
            ("addressof_new_exeheader", json!(pe_pointer)),
        ]))
    }
}

/// COFF file header
#[derive(Debug, Default)]
pub struct PeHeader;

impl Feature for PeHeader {
    fn name(&self) -> &str {
        "pe_header"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let pe = parse_pe(data)?;
        let coff = &pe.header.coff_header;

        Ok(scalars([
            ("signature", json!(pe.header.signature as u64)),
            ("machine", json!(coff.machine)),
            ("machine_name", json!(machine_name(coff.machine))),
            ("number_of_sections", json!(coff.number_of_sections)),
            ("time_date_stamp", json!(coff.time_date_stamp as u64)),
            (
                "pointer_to_symbol_table",
                json!(coff.pointer_to_symbol_table as u64),
            ),
            ("number_of_symbols", json!(coff.number_of_symbol_table as u64)),
            ("size_of_optional_header", json!(coff.size_of_optional_header)),
            ("characteristics", json!(coff.characteristics)),
        ]))
    }
}

/// Optional header: standard and Windows-specific fields
#[derive(Debug, Default)]
pub struct PeOptionalHeader;

impl Feature for PeOptionalHeader {
    fn name(&self) -> &str {
        "pe_optional_header"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let pe = parse_pe(data)?;
        let optional = optional_header(&pe)?;
        let standard = &optional.standard_fields;
        let windows = &optional.windows_fields;

        Ok(scalars([
            ("magic", json!(standard.magic)),
            ("major_linker_version", json!(standard.major_linker_version)),
            ("minor_linker_version", json!(standard.minor_linker_version)),
            ("size_of_code", json!(standard.size_of_code as u64)),
            (
                "size_of_initialized_data",
                json!(standard.size_of_initialized_data as u64),
            ),
            (
                "size_of_uninitialized_data",
                json!(standard.size_of_uninitialized_data as u64),
            ),
            ("entrypoint", json!(standard.address_of_entry_point as u64)),
            ("base_of_code", json!(standard.base_of_code as u64)),
            ("image_base", json!(windows.image_base as u64)),
            ("section_alignment", json!(windows.section_alignment as u64)),
            ("file_alignment", json!(windows.file_alignment as u64)),
            (
                "major_operating_system_version",
                json!(windows.major_operating_system_version),
            ),
            (
                "minor_operating_system_version",
                json!(windows.minor_operating_system_version),
            ),
            ("major_image_version", json!(windows.major_image_version)),
            ("minor_image_version", json!(windows.minor_image_version)),
            ("major_subsystem_version", json!(windows.major_subsystem_version)),
            ("minor_subsystem_version", json!(windows.minor_subsystem_version)),
            ("size_of_image", json!(windows.size_of_image as u64)),
            ("size_of_headers", json!(windows.size_of_headers as u64)),
            ("checksum", json!(windows.check_sum as u64)),
            ("subsystem", json!(windows.subsystem)),
            ("dll_characteristics", json!(windows.dll_characteristics)),
            ("size_of_stack_reserve", json!(windows.size_of_stack_reserve as u64)),
            ("size_of_stack_commit", json!(windows.size_of_stack_commit as u64)),
            ("size_of_heap_reserve", json!(windows.size_of_heap_reserve as u64)),
            ("size_of_heap_commit", json!(windows.size_of_heap_commit as u64)),
            ("loader_flags", json!(windows.loader_flags as u64)),
            (
                "number_of_rva_and_sizes",
                json!(windows.number_of_rva_and_sizes as u64),
            ),
        ]))
    }
}

/// Imported DLLs
#[derive(Debug, Default)]
pub struct PeLibraries;

impl Feature for PeLibraries {
    fn name(&self) -> &str {
        "pe_libraries"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let pe = parse_pe(data)?;
        let mut libraries: Vec<String> = Vec::with_capacity(pe.libraries.len());
        for library in &pe.libraries {
            let library = library.to_ascii_lowercase();
            if !libraries.contains(&library) {
                libraries.push(library);
            }
        }
        Ok(scalars([
            ("libraries_count", json!(libraries.len())),
            ("libraries", json!(libraries)),
        ]))
    }
}

/// Section table with permissions and per-section entropy
#[derive(Debug, Default)]
pub struct PeSections;

impl Feature for PeSections {
    fn name(&self) -> &str {
        "pe_sections"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let pe = parse_pe(data)?;

        let sections: Vec<Value> = pe
            .sections
            .iter()
            .map(|section| {
                let name = String::from_utf8_lossy(&section.name)
                    .trim_end_matches('\0')
                    .to_string();
                let characteristics = section.characteristics;
                let permissions = format!(
                    "{}{}{}",
                    if characteristics & 0x4000_0000 != 0 { "r" } else { "-" },
                    if characteristics & 0x8000_0000 != 0 { "w" } else { "-" },
                    if characteristics & 0x2000_0000 != 0 { "x" } else { "-" }
                );

                let offset = section.pointer_to_raw_data as usize;
                let end = offset
                    .saturating_add(section.size_of_raw_data as usize)
                    .min(data.len());
                let entropy = if offset < end {
                    round_to(calculate_entropy(&data[offset..end]), 6)
                } else {
                    0.0
                };

                json!({
                    "name": name,
                    "virtual_size": section.virtual_size,
                    "virtual_address": section.virtual_address,
                    "raw_size": section.size_of_raw_data,
                    "raw_offset": section.pointer_to_raw_data,
                    "characteristics": characteristics,
                    "permissions": permissions,
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
