//! Format-agnostic features.

use super::{scalars, Feature, FeatureOutput, ImagePayload};
use crate::entropy::{byte_histogram, entropy_from_histogram, round_to};
use crate::error::FeatureError;
use crate::png;
use crate::strings::StringExtractor;
use goblin::Object;
use serde_json::json;

/// Size of the binary in bytes
#[derive(Debug, Default)]
pub struct FileSize;

impl Feature for FileSize {
    fn name(&self) -> &str {
        "file_size"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        Ok(scalars([("file_size", json!(data.len()))]))
    }
}

/// Histogram of the 256 byte values
#[derive(Debug, Default)]
pub struct ByteCounts;

impl Feature for ByteCounts {
    fn name(&self) -> &str {
        "byte_counts"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let counts = byte_histogram(data);
        Ok(scalars([("byte_counts", json!(counts.to_vec()))]))
    }
}

/// Shannon entropy of the whole file, in bits per byte
#[derive(Debug, Default)]
pub struct Entropy;

impl Feature for Entropy {
    fn name(&self) -> &str {
        "entropy"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let entropy = entropy_from_histogram(&byte_histogram(data), data.len());
        Ok(scalars([("entropy", json!(round_to(entropy, 6)))]))
    }
}

/// Printable strings
#[derive(Default)]
pub struct Strings {
    extractor: StringExtractor,
}

impl Feature for Strings {
    fn name(&self) -> &str {
        "strings"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let strings = self.extractor.extract(data);
        Ok(scalars([
            ("strings_count", json!(strings.len())),
            ("strings", json!(strings)),
        ]))
    }
}

/// URLs embedded anywhere in the file
#[derive(Default)]
pub struct Urls {
    extractor: StringExtractor,
}

impl Feature for Urls {
    fn name(&self) -> &str {
        "urls"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        Ok(scalars([("urls", json!(self.extractor.urls(data)))]))
    }
}

/// Imported symbol names (ELF dynamic imports, PE import table, Mach-O binds)
#[derive(Debug, Default)]
pub struct ImportedFunctions;

impl Feature for ImportedFunctions {
    fn name(&self) -> &str {
        "imported_functions"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let imports = match Object::parse(data)? {
            Object::Elf(elf) => elf
                .dynsyms
                .iter()
                .filter(|sym| sym.is_import())
                .filter_map(|sym| elf.dynstrtab.get_at(sym.st_name))
                .map(str::to_string)
                .collect(),
            Object::PE(pe) => pe.imports.iter().map(|imp| imp.name.to_string()).collect(),
            Object::Mach(goblin::mach::Mach::Binary(macho)) => macho
                .imports()?
                .into_iter()
                .map(|imp| imp.name.to_string())
                .collect(),
            _ => return Err(unsupported()),
        };
        Ok(scalars([("imported_functions", json!(dedup(imports)))]))
    }
}

/// Exported symbol names
#[derive(Debug, Default)]
pub struct ExportedFunctions;

impl Feature for ExportedFunctions {
    fn name(&self) -> &str {
        "exported_functions"
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let exports = match Object::parse(data)? {
            Object::Elf(elf) => elf
                .dynsyms
                .iter()
                .filter(|sym| {
                    !sym.is_import()
                        && sym.st_value != 0
                        && sym.st_type() == goblin::elf::sym::STT_FUNC
                        && matches!(
                            sym.st_bind(),
                            goblin::elf::sym::STB_GLOBAL | goblin::elf::sym::STB_WEAK
                        )
                })
                .filter_map(|sym| elf.dynstrtab.get_at(sym.st_name))
                .map(str::to_string)
                .collect(),
            Object::PE(pe) => pe
                .exports
                .iter()
                .filter_map(|exp| exp.name)
                .map(str::to_string)
                .collect(),
            Object::Mach(goblin::mach::Mach::Binary(macho)) => macho
                .exports()?
                .into_iter()
                .map(|exp| exp.name)
                .collect(),
            _ => return Err(unsupported()),
        };
        Ok(scalars([("exported_functions", json!(dedup(exports)))]))
    }
}

fn unsupported() -> FeatureError {
    FeatureError::UnsupportedFormat {
        expected: "ELF, PE or single-architecture Mach-O",
    }
}

/// Drop empty names and repeats, keeping first-seen order
fn dedup(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// The raw bytes rendered as a grayscale PNG, one pixel per byte
#[derive(Debug, Default)]
pub struct BinaryImage;

impl BinaryImage {
    /// Image width for a file size, widening as files grow
    pub fn width_for(len: usize) -> u32 {
        const KB: usize = 1024;
        match len {
            n if n < 10 * KB => 32,
            n if n < 30 * KB => 64,
            n if n < 60 * KB => 128,
            n if n < 100 * KB => 256,
            n if n < 200 * KB => 384,
            n if n < 500 * KB => 512,
            n if n < 1000 * KB => 768,
            _ => 1024,
        }
    }
}

impl Feature for BinaryImage {
    fn name(&self) -> &str {
        "binary_image"
    }

    fn produces_image(&self) -> bool {
        true
    }

    fn extract(&self, data: &[u8]) -> Result<FeatureOutput, FeatureError> {
        let bytes = png::encode_grayscale(data, Self::width_for(data.len()))
            .map_err(|e| FeatureError::other(format!("PNG encoding failed: {}", e)))?;
        Ok(FeatureOutput::Image(ImagePayload {
            bytes,
            format: "png".to_string(),
        }))
    }
}
