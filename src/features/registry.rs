//! Feature catalog and resolved registry.
//!
//! The catalog is a static table of every feature the process knows about,
//! keyed by module and feature name and populated at startup. The registry is
//! the ordered subset a configuration asks for. Resolution is tolerant: a
//! missing module or feature is logged and skipped, never fatal.

use super::{base, elf, pe, Feature};
use crate::config::ExtractorConfig;
use crate::error::ResolutionError;
use crate::invoke::StalledCalls;
use crate::layout::is_single_segment;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Constructor for a feature instance.
pub type FeatureFactory = Arc<dyn Fn() -> Arc<dyn Feature> + Send + Sync>;

fn factory<T: Feature + Default + 'static>() -> Arc<dyn Feature> {
    Arc::new(T::default())
}

/// All features available for resolution, grouped by module.
#[derive(Clone, Default)]
pub struct FeatureCatalog {
    modules: BTreeMap<String, Vec<(String, FeatureFactory)>>,
}

impl fmt::Debug for FeatureCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (module, entries) in &self.modules {
            let names: Vec<&str> = entries.iter().map(|(name, _)| name.as_str()).collect();
            map.entry(module, &names);
        }
        map.finish()
    }
}

impl FeatureCatalog {
    /// Catalog with no features at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog with every built-in feature module
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();

        catalog.register("base", "FileSize", factory::<base::FileSize>);
        catalog.register("base", "ByteCounts", factory::<base::ByteCounts>);
        catalog.register("base", "Entropy", factory::<base::Entropy>);
        catalog.register("base", "Strings", factory::<base::Strings>);
        catalog.register("base", "URLs", factory::<base::Urls>);
        catalog.register("base", "ImportedFunctions", factory::<base::ImportedFunctions>);
        catalog.register("base", "ExportedFunctions", factory::<base::ExportedFunctions>);
        catalog.register("base", "BinaryImage", factory::<base::BinaryImage>);

        catalog.register("elf", "ELFHeader", factory::<elf::ElfHeader>);
        catalog.register("elf", "ELFSections", factory::<elf::ElfSections>);
        catalog.register("elf", "ELFLibraries", factory::<elf::ElfLibraries>);

        catalog.register("pe", "PEGeneralFileInfo", factory::<pe::PeGeneralFileInfo>);
        catalog.register("pe", "PEMSDOSHeader", factory::<pe::PeMsDosHeader>);
        catalog.register("pe", "PEHeader", factory::<pe::PeHeader>);
        catalog.register("pe", "PEOptionalHeader", factory::<pe::PeOptionalHeader>);
        catalog.register("pe", "PELibraries", factory::<pe::PeLibraries>);
        catalog.register("pe", "PESections", factory::<pe::PeSections>);

        catalog
    }

    /// Register a feature factory. Re-registering a name replaces the factory
    /// but keeps its original position within the module.
    pub fn register<F>(&mut self, module: &str, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Feature> + Send + Sync + 'static,
    {
        let entries = self.modules.entry(module.to_string()).or_default();
        let factory: FeatureFactory = Arc::new(factory);
        match entries.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = factory,
            None => entries.push((name.to_string(), factory)),
        }
        self
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    fn lookup(&self, module: &str, name: &str) -> Option<&FeatureFactory> {
        self.modules
            .get(module)?
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, factory)| factory)
    }

    /// Every catalog entry as `(module, feature name, instance)`, modules sorted
    pub fn entries(&self) -> Vec<(&str, &str, Arc<dyn Feature>)> {
        self.modules
            .iter()
            .flat_map(|(module, entries)| {
                entries
                    .iter()
                    .map(move |(name, factory)| (module.as_str(), name.as_str(), factory()))
            })
            .collect()
    }
}

/// A resolved feature with its qualified `<module>.<Feature>` id.
#[derive(Clone)]
pub struct RegisteredFeature {
    pub id: String,
    pub feature: Arc<dyn Feature>,
    /// Timed-out calls of this feature whose helper threads are still running
    pub stalled: StalledCalls,
}

impl RegisteredFeature {
    fn new(id: String, feature: Arc<dyn Feature>) -> Self {
        Self {
            id,
            feature,
            stalled: StalledCalls::default(),
        }
    }
}

impl fmt::Debug for RegisteredFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFeature")
            .field("id", &self.id)
            .field("name", &self.feature.name())
            .field("produces_image", &self.feature.produces_image())
            .field("stalled", &self.stalled.count())
            .finish()
    }
}

/// Ordered set of features a run will apply, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    entries: Vec<RegisteredFeature>,
}

impl FeatureRegistry {
    /// Resolve a configuration against a catalog, logging and skipping every
    /// entry that cannot be resolved.
    pub fn resolve(
        catalog: &FeatureCatalog,
        config: &ExtractorConfig,
    ) -> (Self, Vec<ResolutionError>) {
        let (registry, errors) = Self::resolve_entries(catalog, config);
        for err in &errors {
            tracing::warn!("Skipping feature entry {}: {}", err.subject(), err);
        }
        tracing::info!(
            "Resolved {} of {} declared features",
            registry.len(),
            config.declared_count()
        );
        (registry, errors)
    }

    /// Resolve a configuration, failing on the first unresolvable entry.
    pub fn resolve_strict(
        catalog: &FeatureCatalog,
        config: &ExtractorConfig,
    ) -> Result<Self, ResolutionError> {
        let (registry, mut errors) = Self::resolve_entries(catalog, config);
        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(errors.swap_remove(0))
        }
    }

    fn resolve_entries(
        catalog: &FeatureCatalog,
        config: &ExtractorConfig,
    ) -> (Self, Vec<ResolutionError>) {
        let mut registry = Self::default();
        let mut errors = Vec::new();

        for selection in &config.features {
            if !catalog.has_module(&selection.module) {
                errors.push(ResolutionError::UnknownModule {
                    module: selection.module.clone(),
                });
                continue;
            }

            for feature_name in &selection.features {
                let id = format!("{}.{}", selection.module, feature_name);
                let Some(factory) = catalog.lookup(&selection.module, feature_name) else {
                    errors.push(ResolutionError::UnknownFeature {
                        module: selection.module.clone(),
                        feature: feature_name.clone(),
                    });
                    continue;
                };

                let feature = factory();
                // The name becomes an output directory for image features
                if !is_single_segment(feature.name()) {
                    errors.push(ResolutionError::InvalidName {
                        id,
                        name: feature.name().to_string(),
                    });
                    continue;
                }
                let clashes = registry
                    .entries
                    .iter()
                    .any(|e| e.id == id || e.feature.name() == feature.name());
                if clashes {
                    errors.push(ResolutionError::Duplicate { id });
                    continue;
                }

                registry.entries.push(RegisteredFeature::new(id, feature));
            }
        }

        (registry, errors)
    }

    /// Build a registry directly from already-constructed features.
    pub fn from_features<I, S>(features: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn Feature>)>,
        S: Into<String>,
    {
        Self {
            entries: features
                .into_iter()
                .map(|(id, feature)| RegisteredFeature::new(id.into(), feature))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFeature> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    /// Names of image-producing features, in registry order
    pub fn image_feature_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.feature.produces_image())
            .map(|e| e.feature.name())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeatureError;
    use crate::features::FeatureOutput;

    struct Named(&'static str);

    impl Feature for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn extract(&self, _data: &[u8]) -> Result<FeatureOutput, FeatureError> {
            Ok(FeatureOutput::Scalars(Default::default()))
        }
    }

    #[test]
    fn test_builtin_catalog_resolves_everything() {
        let catalog = FeatureCatalog::builtin();
        let config = ExtractorConfig::new([
            (
                "base",
                vec![
                    "ByteCounts",
                    "BinaryImage",
                    "FileSize",
                    "URLs",
                    "ImportedFunctions",
                    "ExportedFunctions",
                    "Strings",
                ],
            ),
            (
                "pe",
                vec![
                    "PEGeneralFileInfo",
                    "PEMSDOSHeader",
                    "PEHeader",
                    "PEOptionalHeader",
                    "PELibraries",
                    "PESections",
                ],
            ),
            ("elf", vec!["ELFHeader", "ELFLibraries", "ELFSections"]),
        ]);

        let (registry, errors) = FeatureRegistry::resolve(&catalog, &config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert_eq!(registry.len(), 16);
        assert_eq!(registry.ids()[0], "base.ByteCounts");
        assert_eq!(registry.ids()[15], "elf.ELFSections");
        assert_eq!(registry.image_feature_names(), vec!["binary_image"]);
    }

    #[test]
    fn test_missing_module_is_skipped() {
        let catalog = FeatureCatalog::builtin();
        let config = ExtractorConfig::new([
            ("macho", vec!["MachOHeader"]),
            ("base", vec!["FileSize"]),
        ]);

        let (registry, errors) = FeatureRegistry::resolve(&catalog, &config);
        assert_eq!(registry.ids(), vec!["base.FileSize"]);
        assert_eq!(
            errors,
            vec![ResolutionError::UnknownModule {
                module: "macho".to_string()
            }]
        );
    }

    #[test]
    fn test_missing_feature_skips_only_that_entry() {
        let catalog = FeatureCatalog::builtin();
        let config = ExtractorConfig::new([("base", vec!["FileSize", "FileColor", "Entropy"])]);

        let (registry, errors) = FeatureRegistry::resolve(&catalog, &config);
        assert_eq!(registry.ids(), vec!["base.FileSize", "base.Entropy"]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].subject(), "base.FileColor");
    }

    #[test]
    fn test_duplicate_declaration_keeps_first_position() {
        let catalog = FeatureCatalog::builtin();
        let config = ExtractorConfig::new([("base", vec!["FileSize", "Entropy", "FileSize"])]);

        let (registry, errors) = FeatureRegistry::resolve(&catalog, &config);
        assert_eq!(registry.ids(), vec!["base.FileSize", "base.Entropy"]);
        assert_eq!(
            errors,
            vec![ResolutionError::Duplicate {
                id: "base.FileSize".to_string()
            }]
        );
    }

    #[test]
    fn test_same_feature_name_across_modules_is_duplicate() {
        let mut catalog = FeatureCatalog::empty();
        catalog.register("a", "One", || Arc::new(Named("same")) as Arc<dyn Feature>);
        catalog.register("b", "Two", || Arc::new(Named("same")) as Arc<dyn Feature>);
        let config = ExtractorConfig::new([("a", vec!["One"]), ("b", vec!["Two"])]);

        let (registry, errors) = FeatureRegistry::resolve(&catalog, &config);
        assert_eq!(registry.ids(), vec!["a.One"]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_name_must_be_single_path_segment() {
        let mut catalog = FeatureCatalog::empty();
        catalog
            .register("m", "Up", || Arc::new(Named("..")) as Arc<dyn Feature>)
            .register("m", "Nested", || Arc::new(Named("a/b")) as Arc<dyn Feature>)
            .register("m", "Fine", || Arc::new(Named("fine")) as Arc<dyn Feature>);
        let config = ExtractorConfig::new([("m", vec!["Up", "Nested", "Fine"])]);

        let (registry, errors) = FeatureRegistry::resolve(&catalog, &config);
        assert_eq!(registry.ids(), vec!["m.Fine"]);
        assert_eq!(
            errors,
            vec![
                ResolutionError::InvalidName {
                    id: "m.Up".to_string(),
                    name: "..".to_string()
                },
                ResolutionError::InvalidName {
                    id: "m.Nested".to_string(),
                    name: "a/b".to_string()
                },
            ]
        );
        assert!(FeatureRegistry::resolve_strict(&catalog, &config).is_err());
    }

    #[test]
    fn test_strict_resolution_fails_on_first_error() {
        let catalog = FeatureCatalog::builtin();
        let config = ExtractorConfig::new([("base", vec!["FileSize", "Nope"])]);

        let err = FeatureRegistry::resolve_strict(&catalog, &config).unwrap_err();
        assert_eq!(err.subject(), "base.Nope");

        let ok = ExtractorConfig::new([("base", vec!["FileSize"])]);
        assert_eq!(FeatureRegistry::resolve_strict(&catalog, &ok).unwrap().len(), 1);
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut catalog = FeatureCatalog::empty();
        catalog
            .register("m", "A", || Arc::new(Named("a1")) as Arc<dyn Feature>)
            .register("m", "B", || Arc::new(Named("b")) as Arc<dyn Feature>)
            .register("m", "A", || Arc::new(Named("a2")) as Arc<dyn Feature>);

        let names: Vec<String> = catalog
            .entries()
            .iter()
            .map(|(_, _, feature)| feature.name().to_string())
            .collect();
        assert_eq!(names, vec!["a2", "b"]);
    }
}
