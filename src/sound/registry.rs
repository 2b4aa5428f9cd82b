//! Decoder registry
//!
//! Holds the ordered list of decoder descriptors and picks one per path.
//! A registry is built once at startup and then shared read-only, usually
//! as `Arc<Registry>`, between playback workers.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::decoder::{DecodeError, DecoderHandle, HandleLease};
use super::error::ErrorKind;
use super::module::{
    BuiltinLoader, DecoderModule, ModuleError, ModuleLoader, OpenFn, ProbeFn, BUILTIN_MODULES,
};
use super::probe::ProbeMatch;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No decoder for {0}")]
    NoDecoder(String),
    #[error("Module '{0}' is not loaded")]
    ModuleNotLoaded(String),
    #[error("Module '{module}' is already loaded")]
    AlreadyLoaded { module: String },
    #[error("Module '{module}' still has {handles} open handle(s)")]
    ResourceInUse { module: String, handles: usize },
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::NoDecoder(_) | RegistryError::ModuleNotLoaded(_) => ErrorKind::NotFound,
            RegistryError::AlreadyLoaded { .. } => ErrorKind::LoadFailure,
            RegistryError::ResourceInUse { .. } => ErrorKind::ResourceInUse,
            RegistryError::Module(e) => e.kind(),
            RegistryError::Decode(e) => e.kind(),
        }
    }
}

/// One registered decoder
pub struct PluginDescriptor {
    name: String,
    version: String,
    probe: ProbeFn,
    factory: OpenFn,
    /// Module this decoder was loaded from, if any
    module: Option<String>,
    /// Handles opened through this descriptor and not yet closed
    leases: Arc<AtomicUsize>,
}

impl PluginDescriptor {
    pub fn new(name: &str, version: &str, probe: ProbeFn, factory: OpenFn) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            probe,
            factory,
            module: None,
            leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn from_module(module_name: &str, module: &DecoderModule) -> Self {
        let mut descriptor = Self::new(
            module.decoder_name,
            module.version,
            module.can_decode,
            module.open,
        );
        descriptor.module = Some(module_name.to_string());
        descriptor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn outstanding_handles(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    pub fn probe(&self, path: &Path) -> ProbeMatch {
        (self.probe)(path)
    }

    pub fn can_decode(&self, path: &Path) -> bool {
        self.probe(path).is_match()
    }

    /// Open a decode session for `path`
    pub fn open(&self, path: &Path) -> Result<DecoderHandle, DecodeError> {
        let decoder = (self.factory)(path)?;
        Ok(DecoderHandle::new(decoder).with_lease(HandleLease::acquire(&self.leases)))
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("module", &self.module)
            .field("outstanding_handles", &self.outstanding_handles())
            .finish()
    }
}

/// Ordered decoder registry
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: Vec<PluginDescriptor>,
    modules: Vec<(String, DecoderModule)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in decoder module loaded in default order
    pub fn with_builtin_decoders() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for name in BUILTIN_MODULES {
            registry.load_module(&BuiltinLoader, name)?;
        }
        Ok(registry)
    }

    /// Append a descriptor; earlier registrations win ties
    pub fn register(&mut self, descriptor: PluginDescriptor) {
        log::debug!("Registered decoder '{}' {}", descriptor.name, descriptor.version);
        self.descriptors.push(descriptor);
    }

    pub fn descriptors(&self) -> &[PluginDescriptor] {
        &self.descriptors
    }

    /// Pick the decoder for `path`
    ///
    /// The strongest probe match wins; among equal matches the earliest
    /// registration wins.
    pub fn resolve(&self, path: &Path) -> Result<&PluginDescriptor, RegistryError> {
        let mut best: Option<(ProbeMatch, &PluginDescriptor)> = None;
        for descriptor in &self.descriptors {
            let strength = descriptor.probe(path);
            if strength.is_match() && best.map_or(true, |(b, _)| strength > b) {
                best = Some((strength, descriptor));
                if strength == ProbeMatch::Content {
                    break;
                }
            }
        }

        match best {
            Some((strength, descriptor)) => {
                log::debug!("{}: resolved to '{}' ({:?})", path.display(), descriptor.name, strength);
                Ok(descriptor)
            }
            None => Err(RegistryError::NoDecoder(path.display().to_string())),
        }
    }

    /// Resolve and open in one step
    pub fn open(&self, path: &Path) -> Result<DecoderHandle, RegistryError> {
        let descriptor = self.resolve(path)?;
        Ok(descriptor.open(path)?)
    }

    /// Load a module through `loader` and register its decoder
    pub fn load_module(
        &mut self,
        loader: &dyn ModuleLoader,
        name: &str,
    ) -> Result<&PluginDescriptor, RegistryError> {
        if self.modules.iter().any(|(loaded, _)| loaded == name) {
            return Err(RegistryError::AlreadyLoaded {
                module: name.to_string(),
            });
        }

        let table = loader.load(name)?;
        let module = DecoderModule::bind(name, table)?;
        log::info!("Loaded decoder module '{}': {} {}", name, module.decoder_name, module.version);

        self.register(PluginDescriptor::from_module(name, &module));
        self.modules.push((name.to_string(), module));
        let last = self.descriptors.len() - 1;
        Ok(&self.descriptors[last])
    }

    /// Unload a module and drop its decoder
    ///
    /// Refused while any handle opened through the module is still open.
    pub fn unload_module(&mut self, name: &str) -> Result<(), RegistryError> {
        let module_index = self
            .modules
            .iter()
            .position(|(loaded, _)| loaded == name)
            .ok_or_else(|| RegistryError::ModuleNotLoaded(name.to_string()))?;

        let handles: usize = self
            .descriptors
            .iter()
            .filter(|d| d.module() == Some(name))
            .map(PluginDescriptor::outstanding_handles)
            .sum();
        if handles > 0 {
            return Err(RegistryError::ResourceInUse {
                module: name.to_string(),
                handles,
            });
        }

        self.descriptors.retain(|d| d.module() != Some(name));
        let (_, module) = self.modules.remove(module_index);
        module.destroy();
        log::info!("Unloaded decoder module '{}'", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::decoder::{DecodeResult, DecodedChunk, SoundDecoder};
    use crate::sound::formats::{PcmBuffer, SampleFormat, StreamInfo};
    use crate::sound::module::DecoderEntryPoints;

    struct Silence;

    impl SoundDecoder for Silence {
        fn name(&self) -> &'static str {
            "Silence"
        }
        fn stream_info(&self) -> StreamInfo {
            StreamInfo::new(8000, 1, SampleFormat::Int16).with_total_frames(Some(0))
        }
        fn read(&mut self, _max_frames: usize) -> DecodeResult<DecodedChunk> {
            Ok(DecodedChunk::new(PcmBuffer::I16(Vec::new()), 1, true))
        }
        fn seek(&mut self, _frame: u64) -> DecodeResult<u64> {
            Ok(0)
        }
        fn position(&self) -> u64 {
            0
        }
        fn close(&mut self) {}
    }

    fn wav_ext(path: &Path) -> ProbeMatch {
        if path.extension().map_or(false, |e| e == "wav") {
            ProbeMatch::Extension
        } else {
            ProbeMatch::None
        }
    }

    fn always_content(_: &Path) -> ProbeMatch {
        ProbeMatch::Content
    }

    fn open_silence(_: &Path) -> DecodeResult<Box<dyn SoundDecoder>> {
        Ok(Box::new(Silence))
    }

    static SILENCE_RELEASED: AtomicUsize = AtomicUsize::new(0);

    fn init_silence() -> bool {
        true
    }

    fn destroy_silence() {
        SILENCE_RELEASED.fetch_add(1, Ordering::SeqCst);
    }

    fn name_silence() -> &'static str {
        "Silence"
    }

    struct SilenceLoader;

    impl ModuleLoader for SilenceLoader {
        fn load(&self, name: &str) -> Result<DecoderEntryPoints, ModuleError> {
            if name != "silence" {
                return Err(ModuleError::LoadFailure {
                    module: name.into(),
                    reason: "unknown".into(),
                });
            }
            Ok(DecoderEntryPoints {
                name: Some(name_silence),
                version: Some(name_silence),
                init: Some(init_silence),
                destroy: Some(destroy_silence),
                can_decode: Some(wav_ext),
                open: Some(open_silence),
            })
        }
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("A", "1", wav_ext, open_silence));
        registry.register(PluginDescriptor::new("B", "1", wav_ext, open_silence));
        let chosen = registry.resolve(Path::new("x.wav")).unwrap();
        assert_eq!(chosen.name(), "A");
    }

    #[test]
    fn test_content_match_beats_earlier_extension_match() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("A", "1", wav_ext, open_silence));
        registry.register(PluginDescriptor::new("B", "1", always_content, open_silence));
        let chosen = registry.resolve(Path::new("x.wav")).unwrap();
        assert_eq!(chosen.name(), "B");
    }

    #[test]
    fn test_resolve_nothing_is_not_found() {
        let mut registry = Registry::new();
        registry.register(PluginDescriptor::new("A", "1", wav_ext, open_silence));
        let err = registry.resolve(Path::new("x.mp3")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(registry.resolve(Path::new("")).is_err());
    }

    #[test]
    fn test_unload_refused_while_handle_open() {
        let mut registry = Registry::new();
        registry.load_module(&SilenceLoader, "silence").unwrap();

        let mut handle = registry.open(Path::new("a.wav")).unwrap();
        assert_eq!(registry.descriptors()[0].outstanding_handles(), 1);

        let err = registry.unload_module("silence").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceInUse);

        handle.close();
        registry.unload_module("silence").unwrap();
        assert!(registry.descriptors().is_empty());
        assert!(SILENCE_RELEASED.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_unload_unknown_module() {
        let mut registry = Registry::new();
        let err = registry.unload_module("silence").unwrap_err();
        assert_eq!(err, RegistryError::ModuleNotLoaded("silence".into()));
    }

    #[test]
    fn test_load_module_twice_is_rejected() {
        let mut registry = Registry::new();
        registry.load_module(&SilenceLoader, "silence").unwrap();
        let err = registry.load_module(&SilenceLoader, "silence").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyLoaded { .. }));
    }

    #[test]
    fn test_load_failure_propagates() {
        let mut registry = Registry::new();
        let err = registry.load_module(&SilenceLoader, "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailure);
    }

    #[test]
    fn test_builtin_order() {
        let registry = Registry::with_builtin_decoders().unwrap();
        let names: Vec<_> = registry.descriptors().iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["Wave", "MPEG Layer III", "Ogg Vorbis", "FLAC"]);
        assert!(registry.descriptors().iter().all(|d| d.module().is_some()));
    }

    #[test]
    fn test_registry_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Registry>();
    }
}
