//! Decoder modules and their entry-point tables
//!
//! A module exposes its decoder through a table of plain function pointers.
//! A `ModuleLoader` resolves a module name to such a table; binding the
//! table checks every required entry point once, so later dispatch never
//! has to handle a missing function.

use std::path::Path;

use super::decoder::{DecodeResult, SoundDecoder};
use super::error::ErrorKind;
use super::probe::ProbeMatch;
use super::{flac, mp3, ogg, wav};

pub type NameFn = fn() -> &'static str;
pub type InitFn = fn() -> bool;
pub type DestroyFn = fn();
pub type ProbeFn = fn(&Path) -> ProbeMatch;
pub type OpenFn = fn(&Path) -> DecodeResult<Box<dyn SoundDecoder>>;

/// Modules shipped with the crate, in default registration order
pub const BUILTIN_MODULES: &[&str] = &["wav", "mp3", "ogg", "flac"];

/// Entry-point table as handed out by a module
///
/// Every field is optional here; `DecoderModule::bind` rejects a table
/// that lacks any of them.
#[derive(Clone, Copy, Default)]
pub struct DecoderEntryPoints {
    pub name: Option<NameFn>,
    pub version: Option<NameFn>,
    pub init: Option<InitFn>,
    pub destroy: Option<DestroyFn>,
    pub can_decode: Option<ProbeFn>,
    pub open: Option<OpenFn>,
}

impl std::fmt::Debug for DecoderEntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderEntryPoints")
            .field("name", &self.name.is_some())
            .field("version", &self.version.is_some())
            .field("init", &self.init.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("can_decode", &self.can_decode.is_some())
            .field("open", &self.open.is_some())
            .finish()
    }
}

/// Error type for module loading
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    #[error("Failed to load module '{module}': {reason}")]
    LoadFailure { module: String, reason: String },
    #[error("Module '{module}' lacks entry point '{symbol}'")]
    MissingEntryPoint { module: String, symbol: &'static str },
}

impl ModuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::LoadFailure { .. } => ErrorKind::LoadFailure,
            ModuleError::MissingEntryPoint { .. } => ErrorKind::MissingEntryPoint,
        }
    }
}

/// Resolves module names to entry-point tables
pub trait ModuleLoader {
    fn load(&self, name: &str) -> Result<DecoderEntryPoints, ModuleError>;
}

/// Loader for the decoders compiled into this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLoader;

impl ModuleLoader for BuiltinLoader {
    fn load(&self, name: &str) -> Result<DecoderEntryPoints, ModuleError> {
        match name.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Ok(wav::entry_points()),
            "mp3" => Ok(mp3::entry_points()),
            "ogg" | "vorbis" => Ok(ogg::entry_points()),
            "flac" => Ok(flac::entry_points()),
            _ => Err(ModuleError::LoadFailure {
                module: name.to_string(),
                reason: "no such built-in module".to_string(),
            }),
        }
    }
}

/// A module whose entry points have been checked and initialized
#[derive(Clone, Copy)]
pub struct DecoderModule {
    pub decoder_name: &'static str,
    pub version: &'static str,
    pub can_decode: ProbeFn,
    pub open: OpenFn,
    destroy: DestroyFn,
}

fn require<T>(module: &str, symbol: &'static str, entry: Option<T>) -> Result<T, ModuleError> {
    entry.ok_or_else(|| ModuleError::MissingEntryPoint {
        module: module.to_string(),
        symbol,
    })
}

impl DecoderModule {
    /// Check the table and run the module's `init`
    pub fn bind(module: &str, entry: DecoderEntryPoints) -> Result<Self, ModuleError> {
        let name = require(module, "name", entry.name)?;
        let version = require(module, "version", entry.version)?;
        let init = require(module, "init", entry.init)?;
        let destroy = require(module, "destroy", entry.destroy)?;
        let can_decode = require(module, "can_decode", entry.can_decode)?;
        let open = require(module, "open", entry.open)?;

        if !init() {
            return Err(ModuleError::LoadFailure {
                module: module.to_string(),
                reason: "init returned false".to_string(),
            });
        }

        Ok(Self {
            decoder_name: name(),
            version: version(),
            can_decode,
            open,
            destroy,
        })
    }

    /// Run the module's `destroy`
    pub fn destroy(self) {
        (self.destroy)();
    }
}

impl std::fmt::Debug for DecoderModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderModule")
            .field("decoder_name", &self.decoder_name)
            .field("version", &self.version)
            .finish()
    }
}
