// pcmplay: audio decoding and playback library

pub mod cli;
pub mod config;
pub mod logging;
pub mod propfile;
pub mod sound;

pub use cli::Cli;
pub use config::Options;
pub use logging::LogLevel;
