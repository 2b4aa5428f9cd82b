use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use pcmplay::config::{self, Options, SoundDriver};
use pcmplay::logging;
use pcmplay::sound::output::list_output_devices;
use pcmplay::sound::{spawn_playback, DeviceSink, NullSink, PlaybackReport, Registry};
use pcmplay::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config file first, command line on top
    let options = config::load_config(&cli.configdir)?;
    let options = cli.merge_into_options(options)?;

    logging::init_logging(options.log_level, options.log_file.as_deref().map(Path::new))?;
    log::debug!("Options: {:?}", options);

    let registry = Arc::new(Registry::with_builtin_decoders().context("Failed to register decoders")?);

    if cli.list_decoders {
        list_decoders(&registry);
        return Ok(());
    }

    if cli.files.is_empty() {
        anyhow::bail!("No files given. Run with --help for usage");
    }

    let failures = if cli.info {
        print_info(&registry, &cli.files)
    } else {
        play_all(&registry, &cli.files, &options)
    };

    if failures > 0 {
        log::error!("{} of {} file(s) failed", failures, cli.files.len());
        process::exit(1);
    }
    Ok(())
}

fn list_decoders(registry: &Registry) {
    println!("Decoders:");
    for descriptor in registry.descriptors() {
        println!(
            "  {} {} ({})",
            descriptor.name(),
            descriptor.version(),
            descriptor.module().unwrap_or("built-in")
        );
    }

    match list_output_devices() {
        Ok(devices) => {
            println!("Output devices:");
            for device in devices {
                println!("  {}", device);
            }
        }
        Err(e) => log::warn!("Cannot list output devices: {}", e),
    }
}

/// Print each file's stream info; returns the number of failures
fn print_info(registry: &Registry, files: &[PathBuf]) -> usize {
    let mut failures = 0;
    for path in files {
        match registry.open(path) {
            Ok(mut handle) => {
                let info = *handle.stream_info();
                print!("{}: {} [{}]", path.display(), info, handle.decoder_name());
                if let Some(duration) = info.duration() {
                    print!(", {:.2}s", duration.as_secs_f64());
                }
                println!();
                handle.close();
            }
            Err(e) => {
                log::error!("{}: {}", path.display(), e);
                failures += 1;
            }
        }
    }
    failures
}

/// Play the files one after another; returns the number of failures
fn play_all(registry: &Arc<Registry>, files: &[PathBuf], options: &Options) -> usize {
    let mut failures = 0;
    for path in files {
        match play_one(registry, path, options) {
            Ok(report) => log::info!(
                "{}: {} frames written by {}",
                path.display(),
                report.frames_written,
                report.decoder
            ),
            Err(e) => {
                log::error!("{}: {:#}", path.display(), e);
                failures += 1;
            }
        }
    }
    failures
}

fn play_one(registry: &Arc<Registry>, path: &Path, options: &Options) -> Result<PlaybackReport> {
    println!("Playing {}", path.display());
    let registry = Arc::clone(registry);
    let path = path.to_path_buf();
    let pipeline_options = options.pipeline_options();
    let buffer_frames = options.buffer_frames;

    // Sinks are created on the worker: a device stream cannot move threads
    let handle = match options.sound_driver {
        SoundDriver::None => spawn_playback(
            registry,
            path,
            move || Ok(NullSink::new(buffer_frames).paced(true)),
            pipeline_options,
        )?,
        SoundDriver::Device => {
            let device = options.device.clone();
            let queue_depth = options.buffer_count;
            spawn_playback(
                registry,
                path,
                move || Ok(DeviceSink::new(device, buffer_frames, queue_depth)),
                pipeline_options,
            )?
        }
    };
    Ok(handle.wait()?)
}
