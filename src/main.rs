//! Ostinato CLI — play, render or live-reload pattern scripts

use clap::{Parser, Subcommand};
use ostinato::audio::AudioEngine;
use ostinato::cyclist::Cyclist;
use ostinato::live;
use ostinato::pattern_ops::parse_sound_pattern;
use ostinato::tempo;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "ostinato")]
#[command(about = "Live coding music engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a mini-notation pattern on the default audio device
    Play {
        /// Pattern, e.g. "bd hh sd hh" or "sine*4"
        pattern: String,

        /// Cycles per second
        #[arg(long, default_value = "0.5")]
        cps: f64,

        /// Directory containing sample banks
        #[arg(long)]
        samples: Option<PathBuf>,

        /// Stop after this many seconds (plays forever by default)
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Render a pattern to a WAV file
    Render {
        /// Pattern, e.g. "bd hh sd hh"
        pattern: String,

        /// Output WAV path
        output: PathBuf,

        /// Number of cycles to render
        #[arg(long, default_value = "4")]
        cycles: u32,

        /// Cycles per second
        #[arg(long, default_value = "0.5")]
        cps: f64,

        /// Sample rate in Hz
        #[arg(long, default_value = "44100")]
        sample_rate: u32,

        /// Directory containing sample banks
        #[arg(long)]
        samples: Option<PathBuf>,
    },

    /// Watch a script file and hot-reload it while playing
    Live {
        /// File containing a mini-notation pattern
        file: PathBuf,

        /// Cycles per second
        #[arg(long, default_value = "0.5")]
        cps: f64,

        /// Directory containing sample banks
        #[arg(long)]
        samples: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Play {
            pattern,
            cps,
            samples,
            duration,
        } => {
            tempo::set_cps(cps);
            let pattern = parse_sound_pattern(&pattern)?;
            let engine = AudioEngine::start(cps, samples)?;
            *engine.pattern_slot().lock().unwrap() = Some(pattern);
            info!("playing at {} cps, ctrl-c to stop", cps);
            match duration {
                Some(secs) => std::thread::sleep(std::time::Duration::from_secs_f64(secs)),
                None => loop {
                    std::thread::sleep(std::time::Duration::from_secs(60));
                },
            }
            Ok(())
        }

        Commands::Render {
            pattern,
            output,
            cycles,
            cps,
            sample_rate,
            samples,
        } => {
            tempo::set_cps(cps);
            let pattern = parse_sound_pattern(&pattern)?;
            let mut cyclist = Cyclist::new(sample_rate as f32, cps, samples);
            cyclist.set_pattern(Some(pattern));

            let total_frames = (cycles as f64 / cps * sample_rate as f64).round() as usize;
            let spec = hound::WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut writer = hound::WavWriter::create(&output, spec)?;

            let block = 512;
            let mut written = 0;
            while written < total_frames {
                let frames = block.min(total_frames - written);
                let (left, right) = cyclist.generate(frames);
                for i in 0..frames {
                    writer.write_sample((left[i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
                    writer.write_sample((right[i].clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
                }
                written += frames;
            }
            writer.finalize()?;
            info!(
                "wrote {} cycles ({} frames) to {}",
                cycles,
                total_frames,
                output.display()
            );
            Ok(())
        }

        Commands::Live { file, cps, samples } => {
            tempo::set_cps(cps);
            let engine = AudioEngine::start(cps, samples)?;
            info!("watching {} at {} cps, ctrl-c to stop", file.display(), cps);
            live::watch(file, engine.pattern_slot(), |source| {
                parse_sound_pattern(source.trim()).map_err(|e| e.into())
            });
            Ok(())
        }
    }
}
