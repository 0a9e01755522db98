//! devtalk: English practice for software engineers.

mod live_mode;
mod practice;
mod settings;
mod text_client;

use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use devtalk_core::audio::device::{list_input_devices, list_output_devices, DeviceInfo};
use devtalk_core::tutor::find_scenario;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use text_client::GeminiTextClient;

#[derive(Parser)]
#[command(name = "devtalk")]
#[command(about = "Live voice tutor, role-play scenarios and vocabulary cards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// API key (overrides environment and settings file)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Talk with the tutor through the microphone until Ctrl-C
    Live {
        /// Input device name (uses the recommended microphone if not specified)
        #[arg(short, long)]
        input: Option<String>,

        /// Output device name
        #[arg(short, long)]
        output: Option<String>,

        /// Prebuilt voice for the tutor
        #[arg(long)]
        voice: Option<String>,
    },

    /// Text role-play of a workplace scenario
    Scenario {
        /// Scenario number or name prefix (prompts if omitted)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Step through vocabulary flash cards
    Vocab,

    /// List audio input and output devices
    Devices,

    /// Write the current settings to the settings file
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "devtalk=info,devtalk_core=info",
        1 => "devtalk=debug,devtalk_core=debug",
        _ => "devtalk=trace,devtalk_core=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    debug!(path = %settings_path.display(), "settings loaded");

    match cli.command {
        Commands::Live {
            input,
            output,
            voice,
        } => {
            if input.is_some() {
                settings.input_device = input;
            }
            if output.is_some() {
                settings.output_device = output;
            }
            if let Some(voice) = voice {
                settings.voice_name = voice;
            }
            settings.normalize();
            let api_key = require_api_key(&settings, cli.api_key.as_deref())?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build async runtime")?;
            runtime.block_on(live_mode::run_live(&settings, api_key))
        }
        Commands::Scenario { name } => {
            let client = text_client(&settings, cli.api_key.as_deref())?;
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stdout();

            let scenario = match name {
                Some(query) => {
                    Some(find_scenario(&query).ok_or_else(|| anyhow!("unknown scenario '{query}'"))?)
                }
                None => practice::choose_scenario(&mut input, &mut out)?,
            };
            match scenario {
                Some(scenario) => practice::run_scenario(&client, scenario, &mut input, &mut out),
                None => Ok(()),
            }
        }
        Commands::Vocab => {
            let client = text_client(&settings, cli.api_key.as_deref())?;
            practice::run_vocabulary(&client, &mut io::stdin().lock(), &mut io::stdout())
        }
        Commands::Devices => {
            print_devices("Input devices", &list_input_devices());
            print_devices("Output devices", &list_output_devices());
            Ok(())
        }
        Commands::InitConfig => {
            save_settings(&settings_path, &settings)
                .with_context(|| format!("failed to write {}", settings_path.display()))?;
            println!("Settings written to {}", settings_path.display());
            Ok(())
        }
    }
}

fn require_api_key(settings: &AppSettings, cli_key: Option<&str>) -> Result<String> {
    settings.resolve_api_key(cli_key).ok_or_else(|| {
        anyhow!(
            "no API key: pass --api-key, set DEVTALK_API_KEY (or GEMINI_API_KEY), \
             or add \"apiKey\" to the settings file"
        )
    })
}

fn text_client(settings: &AppSettings, cli_key: Option<&str>) -> Result<GeminiTextClient> {
    let api_key = require_api_key(settings, cli_key)?;
    GeminiTextClient::new(api_key, settings.text_model.clone())
}

fn print_devices(title: &str, devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("{title}: none found");
        return;
    }
    println!("{title}:");
    for (i, device) in devices.iter().enumerate() {
        let mut tags = Vec::new();
        if device.is_default {
            tags.push("default");
        }
        if device.is_recommended {
            tags.push("recommended");
        }
        if device.is_loopback_like {
            tags.push("loopback?");
        }
        if tags.is_empty() {
            println!("  {}. {}", i + 1, device.name);
        } else {
            println!("  {}. {} ({})", i + 1, device.name, tags.join(", "));
        }
    }
}
