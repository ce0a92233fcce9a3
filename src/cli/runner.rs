use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::{Cli, Commands};
use crate::cast::{discovery, CastControl, ChromecastDevice, DiscoveryError};
use crate::config::Config;
use crate::launcher::arbitration::{Arbitration, LaunchIntent};
use crate::launcher::{DashboardLauncher, LauncherSettings};

/// Settings after merging CLI flags and environment over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOptions {
    settings: LauncherSettings,
    device_query: Option<String>,
    ignore_input_signal: bool,
}

pub(crate) async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.show_debug);

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(load_options(&cli)?).await,
        Commands::List => cmd_list().await,
        Commands::Status => cmd_status(load_options(&cli)?).await,
        Commands::Launch => cmd_launch(load_options(&cli)?).await,
        Commands::InitConfig { force } => cmd_init_config(cli.config.clone(), force),
    }
}

fn load_options(cli: &Cli) -> Result<RunOptions> {
    let config = Config::load(cli.config.as_deref())?;
    resolve_options(cli, &config)
}

fn init_tracing(show_debug: bool) {
    let default_level = if show_debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn resolve_options(cli: &Cli, config: &Config) -> Result<RunOptions> {
    let mut settings = config.launcher_settings()?;
    if let Some(url) = non_empty(cli.dashboard_url.as_deref()) {
        settings.dashboard_url = url.to_string();
    }
    if settings.dashboard_url.trim().is_empty() {
        bail!("Dashboard URL must not be empty");
    }

    let device_query = match non_empty(cli.device.as_deref())
        .or_else(|| non_empty(config.device.name.as_deref()))
    {
        Some(query) => {
            let resolved = config.resolve_device_alias(query)?;
            if resolved.used_alias {
                info!(alias = %resolved.input, device = %resolved.resolved, "using device alias");
            }
            Some(resolved.resolved)
        }
        None => None,
    };

    Ok(RunOptions {
        settings,
        device_query,
        ignore_input_signal: cli.ignore_input_signal || config.device.ignore_input_signal,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

async fn discover() -> Result<Vec<discovery::CastDevice>> {
    info!("searching for cast devices");
    let devices = tokio::task::spawn_blocking(discovery::discover_devices)
        .await
        .context("device discovery task failed")??;
    Ok(devices)
}

async fn connect_device(options: &RunOptions) -> Result<ChromecastDevice> {
    let devices = discover().await?;
    let selected = discovery::select_device(&devices, options.device_query.as_deref())?;
    let device = ChromecastDevice::from_discovered(&selected, options.ignore_input_signal)?;
    info!(
        device = %device.name(),
        address = %device.address(),
        ignore_input_signal = options.ignore_input_signal,
        "using cast device"
    );
    Ok(device)
}

async fn cmd_run(options: RunOptions) -> Result<()> {
    let device = connect_device(&options).await?;

    let (status_tx, status_rx) = mpsc::unbounded_channel();
    let _listener = device.spawn_status_listener(status_tx)?;

    info!(
        device = %device.name(),
        url = %options.settings.dashboard_url,
        debounce_secs = options.settings.debounce.as_secs(),
        reassert_secs = options.settings.reassert_interval.as_secs(),
        "dashboard launcher running (Ctrl+C to stop)"
    );
    let launcher = DashboardLauncher::new(device, options.settings);

    tokio::select! {
        () = launcher.run(status_rx) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("shutting down");
        }
    }
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let devices = discover().await?;
    if devices.is_empty() {
        return Err(DiscoveryError::NoDevices.into());
    }

    for (idx, device) in devices.iter().enumerate() {
        println!("{}. {}", idx + 1, device.label());
    }
    Ok(())
}

async fn cmd_status(options: RunOptions) -> Result<()> {
    let device = connect_device(&options).await?;
    let snapshot = device
        .current_status()
        .await
        .with_context(|| format!("failed to read status of {}", device.name()))?;
    let dashboard_name = &options.settings.dashboard_app_name;
    let result = Arbitration::evaluate(Some(&snapshot), dashboard_name);
    let intent = LaunchIntent::evaluate(Some(&snapshot), dashboard_name);

    println!("Device:           {} ({})", device.name(), device.address());
    println!("Status:           {snapshot}");
    println!("Device active:    {}", result.device_active);
    println!("Dashboard active: {}", result.dashboard_active);
    println!("Other app active: {}", result.other_app_active);
    println!("Should launch:    {}", intent.is_launch());
    Ok(())
}

async fn cmd_launch(options: RunOptions) -> Result<()> {
    let device = connect_device(&options).await?;
    let ack = device
        .load_dashboard(&options.settings.dashboard_url)
        .await
        .with_context(|| format!("failed to launch dashboard on {}", device.name()))?;

    println!(
        "Dashboard sent to {} (session {}{})",
        device.name(),
        ack.session_id,
        if ack.launched { ", app started" } else { "" }
    );
    Ok(())
}

fn cmd_init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(Config::default_path);
    if path.exists() && !force {
        bail!(
            "Config file {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["dashcast"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn cli_flags_override_config() {
        let mut config = Config::default();
        config.dashboard.url = "http://config.local".to_string();
        config.device.name = Some("Config TV".to_string());
        config.timing.debounce = "3s".to_string();

        let options = resolve_options(
            &cli(&["--dashboard-url", "http://cli.local", "--device", "CLI TV"]),
            &config,
        )
        .unwrap();

        assert_eq!(options.settings.dashboard_url, "http://cli.local");
        assert_eq!(options.device_query.as_deref(), Some("CLI TV"));
        assert_eq!(options.settings.debounce, Duration::from_secs(3));
    }

    #[test]
    fn blank_cli_values_fall_back_to_config() {
        let mut config = Config::default();
        config.device.name = Some("Config TV".to_string());
        config.device.ignore_input_signal = true;

        let options =
            resolve_options(&cli(&["--dashboard-url", " ", "--device", ""]), &config).unwrap();
        assert_eq!(options.settings.dashboard_url, config.dashboard.url);
        assert_eq!(options.device_query.as_deref(), Some("Config TV"));
        assert!(options.ignore_input_signal);
    }

    #[test]
    fn device_alias_is_resolved() {
        let mut config = Config::default();
        config
            .device
            .aliases
            .insert("tv".to_string(), "Living Room TV".to_string());

        let options = resolve_options(&cli(&["--device", "TV"]), &config).unwrap();
        assert_eq!(options.device_query.as_deref(), Some("Living Room TV"));
    }

    #[test]
    fn empty_dashboard_url_in_config_is_rejected() {
        let mut config = Config::default();
        config.dashboard.url = String::new();
        assert!(resolve_options(&cli(&["--dashboard-url", ""]), &config).is_err());
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        cmd_init_config(Some(path.clone()), false).unwrap();
        assert!(path.is_file());
        assert!(cmd_init_config(Some(path.clone()), false).is_err());
        cmd_init_config(Some(path), true).unwrap();
    }
}
