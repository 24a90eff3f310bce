use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wifi_iot::platform::parse_bssid;
use wifi_iot::{
    ConnectivitySession, JoinRequest, NetworkHandle, NmcliPlatform, Security, SimulatedPlatform,
    bridge::Bridge,
    config::{self, Config, NetworkConfig},
    interface, nmcli, server,
    sim::Scenario,
};

#[derive(Parser)]
#[command(name = "wifi-iot")]
#[command(about = "Force traffic over a Wi-Fi network and manage joins for IoT devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available WiFi interfaces
    ListInterfaces,

    /// Show connection status
    Status {
        /// Interface to check (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Show the current WiFi association (SSID, BSSID, signal, frequency, IP)
    Info {
        /// Interface to inspect (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Acquire a WiFi network and route default traffic through it
    Force {
        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// How long to wait for a network request (defaults to config)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Stop forcing traffic over WiFi and restore default routing
    Unforce {
        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Connect to a WiFi network and wait for the join to settle
    Connect {
        /// SSID of the network to connect to
        ssid: String,

        /// Password for the network (uses saved password if not provided)
        #[arg(short, long)]
        password: Option<String>,

        /// Security type: WPA, WEP or NONE
        #[arg(long)]
        security: Option<String>,

        /// Only join the access point with this BSSID
        #[arg(long)]
        bssid: Option<String>,

        /// The network does not broadcast its SSID
        #[arg(long)]
        hidden: bool,

        /// How long to wait for the join to complete
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// Save credentials to config file
        #[arg(short, long)]
        save: bool,
    },

    /// Disconnect from the current network
    Disconnect {
        /// Interface to disconnect (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Report whether any WiFi network is present
    IsConnected,

    /// Serve the method-call bridge over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Run the acquisition cascade against a scripted scenario
    Simulate {
        /// Scenario TOML file
        scenario: PathBuf,
    },

    /// Save network credentials to config file
    SaveNetwork {
        /// SSID of the network
        ssid: String,

        /// Password for the network
        #[arg(short, long)]
        password: String,

        /// Security type: WPA, WEP or NONE
        #[arg(long, default_value = "WPA")]
        security: String,

        /// Preferred interface for this network
        #[arg(short, long)]
        interface: Option<String>,

        /// Also create a NetworkManager profile for it
        #[arg(long)]
        register: bool,
    },

    /// Remove saved networks and profiles whose SSID starts with a prefix
    RemoveNetwork {
        /// SSID prefix
        prefix: String,

        /// Interface whose profiles to remove (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Show saved configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wifi_iot=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ListInterfaces => cmd_list_interfaces(),
        Commands::Status { interface } => cmd_status(interface.as_deref()),
        Commands::Info { interface } => cmd_info(interface.as_deref()),
        Commands::Force {
            interface,
            timeout_ms,
        } => cmd_force(interface.as_deref(), timeout_ms).await,
        Commands::Unforce { interface } => cmd_unforce(interface.as_deref()),
        Commands::Connect {
            ssid,
            password,
            security,
            bssid,
            hidden,
            timeout_secs,
            interface,
            save,
        } => {
            let options = ConnectOptions {
                bssid,
                hidden,
                timeout_secs,
            };
            cmd_connect(
                &ssid,
                password.as_deref(),
                security.as_deref(),
                options,
                interface.as_deref(),
                save,
            )
            .await
        }
        Commands::Disconnect { interface } => cmd_disconnect(interface.as_deref()).await,
        Commands::IsConnected => cmd_is_connected(),
        Commands::Serve { port, interface } => cmd_serve(port, interface.as_deref()).await,
        Commands::Simulate { scenario } => cmd_simulate(&scenario).await,
        Commands::SaveNetwork {
            ssid,
            password,
            security,
            interface,
            register,
        } => cmd_save_network(&ssid, &password, &security, interface.as_deref(), register).await,
        Commands::RemoveNetwork { prefix, interface } => {
            cmd_remove_network(&prefix, interface.as_deref()).await
        }
        Commands::ShowConfig => cmd_show_config(),
    }
}

fn open_session(interface: Option<&str>, cfg: &Config) -> Result<(Arc<NmcliPlatform>, ConnectivitySession)> {
    let iface = interface::resolve_interface(interface, cfg.default_interface.as_deref())?;
    let platform = Arc::new(NmcliPlatform::new(iface.name));
    let session = ConnectivitySession::new(platform.clone(), cfg.remembered_policy);
    Ok((platform, session))
}

fn parse_security(value: Option<&str>) -> Result<Option<Security>> {
    match value {
        None => Ok(None),
        Some(v) => match Security::parse(Some(v)) {
            Some(security) => Ok(Some(security)),
            None => bail!("Unknown security type '{}' (expected WPA, WEP or NONE)", v),
        },
    }
}

fn cmd_list_interfaces() -> Result<()> {
    let interfaces = interface::list_wifi_interfaces()?;

    if interfaces.is_empty() {
        println!("No WiFi interfaces found.");
        return Ok(());
    }

    println!("{:<16} {}", "INTERFACE", "STATE");
    println!("{}", "-".repeat(40));

    for iface in interfaces {
        println!("{:<16} {}", iface.name, iface.state);
    }

    Ok(())
}

fn cmd_status(interface: Option<&str>) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let iface = interface::resolve_interface(interface, cfg.default_interface.as_deref())?;
    let details = nmcli::device_details(&iface.name)?;
    let state = details.connection_state();

    println!("Interface:  {}", iface.name);
    println!("State:      {}", details.state);
    println!("Supplicant: {}", state.supplicant);
    match details.connection {
        Some(ref conn) => println!("Connected:  {}", conn),
        None => println!("Connected:  (none)"),
    }
    if let Some(ref ip) = details.ip_address {
        println!("IP:         {}", ip);
    }
    if let Some(ref gw) = details.gateway {
        println!("Gateway:    {}", gw);
    }
    match NmcliPlatform::new(iface.name.as_str()).bound_device()? {
        Some(device) => println!("Forced:     {}", device),
        None => println!("Forced:     (no)"),
    }

    Ok(())
}

fn cmd_info(interface: Option<&str>) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let (_, session) = open_session(interface, &cfg)?;

    let Some(info) = session.wifi_info() else {
        println!("Not associated with a WiFi network.");
        return Ok(());
    };
    println!("SSID:       {}", info.ssid);
    println!("BSSID:      {}", info.bssid.as_deref().unwrap_or("-"));
    match info.rssi {
        Some(rssi) => println!("Signal:     {} dBm", rssi),
        None => println!("Signal:     -"),
    }
    match info.frequency {
        Some(mhz) => println!("Frequency:  {} MHz", mhz),
        None => println!("Frequency:  -"),
    }
    println!("IP:         {}", info.ip.as_deref().unwrap_or("-"));

    Ok(())
}

async fn cmd_force(interface: Option<&str>, timeout_ms: Option<u64>) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let (platform, session) = open_session(interface, &cfg)?;

    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| cfg.cascade.timeout());
    println!("Acquiring WiFi network (timeout {} ms)...", timeout.as_millis());

    let acquisition = session.acquire_detailed(timeout).await;
    println!("Result: {}", acquisition.result);

    if !acquisition.result.is_success() {
        bail!("No WiFi network acquired");
    }
    if !acquisition.bound {
        bail!("Could not route traffic through the acquired network");
    }
    if let Some(device) = platform.bound_device()? {
        println!("Default route forced through {}", device);
    }
    Ok(())
}

fn cmd_unforce(interface: Option<&str>) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let (_, session) = open_session(interface, &cfg)?;

    if !session.disable_forced_usage() {
        bail!("Could not restore default routing");
    }
    println!("Default routing restored.");
    Ok(())
}

struct ConnectOptions {
    bssid: Option<String>,
    hidden: bool,
    timeout_secs: Option<u64>,
}

async fn cmd_connect(
    ssid: &str,
    password: Option<&str>,
    security: Option<&str>,
    options: ConnectOptions,
    interface: Option<&str>,
    save: bool,
) -> Result<()> {
    let mut cfg = Config::load().unwrap_or_default();
    let saved = cfg.find_network(ssid).cloned();

    // Get password from argument or config
    let password = match (password, &saved) {
        (Some(p), _) => Some(p.to_string()),
        (None, Some(network)) => {
            println!("Using saved password for '{}'", ssid);
            Some(network.password.clone())
        }
        (None, None) => None,
    };
    let security = match parse_security(security)? {
        Some(security) => security,
        None if password.is_some() => saved.map(|n| n.security).unwrap_or(Security::Wpa),
        None => Security::None,
    };
    if security != Security::None && password.is_none() {
        bail!("No password provided and no saved credentials for '{}'", ssid);
    }
    let bssid = match options.bssid.as_deref() {
        Some(value) => match parse_bssid(value) {
            Some(bssid) => Some(bssid),
            None => bail!("Invalid BSSID '{}'", value),
        },
        None => None,
    };
    let settle = match options.timeout_secs {
        Some(secs) => cfg.settle.within(Duration::from_secs(secs)),
        None => cfg.settle,
    };

    let (platform, session) = open_session(interface, &cfg)?;
    println!("Connecting to '{}' on interface {}...", ssid, platform.interface());

    let request = JoinRequest {
        bssid,
        hidden: options.hidden,
        ..JoinRequest::new(ssid, password.clone(), security)
    };
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let outcome = session.join(request, settle, cancel).await;
    ctrl_c.abort();
    let outcome = outcome?;

    if !outcome.connected() {
        bail!("Connection did not complete: {:?}", outcome);
    }
    println!("Connected after {} attempt(s).", outcome.attempts());

    // Save credentials if requested
    if save {
        if let Some(password) = password {
            cfg.add_network(NetworkConfig {
                ssid: ssid.to_string(),
                password,
                security,
                interface: Some(platform.interface().to_string()),
            });
            cfg.save()?;
            println!("Credentials saved to config.");
        }
    }

    Ok(())
}

async fn cmd_disconnect(interface: Option<&str>) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let (platform, session) = open_session(interface, &cfg)?;
    println!("Disconnecting interface {}...", platform.interface());

    session.disconnect().await?;
    println!("Disconnected.");

    Ok(())
}

fn cmd_is_connected() -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let (_, session) = open_session(None, &cfg)?;
    println!("{}", session.is_wifi_connected());
    Ok(())
}

async fn cmd_serve(port: u16, interface: Option<&str>) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let (_, session) = open_session(interface, &cfg)?;

    let bridge = Arc::new(Bridge::new(Arc::new(session), cfg).persist_to(config::config_path()?));
    server::run_server(server::ServerConfig { port }, bridge).await
}

async fn cmd_simulate(path: &PathBuf) -> Result<()> {
    let cfg = Config::load().unwrap_or_default();
    let scenario = Scenario::load(path)?;
    let platform = Arc::new(SimulatedPlatform::from_scenario(&scenario));
    let session = ConnectivitySession::new(platform.clone(), cfg.remembered_policy);

    if let Some(join) = &scenario.join {
        let request = JoinRequest::new(
            join.ssid.as_str(),
            join.password.clone(),
            join.security.unwrap_or_default(),
        );
        let outcome = session
            .join(request, cfg.settle, CancellationToken::new())
            .await?;
        println!("Join:        {:?}", outcome);
    }
    if let Some(remembered) = &scenario.remembered {
        session.remember(NetworkHandle::new(remembered.as_str()));
    }

    let timeout = scenario
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| cfg.cascade.timeout());
    let result = session.acquire(timeout).await;
    let counters = platform.counters();

    println!("Acquisition: {}", result);
    println!(
        "Bound:       {}",
        platform
            .bound()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!(
        "Calls:       list={} bind={} request={} unregister={}",
        counters.list_calls, counters.bind_calls, counters.request_calls, counters.unregister_calls
    );

    Ok(())
}

async fn cmd_save_network(
    ssid: &str,
    password: &str,
    security: &str,
    interface: Option<&str>,
    register: bool,
) -> Result<()> {
    let mut cfg = Config::load().unwrap_or_default();
    let security = parse_security(Some(security))?.unwrap_or_default();

    if register {
        let (_, session) = open_session(interface, &cfg)?;
        let password = (!password.is_empty()).then(|| password.to_string());
        let id = session
            .register_network(JoinRequest::new(ssid, password, security))
            .await?;
        println!("Registered profile {}", id);
    }

    cfg.add_network(NetworkConfig {
        ssid: ssid.to_string(),
        password: password.to_string(),
        security,
        interface: interface.map(String::from),
    });

    cfg.save()?;

    let path = config::config_path()?;
    println!("Saved network '{}' to {}", ssid, path.display());

    Ok(())
}

async fn cmd_remove_network(prefix: &str, interface: Option<&str>) -> Result<()> {
    if prefix.is_empty() {
        bail!("No SSID prefix given");
    }
    let mut cfg = Config::load().unwrap_or_default();
    let (_, session) = open_session(interface, &cfg)?;

    let profiles = session.remove_networks(prefix).await?;
    let saved = cfg.remove_networks(prefix);
    if saved > 0 {
        cfg.save()?;
    }
    println!(
        "Removed {} profile(s) and {} saved network(s) matching '{}'",
        profiles, saved, prefix
    );
    Ok(())
}

fn cmd_show_config() -> Result<()> {
    let path = config::config_path()?;
    println!("Config file: {}", path.display());
    println!();

    let cfg = Config::load()?;

    println!("Remembered policy: {:?}", cfg.remembered_policy);
    println!("Cascade timeout:   {} ms", cfg.cascade.timeout_ms);
    println!(
        "Settle:            {} attempts every {} ms",
        cfg.settle.max_attempts, cfg.settle.interval_ms
    );
    println!();

    if cfg.networks.is_empty() {
        println!("No saved networks.");
    } else {
        println!("{:<24} {:<8} {:<20} {}", "SSID", "SECURITY", "INTERFACE", "PASSWORD");
        println!("{}", "-".repeat(68));
        for network in &cfg.networks {
            let iface = network.interface.as_deref().unwrap_or("-");
            let masked_pw = "*".repeat(network.password.len().min(12));
            println!(
                "{:<24} {:<8} {:<20} {}",
                network.ssid,
                network.security.to_string(),
                iface,
                masked_pw
            );
        }
    }

    Ok(())
}
