use clap::Parser;
use log::{error, info, warn};
use rtl433_bridge::config::{Config, load_dotenv};
use rtl433_bridge::discovery::discover;
use rtl433_bridge::dispatch::Dispatcher;
use rtl433_bridge::error::{BridgeError, Result};
use rtl433_bridge::sensor::KeyGranularity;
use rtl433_bridge::sink::{AccessoryBridge, MqttClient, SinkSet};
use rtl433_bridge::source::ReadingSource;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::{Child, Command};
use tokio::signal;

#[derive(Parser)]
#[command(name = "rtl433-bridge")]
#[command(about = "Bridge rtl_433 thermo-hygrometers to smart-home consumers")]
struct Cli {
    /// Shell command producing rtl_433 JSON lines (reads stdin when omitted),
    /// e.g. "rtl_433 -F json -R 20"
    #[arg(long, env = "INPUT_COMMAND")]
    command: Option<String>,

    /// Length of the discovery window in seconds
    #[arg(long)]
    discovery_secs: Option<u64>,

    /// Sensor key: device-channel or channel
    #[arg(long)]
    granularity: Option<KeyGranularity>,

    /// Do not publish to MQTT even if a broker is configured
    #[arg(long)]
    no_mqtt: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

type Input = Box<dyn AsyncBufRead + Unpin + Send>;

/// Open the line stream: a spawned command's stdout, or our own stdin.
fn open_input(command: Option<&str>) -> Result<(Input, Option<Child>)> {
    let Some(command) = command else {
        info!("Reading rtl_433 records from stdin");
        return Ok((Box::new(BufReader::new(tokio::io::stdin())), None));
    };

    info!("Starting input command: {}", command);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::InputCommandFailed(e.to_string()))?;
    let stdout = child.stdout.take().ok_or(BridgeError::InputCommandNoStdout)?;
    Ok((Box::new(BufReader::new(stdout)), Some(child)))
}

async fn run(config: Config) -> Result<()> {
    let (input, child) = open_input(config.input.command.as_deref())?;
    let (mut readings, source_handle) = ReadingSource::new(input)
        .with_max_consecutive_errors(config.input.max_consecutive_errors)
        .spawn(config.input.channel_capacity);

    let options = config.discovery_options();
    let mut registry = discover(&mut readings, &options).await;
    if registry.is_empty() {
        return Err(BridgeError::NoSensorsDiscovered);
    }

    let mut sinks = SinkSet::new().with_sink(AccessoryBridge::from_registry(&registry));

    let mqtt_handle = if config.mqtt.enabled {
        info!(
            "[MQTT] Publishing to {}:{} under {}/",
            config.mqtt.broker_host, config.mqtt.broker_port, config.mqtt.topic_prefix
        );
        let mqtt_client = MqttClient::new(&config.mqtt);
        sinks = sinks.with_sink(mqtt_client.publisher(&config.mqtt));
        Some(mqtt_client.start())
    } else {
        None
    };

    info!("Running...");
    let mut dispatcher = Dispatcher::new(options.granularity);
    tokio::select! {
        stats = dispatcher.run(&mut readings, &mut registry, &mut sinks) => {
            warn!(
                "Input ended: {} readings, {} updates, {} unknown, {} sink failures",
                stats.received, stats.updated, stats.unknown, stats.sink_failures
            );
        }
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    if let Some(handle) = mqtt_handle {
        handle.abort();
    }
    source_handle.abort();
    if let Some(mut child) = child
        && let Err(e) = child.kill().await
    {
        warn!("Failed to stop input command: {}", e);
    }

    info!("Exiting...");
    Ok(())
}

#[tokio::main]
async fn main() {
    load_dotenv();
    init_logger();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if cli.command.is_some() {
        config.input.command = cli.command;
    }
    if let Some(secs) = cli.discovery_secs {
        config.discovery.window_secs = secs;
    }
    if let Some(granularity) = cli.granularity {
        config.discovery.granularity = granularity;
    }
    if cli.no_mqtt {
        config.mqtt.enabled = false;
    }

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
