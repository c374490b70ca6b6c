use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use health_monitor::alerts::{AlertDispatcher, AlertEvaluator};
use health_monitor::config::Config;
use health_monitor::keystore::{KeyStore, PublicKeyRecord};
use health_monitor::metrics::Metric;
use health_monitor::paillier::generate_keypair;
use health_monitor::producer::encrypt_reading;
use health_monitor::MonitorService;
use log::{debug, error, info, warn};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// How often the dispatcher retries failed alerts while idle
const ALERT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Request lines buffered between the stdin thread and the serve loop
const STDIN_LINE_BUFFER: usize = 64;

/// How long in-flight blocking work may finish after the serve loop stops
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Command-line arguments for the health monitor
#[derive(Parser)]
#[command(
    name = "health-monitor",
    version,
    about = "Encrypted vital-sign aggregation with threshold alerts",
    long_about = "Aggregates Paillier-encrypted sensor readings per metric without decrypting \
                  individual values, decrypts only the running sums and raises alerts when an \
                  average leaves its normal range."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a key pair into the configured key directory
    Keygen {
        /// Modulus size in bits (defaults to keys.bits)
        #[arg(long)]
        bits: Option<u64>,
        /// Replace an existing key pair
        #[arg(long)]
        force: bool,
    },
    /// Print the public key as JSON
    Pubkey,
    /// Encrypt one reading and print it as a JSON line
    Encrypt {
        /// Metric wire name: heart_rate, spo2 or temperature
        #[arg(long)]
        metric: Metric,
        /// Raw reading, e.g. 72 or 37.6
        #[arg(long, allow_negative_numbers = true)]
        value: f64,
        /// Optional producer identifier
        #[arg(long)]
        sensor_id: Option<String>,
    },
    /// Answer JSON requests read line by line from stdin
    Serve,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// A missing configuration file is allowed and falls back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Command::Encrypt { value, .. } = self.command {
            if !value.is_finite() {
                return Err(format!("Reading must be a finite number, got {}", value));
            }
        }

        Ok(())
    }
}

fn keygen(config: &Config, bits: Option<u64>, force: bool) -> anyhow::Result<()> {
    let bits = bits.unwrap_or(config.keys.bits);
    let store = KeyStore::new(&config.keys.dir);
    if store.exists() && !force {
        bail!(
            "A key pair already exists in {} (use --force to replace it)",
            store.dir().display()
        );
    }

    info!("Generating {}-bit key pair", bits);
    let pair = generate_keypair(bits).context("Key generation failed")?;
    store.save(&pair, force)?;

    println!(
        "Generated {}-bit key {} in {}",
        pair.public.bits(),
        pair.public.fingerprint(),
        store.dir().display()
    );
    Ok(())
}

fn print_public_key(config: &Config) -> anyhow::Result<()> {
    let store = KeyStore::new(&config.keys.dir);
    let public_key = store
        .load_public_key()
        .context("Failed to load public key")?;
    println!(
        "{}",
        serde_json::to_string(&PublicKeyRecord::from(&public_key))?
    );
    Ok(())
}

fn encrypt(
    config: &Config,
    metric: Metric,
    value: f64,
    sensor_id: Option<String>,
) -> anyhow::Result<()> {
    let store = KeyStore::new(&config.keys.dir);
    let public_key = store
        .load_public_key()
        .context("Failed to load public key")?;
    let reading = encrypt_reading(&public_key, metric, value, sensor_id)
        .with_context(|| format!("Cannot encrypt {} reading {}", metric, value))?;
    println!("{}", serde_json::to_string(&reading)?);
    Ok(())
}

/// Read stdin line by line on a dedicated thread
///
/// A blocking read cannot be cancelled, so it stays off the runtime. The
/// thread ends at end of input or once the receiver is dropped.
fn spawn_stdin_reader() -> mpsc::Receiver<io::Result<String>> {
    let (sender, receiver) = mpsc::channel(STDIN_LINE_BUFFER);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let failed = line.is_err();
            if sender.blocking_send(line).is_err() || failed {
                break;
            }
        }
        debug!("Stdin reader stopped");
    });
    receiver
}

/// Answer request lines until input ends or shutdown is signalled
async fn serve_lines<W>(
    service: &MonitorService,
    lines: &mut mpsc::Receiver<io::Result<String>>,
    shutdown: &mut mpsc::UnboundedReceiver<()>,
    writer: &mut W,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.recv() => {
                let Some(line) = line else {
                    info!("Request stream closed");
                    break;
                };
                let line = line.context("Failed to read request")?;
                if line.trim().is_empty() {
                    continue;
                }
                let response = service.handle_line(&line).await;
                writer.write_all(response.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
    }
    Ok(())
}

fn serve(config: &Config) -> anyhow::Result<()> {
    let store = KeyStore::new(&config.keys.dir);
    let keys = store
        .load_or_generate(config.keys.bits)
        .context("Failed to load key pair")?;

    let dispatcher = AlertDispatcher::with_queue_size(config.notifier(), config.alerts.queue_size);
    let (alert_sender, dispatcher_handle) =
        dispatcher.spawn(config.alerts.channel_capacity, ALERT_TICK_INTERVAL);

    let evaluator = AlertEvaluator::new(config.threshold_table(), config.cooldown());
    let service = MonitorService::new(keys, evaluator, Some(alert_sender.clone()));

    let (shutdown_sender, mut shutdown_receiver) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(async {
        let mut lines = spawn_stdin_reader();
        let mut stdout = tokio::io::stdout();
        info!("Monitor is serving requests on stdin. Press Ctrl+C to stop.");
        serve_lines(&service, &mut lines, &mut shutdown_receiver, &mut stdout).await
    });
    // The stdin thread may still be blocked in a read; it is not waited for
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    alert_sender.shutdown();
    match dispatcher_handle.join() {
        Ok(dispatcher) => info!(
            "Alert dispatcher delivered {} alerts ({} undelivered)",
            dispatcher.delivered_count(),
            dispatcher.queued_count()
        ),
        Err(_) => error!("Alert dispatcher thread panicked"),
    }

    result
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = cli.validate() {
        bail!("Invalid arguments: {}", e);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Keygen { bits, force } => keygen(&config, bits, force),
        Command::Pubkey => print_public_key(&config),
        Command::Encrypt {
            metric,
            value,
            sensor_id,
        } => encrypt(&config, metric, value, sensor_id),
        Command::Serve => serve(&config),
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_config(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            command: Command::Serve,
        }
    }

    #[test]
    fn test_cli_validation_with_existing_file() {
        let temp_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::fs::write(temp_file.path(), "[alerts]\ncooldown_seconds = 60").unwrap();

        let cli = cli_with_config(Some(temp_file.path().to_path_buf()));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = cli_with_config(Some(PathBuf::from("/nonexistent/config.toml")));

        // Missing files fall back to defaults
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_config(Some(dir.path().to_path_buf()));

        let result = cli.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("not a file"));
    }

    #[test]
    fn test_cli_validation_rejects_non_finite_reading() {
        let cli = Cli {
            config: None,
            verbose: false,
            command: Command::Encrypt {
                metric: Metric::HeartRate,
                value: f64::NAN,
                sensor_id: None,
            },
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_parse_encrypt_command() {
        let cli = Cli::try_parse_from([
            "health-monitor",
            "--verbose",
            "encrypt",
            "--metric",
            "temperature",
            "--value",
            "37.6",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Command::Encrypt { metric, value, .. } => {
                assert_eq!(metric, Metric::Temperature);
                assert_eq!(value, 37.6);
            }
            _ => panic!("expected encrypt command"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_metric() {
        assert!(Cli::try_parse_from([
            "health-monitor",
            "encrypt",
            "--metric",
            "glucose",
            "--value",
            "5"
        ])
        .is_err());
    }

    fn test_service() -> MonitorService {
        MonitorService::new(
            generate_keypair(256).unwrap(),
            AlertEvaluator::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_serve_loop_stops_on_shutdown_while_input_is_open() {
        let service = test_service();
        let (_line_sender, mut lines) = mpsc::channel::<io::Result<String>>(4);
        let (shutdown_sender, mut shutdown) = mpsc::unbounded_channel();
        let mut output = Vec::new();

        shutdown_sender.send(()).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve_lines(&service, &mut lines, &mut shutdown, &mut output),
        )
        .await
        .expect("serve loop kept waiting for input");

        assert!(result.is_ok());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_serve_loop_answers_each_line_until_input_ends() {
        let service = test_service();
        let (line_sender, mut lines) = mpsc::channel(4);
        let (_shutdown_sender, mut shutdown) = mpsc::unbounded_channel();
        let mut output = Vec::new();

        line_sender
            .send(Ok(r#"{"op":"status"}"#.to_string()))
            .await
            .unwrap();
        line_sender.send(Ok("   ".to_string())).await.unwrap();
        line_sender.send(Ok("not json".to_string())).await.unwrap();
        drop(line_sender);

        serve_lines(&service, &mut lines, &mut shutdown, &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let responses: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert!(responses[0].get("heart_rate").is_some());
        assert!(responses[1].get("error").is_some());
    }

    #[test]
    fn test_keygen_then_encrypt() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.keys.dir = dir.path().join("keys");
        config.keys.bits = 256;

        keygen(&config, None, false).unwrap();
        assert!(keygen(&config, None, false).is_err());
        keygen(&config, Some(256), true).unwrap();

        print_public_key(&config).unwrap();
        encrypt(&config, Metric::HeartRate, 72.0, Some("band-1".to_string())).unwrap();
    }
}
