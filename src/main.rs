use anyhow::{bail, Context};
use balanza::config::{Config, ConfigError};
use balanza::jobs::{BackoffPolicy, ConsistencyLevel, JobRegistry, StaticJobRegistry};
use balanza::utils::format_duration;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "balanza")]
#[command(
    about = "Replica-aware load balancing and read/write consistency routing for primary/replica databases"
)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Balanza Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the retry schedule of a job kind
    Backoff {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Job kind name
        #[arg(short, long)]
        job: String,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { output } => {
            generate_config(output)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Backoff { config, job } => {
            show_backoff(config, &job)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  balanza validate --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Primary: {}", config.primary.address);
            println!(
                "  Replicas in pool {}: {} instances",
                config.load_balancing.pool,
                config.load_balancing.hosts.len()
            );
            for (i, host) in config.load_balancing.hosts.iter().enumerate() {
                println!("    {}: {}", i + 1, host);
            }
            println!("  Job kinds: {}", config.jobs.len());
            for job in &config.jobs {
                let consistency = job
                    .consistency
                    .map(|level| level.to_string())
                    .unwrap_or_else(|| "undeclared".to_string());
                println!("    {}: {}", job.name, consistency);
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_backoff(config_path: PathBuf, job: &str) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logging(&config)?;

    let registry = StaticJobRegistry::from_config(&config.retry, &config.jobs);
    let Some(info) = registry.lookup(job)? else {
        bail!("Unknown job kind: {}", job);
    };
    tracing::debug!("Resolved job kind {:?}", info);

    match info.consistency {
        Some(ConsistencyLevel::Delayed) if info.propagation_enabled => {}
        Some(level) if info.propagation_enabled => {
            println!("{} ({}) is never retried while replicas catch up", job, level);
            return Ok(());
        }
        _ => {
            println!("{} always runs on the primary", job);
            return Ok(());
        }
    }

    let policy = BackoffPolicy::from_config(&config.retry);
    println!(
        "{} (delayed, {} attempts) retry schedule:",
        job, info.max_retry_attempts
    );
    for attempt in 1..info.max_retry_attempts {
        println!(
            "  attempt {}: retry in {} to {}",
            attempt,
            format_duration(policy.min_delay_for(attempt)),
            format_duration(policy.max_delay_for(attempt))
        );
    }
    println!(
        "  attempt {}: runs on the primary if replicas are still behind",
        info.max_retry_attempts
    );

    Ok(())
}

fn show_version() {
    println!("balanza v{}", env!("CARGO_PKG_VERSION"));
    println!("Replica-aware load balancing and read/write consistency routing");
    println!();
    println!(
        "Built with Rust {}",
        option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
    );
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Round-robin read balancing across healthy replicas");
    println!("  • Read-your-writes stickiness to the primary");
    println!("  • Replication-position stamping of background jobs");
    println!("  • Delayed retries until a replica catches up");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
