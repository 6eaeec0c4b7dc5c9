//! mcdriver - run one cache driver operation against a memcached server
//!
//! Values are given and printed as JSON; anything that does not parse as
//! JSON is taken as a plain string.

// Use jemalloc for better multi-threaded performance (10-30% throughput improvement)
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::{Parser, Subcommand};
use mcdriver::config::Config;
use mcdriver::{CacheDriver, Lookup, Ttl};
use serde_json::Value;
use std::process::ExitCode;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcdriver", version, about = "Namespaced memcached cache driver")]
struct Cli {
    /// TOML config file (MCDRIVER_* env vars are used when absent)
    #[arg(short, long, env = "MCDRIVER_CONFIG")]
    config: Option<String>,

    /// Memcached address, overriding the configuration
    #[arg(long)]
    addr: Option<String>,

    /// Namespace prefix, overriding the configuration
    #[arg(long)]
    instance: Option<String>,

    /// Print Prometheus metrics after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    op: Op,
}

#[derive(Subcommand, Debug)]
enum Op {
    /// Print the value stored under KEY
    Get { key: String },

    /// Store VALUE under KEY
    Set {
        key: String,
        value: String,
        /// Seconds to live (<= 0 = forever, default from config)
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },

    /// Store VALUE under KEY unless KEY exists
    Add {
        key: String,
        value: String,
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },

    /// Remove KEY
    Delete { key: String },

    /// Flush entries (the whole server unless clear_scope = "namespace")
    Clear,

    /// Replace KEY with NEW if it currently holds EXPECTED (absent if omitted)
    Cas {
        key: String,
        new: String,
        #[arg(long)]
        expected: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        ttl: Option<i64>,
    },

    /// Remove KEY if it currently holds EXPECTED
    Cad { key: String, expected: String },
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(ref config_path) = cli.config {
        info!("Loading configuration from {}", config_path);
        Config::from_file(config_path)?
    } else {
        Config::from_env()
    };
    if let Some(ref addr) = cli.addr {
        config.store.addr.clone_from(addr);
    }
    if let Some(ref instance) = cli.instance {
        config.driver.instance_id.clone_from(instance);
    }

    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async_main(cli, config))
}

async fn async_main(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    let driver = CacheDriver::connect(&config).await?;
    let ttl_or_default = |ttl: Option<i64>| ttl.map_or_else(|| driver.default_ttl(), Ttl::from_secs);

    let ok = match cli.op {
        Op::Get { key } => match driver.get::<Value>(&key).await {
            Lookup::Found(value) => {
                println!("{value}");
                true
            }
            Lookup::NotFound => {
                eprintln!("not found");
                false
            }
        },
        Op::Set { key, value, ttl } => {
            driver
                .set(&key, &parse_value(&value), ttl_or_default(ttl))
                .await
        }
        Op::Add { key, value, ttl } => {
            driver
                .add(&key, &parse_value(&value), ttl_or_default(ttl))
                .await
        }
        Op::Delete { key } => driver.delete(&key).await,
        Op::Clear => driver.clear().await,
        Op::Cas {
            key,
            new,
            expected,
            ttl,
        } => {
            let expected = expected.as_deref().map(parse_value);
            driver
                .compare_set(&key, expected.as_ref(), &parse_value(&new), ttl_or_default(ttl))
                .await
        }
        Op::Cad { key, expected } => driver.compare_delete(&key, &parse_value(&expected)).await,
    };

    if cli.metrics {
        print!("{}", driver.metrics().gather());
    }

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
