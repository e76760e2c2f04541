use std::time::Duration;

use clap::Parser;
use prometheus::TextEncoder;
use tokio::sync::watch;

use dnslb::{
    balance::DnsBalancer,
    config::Config,
    health::{HealthCheckOptions, TcpProbe},
    logging::{self, Logger},
    resolver,
};

#[derive(Parser, Debug)]
#[command(name = "dnslb", version, about = "Resolve a domain from a weighted, health checked pool")]
struct Opt {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    conf: String,

    /// Test the configuration and exit
    #[arg(short, long)]
    test: bool,

    /// Number of resolution rounds to run
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// Delay between resolution rounds in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Print prometheus metrics before exiting
    #[arg(long)]
    metrics: bool,

    /// Names to resolve each round, the configured domain if none
    names: Vec<String>,
}

#[tokio::main]
async fn main() {
    // Read command-line arguments
    let opt = Opt::parse();

    // Load configuration
    let config = match Config::load_from_yaml(&opt.conf) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    if opt.test {
        println!("Configuration {} is valid", opt.conf);
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Initialize logging
    let log_task = if let Some(log_cfg) = &config.log {
        let logger = Logger::new(log_cfg.clone());
        logger.init_env_logger();
        match logger.start(shutdown_rx).await {
            Ok(task) => Some(task),
            Err(e) => {
                eprintln!("Error opening log file {}: {e}", log_cfg.path);
                std::process::exit(1);
            }
        }
    } else {
        logging::env_builder(logging::LOG_FILTER_ENV).init();
        None
    };

    let balancer = match DnsBalancer::from_config(&config) {
        Ok(balancer) => balancer,
        Err(e) => {
            log::error!("Failed to build balancer: {e}");
            std::process::exit(1);
        }
    };

    log::info!("Enabling interception for '{}'...", balancer.domain());
    balancer.enable();

    let health_check = config.health_check.as_ref().map(|check| {
        let options = HealthCheckOptions::from(check);
        let probe = match options.timeout {
            Some(timeout) => TcpProbe::new().with_connect_timeout(timeout),
            None => TcpProbe::new(),
        };
        balancer.start_health_check_with(probe, options)
    });

    let names = if opt.names.is_empty() {
        vec![config.domain.clone()]
    } else {
        opt.names.clone()
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(opt.interval_ms.max(1)));
    for round in 1..=opt.rounds {
        ticker.tick().await;
        for name in names.iter() {
            match resolver::lookup(name).await {
                Ok(addr) => println!("[{round}] {name} -> {addr}"),
                Err(e) => println!("[{round}] {name} -> {e}"),
            }
        }
    }

    if opt.metrics {
        match TextEncoder::new().encode_to_string(&prometheus::gather()) {
            Ok(text) => print!("{text}"),
            Err(e) => log::error!("Failed to encode metrics: {e}"),
        }
    }

    log::info!("Shutting down...");
    drop(health_check);
    let _ = shutdown_tx.send(true);
    if let Some(task) = log_task {
        let _ = task.await;
    }
}
