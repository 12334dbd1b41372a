//! colstress - workload-centric load generator for wide-column clusters.
//!
//! Subcommands:
//! - `run <workload> [flags]` - drive a cluster with a workload profile
//! - `info <workload>`        - describe a profile and its tunables
//! - `list`                   - list available profiles
//! - `fields`                 - list field value generators
//! - `server [-p port]`       - start the remote-control server

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use colstress::config::{ConfigError, PopulateOption, RunConfig, parse_count, parse_duration};
use colstress::driver::mock::{MockConfig, MockSession};
use colstress::driver::{Consistency, Session};
use colstress::engine::{self, EngineOptions, FinalStatus, StopReason};
use colstress::generator::{KeyDistribution, field_catalog};
use colstress::metrics::TimerSnapshot;
use colstress::server::{ControlServer, SessionFactory, StressTestManager};
use colstress::workload;

/// Workload-centric load generator for wide-column clusters.
#[derive(Parser)]
#[command(name = "colstress", about = "Wide-column cluster load generator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workload against the cluster.
    Run(RunArgs),
    /// Describe a workload: schema, defaults, tunable parameters.
    Info {
        /// Workload name (see `list`).
        workload: String,
    },
    /// List available workload profiles.
    List,
    /// List available field value generators.
    Fields,
    /// Start the remote-control server.
    Server {
        /// Listen port.
        #[arg(short = 'p', long, default_value_t = 9044)]
        port: u16,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Workload name (see `list`).
    workload: String,

    /// Contact point.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Native protocol port.
    #[arg(long, default_value_t = 9042)]
    cql_port: u16,

    /// Username.
    #[arg(short = 'U', long)]
    username: Option<String>,

    /// Password.
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Run duration, e.g. `45s`, `1h30m`, `1d2h3m`. Units d/h/m/s in any
    /// order; repeated units are summed.
    #[arg(short = 'd', long, value_parser = parse_duration_flag, conflicts_with = "iterations")]
    duration: Option<u64>,

    /// Operation count; accepts k/m/b suffixes (e.g. `500k`).
    #[arg(short = 'i', long, value_parser = parse_count_flag)]
    iterations: Option<u64>,

    /// Worker thread count.
    #[arg(short = 't', long, default_value_t = 4)]
    threads: usize,

    /// Target ops/second; 0 means unlimited.
    #[arg(short = 'r', long, default_value_t = 0)]
    rate: u64,

    /// Partition key space size.
    #[arg(short = 'p', long = "partitions", value_parser = parse_count_flag, default_value = "1m")]
    partitions: u64,

    /// Partition key distribution: random, sequence or normal.
    #[arg(long, value_parser = parse_distribution_flag, default_value = "random")]
    partition_generator: KeyDistribution,

    /// Fraction of reads in [0, 1]. Defaults to the workload's suggestion.
    #[arg(long)]
    read_rate: Option<f64>,

    /// Fraction of deletes in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    delete_rate: f64,

    /// Per-thread in-flight cap.
    #[arg(long, default_value_t = 128)]
    queue_depth: usize,

    /// Populate policy: `standard`, `none`, or `<rows>[,<deletes>]`
    /// (e.g. `500k` or `500k,false`).
    #[arg(long, default_value = "standard")]
    populate: String,

    /// Field generator override, `<table>.<column>=<fn>(args)`. Repeatable.
    #[arg(long = "field", value_name = "OVERRIDE")]
    fields: Vec<String>,

    /// Workload parameter, `<name>=<value>`. Repeatable; also accepted as
    /// `--workload.<name>=<value>`.
    #[arg(long = "workload-param", value_name = "NAME=VALUE")]
    workload_params: Vec<String>,

    /// Consistency level.
    #[arg(long = "cl", value_parser = parse_consistency_flag, default_value = "LOCAL_QUORUM")]
    consistency: Consistency,

    /// Serial consistency level.
    #[arg(long = "serial-cl", value_parser = parse_consistency_flag, default_value = "LOCAL_SERIAL")]
    serial_consistency: Consistency,

    /// Read latency SLO in milliseconds; breaching it fails the run.
    #[arg(long)]
    max_read_latency: Option<f64>,

    /// Write latency SLO in milliseconds; breaching it fails the run.
    #[arg(long)]
    max_write_latency: Option<f64>,

    /// Page size for reads.
    #[arg(long)]
    paging: Option<u32>,

    /// Walk every result page of a read.
    #[arg(long)]
    paginate: bool,

    /// Pin all requests to one endpoint.
    #[arg(long)]
    coordinator_only: bool,

    /// Row TTL in seconds (DDL only).
    #[arg(long)]
    ttl: Option<u64>,

    /// Compaction shortcut (`stcs,4,32`, `lcs`, ...) or raw map literal.
    #[arg(long)]
    compaction: Option<String>,

    /// Compression map literal (DDL only).
    #[arg(long)]
    compression: Option<String>,

    /// Replication map literal (DDL only).
    #[arg(long)]
    replication: Option<String>,

    /// Raw event log target: a file path or a directory.
    #[arg(long)]
    raw_log: Option<String>,

    /// Prometheus exporter port; 0 disables.
    #[arg(long, default_value_t = 0)]
    prometheus_port: u16,
}

fn parse_duration_flag(s: &str) -> Result<u64, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn parse_count_flag(s: &str) -> Result<u64, String> {
    parse_count(s)
}

fn parse_distribution_flag(s: &str) -> Result<KeyDistribution, String> {
    s.parse()
}

fn parse_consistency_flag(s: &str) -> Result<Consistency, String> {
    s.parse()
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("colstress={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Rewrites `--workload.<name>=<value>` into `--workload-param` pairs so
/// clap can handle the dynamic parameter syntax.
fn normalize_args() -> Vec<String> {
    std::env::args()
        .map(|arg| {
            arg.strip_prefix("--workload.")
                .map(|rest| format!("--workload-param={}", rest))
                .unwrap_or(arg)
        })
        .collect()
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn build_config(args: &RunArgs) -> Result<RunConfig, ConfigError> {
    let populate = PopulateOption::parse(&args.populate)?;

    let mut config = RunConfig {
        workload: args.workload.clone(),
        iterations: args.iterations,
        duration_secs: args.duration,
        rate: args.rate,
        threads: args.threads,
        partition_count: args.partitions,
        partition_key_generator: args.partition_generator,
        read_rate: args.read_rate,
        delete_rate: args.delete_rate,
        queue_depth: args.queue_depth,
        populate,
        consistency_level: args.consistency,
        serial_consistency_level: args.serial_consistency,
        max_read_latency_ms: args.max_read_latency,
        max_write_latency_ms: args.max_write_latency,
        paging: args.paging,
        paginate: args.paginate,
        coordinator_only_mode: args.coordinator_only,
        ttl: args.ttl,
        compaction: args.compaction.clone(),
        compression: args.compression.clone(),
        replication: args.replication.clone(),
        host: args.host.clone(),
        cql_port: args.cql_port,
        username: args.username.clone(),
        password: args.password.clone(),
        raw_log: args.raw_log.clone(),
        prometheus_port: args.prometheus_port,
        ..RunConfig::default()
    };

    for override_arg in &args.fields {
        let (target, generator) =
            override_arg
                .split_once('=')
                .ok_or_else(|| ConfigError::Parse {
                    option: "field".to_string(),
                    message: format!("expected <table>.<column>=<fn>(args), got '{}'", override_arg),
                })?;
        config
            .fields
            .insert(target.to_string(), generator.to_string());
    }

    for param in &args.workload_params {
        let (name, value) = param.split_once('=').ok_or_else(|| ConfigError::Parse {
            option: "workload-param".to_string(),
            message: format!("expected <name>=<value>, got '{}'", param),
        })?;
        config
            .workload_parameters
            .insert(name.to_string(), value.to_string());
    }

    config.validate()?;
    Ok(config)
}

/// Session factory seam. The cluster client is an external collaborator;
/// without one linked, runs use the in-process mock driver.
fn session_factory() -> SessionFactory {
    Arc::new(|config: &RunConfig| {
        info!(
            "connecting to {}:{} (in-process mock driver)",
            config.host, config.cql_port
        );
        Ok(Arc::new(MockSession::connect(MockConfig::default())) as Arc<dyn Session>)
    })
}

fn print_timer(name: &str, snapshot: &TimerSnapshot) {
    if snapshot.rates.count == 0 {
        return;
    }
    println!(
        "  {:<10} count={:<10} rate={:>10.1}/s  p50={:.0}us p95={:.0}us p99={:.0}us max={:.0}us",
        name,
        snapshot.rates.count,
        snapshot.rates.mean_rate,
        snapshot.latency.median_us,
        snapshot.latency.p95_us,
        snapshot.latency.p99_us,
        snapshot.latency.max_us,
    );
}

fn cmd_run(args: &RunArgs) -> i32 {
    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => fail(&e.to_string()),
    };

    if config.prometheus_port != 0 {
        warn!("prometheus exporter is not linked into this build; ignoring --prometheus-port");
    }

    let session = match (session_factory())(&config) {
        Ok(session) => session,
        Err(e) => fail(&e.to_string()),
    };

    let options = EngineOptions {
        progress_interval: Some(Duration::from_secs(1)),
    };
    let run = match engine::prepare_run(config, session, options) {
        Ok(run) => run,
        Err(e) => fail(&e.to_string()),
    };

    let coordinator = run.coordinator();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        coordinator.signal(StopReason::ExternalStop);
    }) {
        warn!("failed to set Ctrl-C handler: {}", e);
    }

    let outcome = match run.execute() {
        Ok(outcome) => outcome,
        Err(e) => fail(&e.to_string()),
    };

    println!();
    println!("Run {} in {:.2?}", outcome.status, outcome.elapsed);
    if outcome.populate_ops > 0 {
        println!("  populate   {} operations (reset before measurement)", outcome.populate_ops);
    }
    print_timer("selects", &outcome.metrics.selects);
    print_timer("mutations", &outcome.metrics.mutations);
    print_timer("deletions", &outcome.metrics.deletions);
    print_timer("populate", &outcome.metrics.populate);
    println!("  errors     count={}", outcome.metrics.errors.count);

    match outcome.status {
        FinalStatus::Completed | FinalStatus::Stopped => 0,
        FinalStatus::Failed(_) => 1,
    }
}

fn cmd_info(name: &str) -> i32 {
    let Some(entry) = workload::find(name) else {
        fail(&format!("unknown workload '{}'", name));
    };
    let instance = entry.instantiate();

    println!("{} ({})", entry.name, entry.type_name);
    println!("  {}", entry.description);
    println!("  default read rate: {}", instance.default_read_rate());
    if let Some(version) = entry.gates.minimum_version {
        println!("  minimum version: {}", version);
    }
    println!("Schema:");
    for ddl in instance.schema() {
        println!("  {};", ddl);
    }
    let parameters = instance.parameters();
    if parameters.is_empty() {
        println!("No tunable parameters.");
    } else {
        println!("Parameters (set with --workload.<name>=<value>):");
        for descriptor in parameters {
            println!("  {:<12} {}", descriptor.name, descriptor.description);
        }
    }
    0
}

fn cmd_list() -> i32 {
    for entry in workload::list() {
        println!("{:<24} {}", entry.name, entry.description);
    }
    0
}

fn cmd_fields() -> i32 {
    for descriptor in field_catalog() {
        println!("{:<12} {}", descriptor.name, descriptor.description);
    }
    0
}

fn cmd_server(port: u16) -> i32 {
    let options = EngineOptions {
        progress_interval: Some(Duration::from_secs(1)),
    };
    let manager = Arc::new(StressTestManager::new(session_factory(), options));
    match ControlServer::bind(port, manager) {
        Ok(server) => {
            server.serve();
            0
        }
        Err(e) => fail(&format!("failed to bind control server: {}", e)),
    }
}

fn main() {
    let cli = Cli::parse_from(normalize_args());
    init_logging(cli.verbose, cli.quiet);

    let code = match &cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Info { workload } => cmd_info(workload),
        Command::List => cmd_list(),
        Command::Fields => cmd_fields(),
        Command::Server { port } => cmd_server(*port),
    };
    std::process::exit(code);
}
