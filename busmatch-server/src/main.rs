//! busmatch: CLI + web server for rider-to-bus matching.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use busmatch_core::config::{self, Config};
use busmatch_core::fix::{parse_fix_line, Fix};
use busmatch_core::geo;
use busmatch_core::scoring;
use busmatch_core::types::LocationRecord;

mod engine;
mod notification;
mod store;
mod web;

use engine::{EngineParams, MatchEngine};
use notification::WebhookDispatcher;
use store::MemoryStore;

#[derive(Parser)]
#[command(name = "busmatch", version, about = "Rider-to-bus matching service")]
struct Cli {
    /// Config file (defaults to ~/.busmatch/config.yaml)
    #[arg(long, global = true, env = "BUSMATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion + state web server
    Serve {
        #[arg(long, env = "BUSMATCH_HOST")]
        host: Option<String>,

        #[arg(long, env = "BUSMATCH_PORT")]
        port: Option<u16>,

        /// Location store backend: memory or sqlite
        #[arg(long, env = "BUSMATCH_STORE")]
        store: Option<String>,

        /// SQLite database path (sqlite backend only)
        #[arg(long, env = "BUSMATCH_DB_PATH")]
        db_path: Option<String>,

        /// Webhook URL notified on rider status transitions
        #[arg(long, env = "BUSMATCH_WEBHOOK")]
        webhook: Option<String>,
    },

    /// Replay recorded fixes through an in-memory engine and print rider states
    Replay {
        /// File of fix lines (`-` for stdin)
        file: PathBuf,
    },

    /// Score a single rider/bus pair
    Score {
        /// Rider fix as lat,lon,speed,heading,ts
        #[arg(long)]
        rider: String,

        /// Bus fix as lat,lon,speed,heading,ts
        #[arg(long)]
        bus: String,
    },

    /// Write the effective config to ~/.busmatch/config.yaml
    InitConfig,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path).unwrap_or_else(|e| {
            error!("cannot read config {}: {e}", path.display());
            std::process::exit(1);
        }),
        None => config::load_config(),
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            store,
            db_path,
            webhook,
        } => {
            let mut config = config;
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            if let Some(s) = store {
                config.store.backend = s;
            }
            if let Some(p) = db_path {
                config.store.path = p;
            }
            if webhook.is_some() {
                config.webhook = webhook;
            }
            cmd_serve(config);
        }
        Commands::Replay { file } => cmd_replay(file, &config),
        Commands::Score { rider, bus } => cmd_score(&rider, &bus, &config),
        Commands::InitConfig => match config::save_config(&config) {
            Ok(path) => println!("Wrote {}", path.display()),
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        },
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            error!("cannot start tokio runtime: {e}");
            std::process::exit(1);
        })
}

fn cmd_serve(config: Config) {
    let backend = match config.store.backend.as_str() {
        "memory" | "sqlite" => config.store.backend.clone(),
        other => {
            warn!("unknown store backend {other:?}, using memory");
            "memory".to_string()
        }
    };

    let store = store::open_store(&backend, &config.store.path).unwrap_or_else(|e| {
        error!("cannot open {backend} store at {}: {e}", config.store.path);
        std::process::exit(1);
    });
    if backend == "sqlite" {
        info!(path = %config.store.path, "using sqlite location store");
    } else {
        info!("using in-memory location store");
    }

    let rt = runtime();
    rt.block_on(async move {
        let webhook = config.webhook.as_deref().map(WebhookDispatcher::new);
        if let Some(url) = &config.webhook {
            info!(%url, "webhook notifications enabled");
        }

        let engine = Arc::new(
            MatchEngine::new(store, EngineParams::from_config(&config)).with_webhook(webhook),
        );

        let params = engine.params();
        info!(
            search_radius_m = params.search_radius_m,
            on_threshold = params.thresholds.on,
            off_threshold = params.thresholds.off,
            "match engine ready"
        );

        if let Some(ttl_s) = config.state.ttl_s {
            spawn_state_sweeper(Arc::clone(&engine), ttl_s);
        }

        let state = Arc::new(web::AppState {
            engine,
            stream_interval: Duration::from_millis(config.stream.interval_ms.max(1)),
        });

        if let Err(e) = web::serve(state, &config.server.host, config.server.port).await {
            error!("server error: {e}");
            std::process::exit(1);
        }
    });
}

/// Periodically evict match states idle for longer than `ttl_s`.
fn spawn_state_sweeper(engine: Arc<MatchEngine>, ttl_s: f64) {
    let period = Duration::from_secs_f64((ttl_s / 2.0).max(1.0));
    info!(ttl_s, "match state eviction enabled");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match engine.prune_states(web::now(), ttl_s).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, remaining = engine.tracked_riders(), "pruned idle match states"),
                Err(e) => warn!(error = %e, "state sweep failed"),
            }
        }
    });
}

fn cmd_replay(file: PathBuf, config: &Config) {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(&file).unwrap_or_else(|e| {
            error!("cannot open {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    let store = Arc::new(MemoryStore::new());
    let engine = MatchEngine::new(store.clone(), EngineParams::from_config(config));
    let rt = runtime();

    let mut riders: Vec<String> = Vec::new();
    let mut fixes = 0u64;
    let mut skipped = 0u64;
    let mut last_ts = 0.0f64;

    rt.block_on(async {
        for (lineno, line) in reader.lines().enumerate() {
            let Ok(line) = line else {
                continue;
            };

            let fix = match parse_fix_line(&line, last_ts) {
                Ok(Some(f)) => f,
                Ok(None) => continue,
                Err(e) => {
                    warn!("line {}: {e}", lineno + 1);
                    skipped += 1;
                    continue;
                }
            };
            fixes += 1;
            last_ts = fix.record().timestamp;

            let result = match fix {
                Fix::Bus(rec) => engine.ingest_bus(rec).await.map(|_| ()),
                Fix::Rider(rec) => {
                    if !riders.contains(&rec.id) {
                        riders.push(rec.id.clone());
                    }
                    let ts = rec.timestamp;
                    engine.ingest_user(rec, ts).await.map(|_| ())
                }
            };
            if let Err(e) = result {
                warn!("line {}: {e}", lineno + 1);
            }
        }

        println!();
        println!("Replay complete: {}", file.display());
        println!("  Fixes: {fixes} applied, {skipped} skipped");
        println!("  Riders: {}", store.rider_count());
        println!("  Buses: {}", store.bus_count());

        if riders.is_empty() {
            return;
        }

        println!();
        let mut table = Table::new();
        table.set_header(vec!["Rider", "Status", "Bus", "Score", "Updated"]);
        for id in &riders {
            let state = engine.state(id).await.unwrap_or_default();
            table.add_row(vec![
                Cell::new(id),
                Cell::new(state.status),
                Cell::new(state.bus_id.as_deref().unwrap_or("-")),
                Cell::new(format!("{:.3}", state.score)),
                Cell::new(format!("{:.1}", state.updated_at)),
            ]);
        }
        println!("{table}");
    });
}

fn parse_pair_fix(id: &str, text: &str) -> Option<LocationRecord> {
    let line = format!("rider,{id},{text}");
    parse_fix_line(&line, 0.0).ok().flatten().map(|f| f.record().clone())
}

fn cmd_score(rider: &str, bus: &str, config: &Config) {
    let (Some(r), Some(b)) = (parse_pair_fix("rider", rider), parse_pair_fix("bus", bus)) else {
        error!("fixes must be lat,lon[,speed[,heading[,ts]]]");
        std::process::exit(1);
    };

    let params = EngineParams::from_config(config);
    let s = scoring::score_with(&params.score, &r, &b);

    let mut table = Table::new();
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec![Cell::new("Distance (m)"), Cell::new(format!("{:.2}", s.distance_m))]);
    table.add_row(vec![
        Cell::new("Bearing rider->bus"),
        Cell::new(format!("{:.1}", geo::bearing(r.lat, r.lon, b.lat, b.lon))),
    ]);
    table.add_row(vec![
        Cell::new("Speed delta"),
        Cell::new(format!("{:.2}", (r.speed - b.speed).abs())),
    ]);
    table.add_row(vec![
        Cell::new("Heading delta"),
        Cell::new(format!("{:.1}", geo::circular_difference(r.heading, b.heading))),
    ]);
    table.add_row(vec![
        Cell::new("Time skew (s)"),
        Cell::new(format!("{:.2}", (r.timestamp - b.timestamp).abs())),
    ]);
    table.add_row(vec![
        Cell::new("Score"),
        Cell::new(if s.is_valid() {
            format!("{:.4}", s.value)
        } else {
            "invalid (stale pair)".to_string()
        }),
    ]);
    table.add_row(vec![
        Cell::new("Within search radius"),
        Cell::new(s.distance_m <= params.search_radius_m),
    ]);

    println!("{table}");
}
