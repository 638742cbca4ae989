use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use candle_sync::{
    Reconciler, ReconcileRequest, SeriesHandle,
    config::{SyncConfig, load_config_path},
    providers::ConfiguredSource,
    store::{SortOrder, sqlite::SqliteConnector},
    tz::{ms_to_rfc3339, parse_cli_time},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use shared_utils::env::get_env_var_opt;
use tracing_subscriber::EnvFilter;

/// Config file used when `--config` is absent.
const CONFIG_ENV: &str = "CANDLE_SYNC_CONFIG";

#[derive(Parser)]
#[command(version, about = "Candle ingestion and reconciliation CLI")]
struct Cli {
    /// TOML configuration file, else `CANDLE_SYNC_CONFIG`. Defaults apply when neither is set.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database; overrides the config file and DATABASE_URL.
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,

    /// IANA time zone for naive --start/--end values.
    #[arg(long, global = true, default_value = "UTC")]
    tz: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct SeriesArgs {
    /// Instrument symbol, e.g. BTCUSDT.
    #[arg(long)]
    symbol: String,
    /// Interval such as 1m, 4h, 1d, 1w.
    #[arg(long)]
    interval: String,
}

#[derive(Args)]
struct RangeArgs {
    #[command(flatten)]
    series: SeriesArgs,
    /// Range start (RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`).
    #[arg(long)]
    start: String,
    /// Range end, inclusive.
    #[arg(long)]
    end: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Order {
    Asc,
    Desc,
}

impl From<Order> for SortOrder {
    fn from(o: Order) -> Self {
        match o {
            Order::Asc => SortOrder::Ascending,
            Order::Desc => SortOrder::Descending,
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Fill every gap in the range from the upstream.
    Reconcile {
        #[command(flatten)]
        range: RangeArgs,
        /// Print the reconciled rows to stdout in this order.
        #[arg(long, value_enum)]
        print: Option<Order>,
    },
    /// List missing ranges without fetching.
    Gaps {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Drop the table of a (symbol, interval) pair.
    Reset {
        #[command(flatten)]
        series: SeriesArgs,
        /// Confirm the table drop.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_request(range: &RangeArgs, tz: &str) -> Result<ReconcileRequest> {
    let start = parse_cli_time(&range.start, tz).context("parsing --start")?;
    let end = parse_cli_time(&range.end, tz).context("parsing --end")?;
    Ok(ReconcileRequest::new(
        &range.series.symbol,
        &range.series.interval,
        start,
        end,
    ))
}

fn print_report(handle: &SeriesHandle) {
    let r = &handle.range;
    let s = &handle.summary;
    println!("table\t{}", r.table);
    println!("range\t{}\t{}", ms_to_rfc3339(r.start), ms_to_rfc3339(r.end));
    println!("gaps_found\t{}", handle.gaps.len());
    println!("windows\t{}\trounds\t{}", s.windows, s.rounds);
    println!(
        "fetched\t{}\trounded\t{}\tsynthesized\t{}",
        s.fetched, s.rounded, s.synthesized
    );
    println!("written\t{}", handle.written.count);
    println!("timeouts\t{}\tdropped\t{}", s.timeouts, s.dropped);
    for g in &handle.unresolved {
        println!("unresolved\t{}\t{}", ms_to_rfc3339(g.start), ms_to_rfc3339(g.end));
    }
    if let Some(rows) = &handle.candles {
        for c in rows {
            match &c.bar {
                Some(b) => println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    ms_to_rfc3339(c.open_time),
                    b.open,
                    b.high,
                    b.low,
                    b.close,
                    b.volume
                ),
                None => println!("{}\tplaceholder", ms_to_rfc3339(c.open_time)),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| get_env_var_opt(CONFIG_ENV).map(PathBuf::from));
    let mut cfg = match &config_path {
        Some(path) => load_config_path(path)?,
        None => SyncConfig::default(),
    };
    if let Some(url) = cli.database_url.clone() {
        cfg.store.database_url = Some(url);
    }
    let database_url = cfg
        .store
        .resolve_database_url()
        .context("resolving database location")?;

    let reconciler = Reconciler::from_config(
        SqliteConnector::new(database_url),
        ConfiguredSource::new(cfg.upstream.clone()),
        &cfg,
    );

    match cli.cmd {
        Cmd::Reconcile { range, print } => {
            let mut req = build_request(&range, &cli.tz)?;
            if let Some(order) = print {
                req = req.read_back(order.into());
            }
            let handle = reconciler.reconcile(&req).await?;
            print_report(&handle);
            if !handle.is_complete() {
                bail!("{} gap(s) remain in {}", handle.unresolved.len(), handle.range.table);
            }
        }
        Cmd::Gaps { range } => {
            let req = build_request(&range, &cli.tz)?;
            let (validated, gaps) = reconciler.find_gaps(&req).await?;
            println!("table\t{}", validated.table);
            for g in &gaps {
                println!(
                    "{}\t{}\t{}",
                    ms_to_rfc3339(g.start),
                    ms_to_rfc3339(g.end),
                    g.slots(validated.grid.step())
                );
            }
        }
        Cmd::Reset { series, yes } => {
            if !yes {
                bail!("refusing to drop the table without --yes");
            }
            let existed = reconciler.reset(&series.symbol, &series.interval)?;
            println!("{}", if existed { "dropped" } else { "absent" });
        }
    }

    Ok(())
}
