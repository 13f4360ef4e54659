//! Flipcore session simulator.
//!
//! Runs a batch of full session lifecycles against the engine and reports
//! the realized return-to-player, so config changes can be sanity-checked
//! against the house edge before going live.

use clap::Parser;
use flipcore::{
    AntiAbuseGuard, AuditStore, ConfigLoader, ConfigRegistry, Currency, EngineError,
    ExpirySweeper, SessionEngine, WalletLedger,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "flipcore", about = "Flip session engine simulator")]
struct Args {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    /// RocksDB directory for the audit store.
    #[arg(long, default_value = "./flipcore_data")]
    db_path: String,

    /// Number of sessions to simulate.
    #[arg(long, default_value_t = 1000)]
    sessions: u32,

    /// Stake per session, in minor units.
    #[arg(long, default_value_t = 100)]
    stake: i64,

    /// Currency to play in.
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Draws attempted per session before cashing out.
    #[arg(long, default_value_t = 5)]
    draws: u32,

    /// Expiry sweep interval in seconds.
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    let store = Arc::new(AuditStore::open(&args.db_path)?);
    let registry = Arc::new(ConfigRegistry::bootstrap(store.clone(), &config)?);
    let ledger = Arc::new(WalletLedger::new(store.clone()));
    let guard = Arc::new(AntiAbuseGuard::new());
    let engine = Arc::new(SessionEngine::new(registry, ledger, guard, store));

    let sweeper = ExpirySweeper::new(
        engine.clone(),
        Duration::from_secs(args.sweep_interval_secs),
    );
    let sweep_handle = sweeper.start();

    // Cashout is gated on a minimum draw count, so never stop short of it.
    let draws_per_session = args.draws.max(config.game.min_draws_before_cashout);

    println!("Flipcore simulator");
    println!("==================");
    println!(
        "sessions: {}, stake: {}, draws per session: {}, currency: {}",
        args.sessions, args.stake, draws_per_session, args.currency
    );

    let started = Instant::now();
    let mut draw_total: u64 = 0;

    for i in 0..args.sessions {
        let player_id = format!("sim-player-{}", i);
        engine.ledger().deposit(
            &player_id,
            &args.currency,
            args.stake,
            &format!("sim-funding-{}", i),
        )?;

        let receipt = engine.start_session(&player_id, args.stake, &args.currency, None)?;

        let mut lost = false;
        for _ in 0..draws_per_session {
            let report = engine.draw(receipt.session_id)?;
            draw_total += 1;
            if report.is_zero {
                lost = true;
                break;
            }
        }

        if !lost {
            match engine.cashout(receipt.session_id) {
                Ok(_) => {}
                Err(EngineError::CashoutBelowMinDraws { .. }) => unreachable!(),
                Err(e) => return Err(e.into()),
            }
        }
    }

    let elapsed = started.elapsed();
    let stats = engine.stats();
    let currency = Currency::from_code(&args.currency);

    println!();
    println!("Results ({:.2}s, {} draws)", elapsed.as_secs_f64(), draw_total);
    println!("------------------------------");
    println!("sessions started:    {}", stats.sessions_started);
    println!("sessions cashed out: {}", stats.sessions_cashed_out);
    println!("sessions lost:       {}", stats.sessions_lost);
    println!("sessions expired:    {}", stats.sessions_expired);
    println!(
        "total staked:        {}",
        currency.format_minor(stats.total_staked_minor)
    );
    println!(
        "total paid out:      {}",
        currency.format_minor(stats.total_paid_out_minor)
    );
    println!("realized RTP:        {:.4}", stats.rtp());
    println!("realized house edge: {:.4}", stats.house_edge());

    sweeper.stop();
    sweep_handle.await?;

    Ok(())
}
