use anyhow::{bail, Result};
use serde_json::json;

use tradedeck::config::Config;
use tradedeck::logging::{log, log_series, obj, v_num, v_str, Domain, Level, ProfileScope};
use tradedeck::runner::StageRunner;
use tradedeck::seeded::mock_quote;
use tradedeck::simulator::StageSimulator;
use tradedeck::stages::{normalize_symbol, Page};

const USAGE: &str = "usage: tradedeck [page] [symbol] [--reset]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    page: Option<Page>,
    symbol: Option<String>,
    reset: bool,
    help: bool,
}

fn parse_args<I>(argv: I) -> Result<Args>
where
    I: IntoIterator<Item = String>,
{
    let mut args = Args::default();
    for arg in argv {
        match arg.as_str() {
            "--reset" => args.reset = true,
            "-h" | "--help" => args.help = true,
            flag if flag.starts_with('-') => bail!("unknown flag '{}'", flag),
            value if args.page.is_none() => args.page = Some(value.parse()?),
            value if args.symbol.is_none() => args.symbol = Some(normalize_symbol(value)),
            extra => bail!("unexpected argument '{}'", extra),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }
    let mut cfg = Config::from_env()?;
    if let Some(page) = args.page {
        cfg.page = page;
    }
    if let Some(symbol) = args.symbol {
        cfg.symbol = symbol;
    }

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("page", v_str(cfg.page.as_str())),
            ("symbol", v_str(&cfg.symbol)),
            ("time_scale", v_num(cfg.time_scale)),
        ]),
    );

    let quote = {
        let _scope = ProfileScope::with_context("mock_quote", &[("symbol", v_str(&cfg.symbol))]);
        mock_quote(&cfg.symbol, cfg.base_price(), cfg.series_params())
    };
    log_series(&quote.symbol, cfg.base_price(), quote.sparkline.len(), &quote.sparkline.fingerprint());
    log(
        Level::Info,
        Domain::Generator,
        "quote",
        obj(&[
            ("symbol", v_str(&quote.symbol)),
            ("price", v_num(quote.price)),
            ("change_pct", v_num(quote.change_pct)),
            ("sparkline", json!(quote.sparkline.points)),
        ]),
    );

    let store = cfg.open_store()?;
    let key = cfg.page.persistence_key(&cfg.symbol);
    let sim = StageSimulator::new(cfg.page.stages(), key, store);
    let mut runner = StageRunner::spawn(sim, cfg.time_scale);
    if args.reset && runner.state().is_complete() {
        runner.reset();
    }

    let mut rx = runner.subscribe();
    let mut last_index = usize::MAX;
    let stages = cfg.page.stages();
    loop {
        let state = rx.borrow_and_update().clone();
        if state.current_stage_index != last_index {
            last_index = state.current_stage_index;
            let stage = stages
                .get(state.current_stage_index)
                .map(|s| s.name.as_str())
                .unwrap_or("done");
            log(
                Level::Info,
                Domain::Stage,
                "progress",
                obj(&[
                    ("page", v_str(cfg.page.as_str())),
                    ("stage", v_str(stage)),
                    ("progress", v_num((state.progress_percent * 10.0).round() / 10.0)),
                ]),
            );
        }
        if state.is_complete() {
            break;
        }
        if !runner.is_active() {
            // A final publish may have landed after the borrow above.
            if rx.borrow().is_complete() {
                continue;
            }
            log(
                Level::Warn,
                Domain::Stage,
                "chain_stopped",
                obj(&[("progress", v_num(state.progress_percent))]),
            );
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }

    runner.shutdown();
    log(Level::Info, Domain::System, "shutdown", obj(&[]));
    Ok(())
}
