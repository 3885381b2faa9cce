use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use frontier_var::analysis::Position;
use frontier_var::config::{self, DEFAULT_WINDOW, ProviderSettings};
use frontier_var::data::{PriceProvider, StaticProvider, YahooProvider, normalize_symbol};
use frontier_var::{
    AnalysisConfig, AnalysisEngine, AnalysisRequest, CancellationToken, RiskReportRequest,
    SortKey, report, webui,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortChoice {
    /// Value-at-Risk as a percentage
    Var,
    /// Value-at-Risk in currency
    VarAmount,
}

impl From<SortChoice> for SortKey {
    fn from(value: SortChoice) -> Self {
        match value {
            SortChoice::Var => SortKey::ValueAtRisk,
            SortChoice::VarAmount => SortKey::ValueAtRiskAmount,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Frontier-VaR: rank discrete portfolio allocations by Value-at-Risk",
    after_help = "EXAMPLES:
    # Rank every 5% allocation of three assets
    cargo run --release -- --portfolio PETR4,VALE3,ITUB4 --date 28/06/2024

    # Include projected terminal wealth and locate the current portfolio
    cargo run --release -- --portfolio PETR4,VALE3 --wealth --current 30,70

    # Single-asset risk against the benchmark
    cargo run --release -- --risk PETR4:10000,VALE3:5000

    # Serve the JSON API
    cargo run --release -- --webui --webui-port 8080"
)]
struct Args {
    /// Rank allocations of comma-separated symbols (e.g. PETR4,VALE3,ITUB4)
    #[arg(long)]
    portfolio: Option<String>,

    /// Single-asset risk report for SYMBOL:AMOUNT pairs (e.g. PETR4:10000,VALE3:5000)
    #[arg(long)]
    risk: Option<String>,

    /// Reference date, dd/mm/yyyy or yyyy-mm-dd (default: today)
    #[arg(long)]
    date: Option<String>,

    /// Number of sessions per asset
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    window: usize,

    /// Weight grid step, in percent
    #[arg(long, default_value_t = config::DEFAULT_STEP_SIZE * 100.0)]
    step: f64,

    /// Total contribution
    #[arg(long, default_value_t = config::DEFAULT_TOTAL_CONTRIBUTION)]
    total: f64,

    /// Monthly contribution used by the wealth projection
    #[arg(long, default_value_t = config::DEFAULT_MONTHLY_CONTRIBUTION)]
    monthly: f64,

    /// z-score for parametric VaR
    #[arg(long, default_value_t = config::DEFAULT_CONFIDENCE_MULTIPLIER)]
    confidence: f64,

    /// Column to rank by
    #[arg(long, value_enum, default_value_t = SortChoice::Var)]
    sort: SortChoice,

    /// Project terminal wealth under monthly contributions
    #[arg(long)]
    wealth: bool,

    /// Current portfolio weights in percent, in --portfolio order (e.g. 30,70)
    #[arg(long)]
    current: Option<String>,

    /// Benchmark for --risk (default: FRONTIER_BENCHMARK or ^BVSP)
    #[arg(long)]
    benchmark: Option<String>,

    /// Rows of the ranked table to print
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Use synthetic prices instead of Yahoo Finance
    #[arg(long)]
    mock: bool,

    /// Launch the JSON API server
    #[arg(long)]
    webui: bool,

    /// WebUI server port
    #[arg(long, default_value_t = 8080)]
    webui_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("frontier_var=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    let settings = ProviderSettings::from_env();
    let reference_date = match &args.date {
        Some(raw) => parse_date(raw)?,
        None => chrono::Local::now().date_naive(),
    };

    if args.mock {
        let mut symbols = Vec::new();
        if let Some(list) = &args.portfolio {
            symbols.extend(split_list(list));
        }
        if let Some(list) = &args.risk {
            symbols.extend(parse_positions(list)?.into_iter().map(|p| p.symbol));
        }
        symbols.extend(args.benchmark.clone());
        let mut normalized: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s, &settings.market_suffix))
            .collect();
        normalized.push(settings.benchmark_symbol.clone());
        info!("Using synthetic prices for {:?}", normalized);
        let provider = StaticProvider::with_mock(&normalized, reference_date, args.window + 20);
        run(AnalysisEngine::new(provider, settings), &args, reference_date).await
    } else {
        let provider = YahooProvider::new(&settings);
        run(AnalysisEngine::new(provider, settings), &args, reference_date).await
    }
}

async fn run<P: PriceProvider + 'static>(
    engine: AnalysisEngine<P>,
    args: &Args,
    reference_date: NaiveDate,
) -> Result<()> {
    if args.webui {
        return webui::run_webui_server(args.webui_port, engine).await;
    }

    if let Some(list) = &args.portfolio {
        let request = match allocation_request(args, list, reference_date) {
            Ok(request) => request,
            Err(e) => {
                error!("{:#}", e);
                return Ok(());
            }
        };
        match engine.run_allocation(request, CancellationToken::new()).await {
            Ok(response) => {
                report::print_allocation(&response, args.top);
                info!("Allocation analysis completed.");
            }
            Err(e) => error!("Allocation analysis failed: {}", e),
        }
        return Ok(());
    }

    if let Some(list) = &args.risk {
        let positions = match parse_positions(list) {
            Ok(positions) => positions,
            Err(e) => {
                error!("{:#}", e);
                return Ok(());
            }
        };
        let request = RiskReportRequest {
            positions,
            reference_date,
            window: args.window,
            benchmark: args.benchmark.clone(),
            confidence_multiplier: args.confidence,
        };
        match engine.run_risk_report(request).await {
            Ok(risk) => {
                report::print_risk_report(&risk);
                info!("Risk report completed.");
            }
            Err(e) => error!("Risk report failed: {}", e),
        }
        return Ok(());
    }

    error!("Nothing to do: pass --portfolio, --risk or --webui (see --help)");
    Ok(())
}

fn allocation_request(args: &Args, list: &str, reference_date: NaiveDate) -> Result<AnalysisRequest> {
    let symbols = split_list(list);
    if symbols.is_empty() {
        bail!("--portfolio needs at least one symbol, e.g. --portfolio PETR4,VALE3");
    }
    let current_weights = args
        .current
        .as_deref()
        .map(parse_percentages)
        .transpose()?;

    Ok(AnalysisRequest {
        symbols,
        reference_date,
        window: args.window,
        current_weights,
        config: AnalysisConfig {
            step_size: args.step / 100.0,
            confidence_multiplier: args.confidence,
            total_contribution: args.total,
            monthly_contribution: args.monthly,
            sort_key: args.sort.into(),
            include_wealth_projection: args.wealth,
            ..AnalysisConfig::default()
        },
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Accepts `dd/mm/yyyy` or ISO `yyyy-mm-dd`.
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .with_context(|| format!("invalid date '{}': expected dd/mm/yyyy or yyyy-mm-dd", raw))
}

/// `30,70` -> `[0.3, 0.7]`
fn parse_percentages(raw: &str) -> Result<Vec<f64>> {
    split_list(raw)
        .iter()
        .map(|p| {
            p.trim_end_matches('%')
                .parse::<f64>()
                .map(|v| v / 100.0)
                .with_context(|| format!("invalid weight '{}'", p))
        })
        .collect()
}

/// `PETR4:10000,VALE3:5000`
fn parse_positions(raw: &str) -> Result<Vec<Position>> {
    split_list(raw)
        .iter()
        .map(|entry| {
            let (symbol, amount) = entry
                .split_once(':')
                .ok_or_else(|| anyhow!("expected SYMBOL:AMOUNT, got '{}'", entry))?;
            let contribution = amount
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid amount for {}", symbol.trim()))?;
            Ok(Position {
                symbol: symbol.trim().to_string(),
                contribution,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
        assert_eq!(parse_date("28/06/2024").unwrap(), expected);
        assert_eq!(parse_date(" 2024-06-28 ").unwrap(), expected);
        assert!(parse_date("06/28/2024").is_err());
    }

    #[test]
    fn test_parse_percentages() {
        let w = parse_percentages("30, 70%").unwrap();
        assert!((w[0] - 0.3).abs() < 1e-12);
        assert!((w[1] - 0.7).abs() < 1e-12);
        assert!(parse_percentages("30,abc").is_err());
    }

    #[test]
    fn test_parse_positions() {
        let positions = parse_positions("PETR4:10000, vale3 : 5000.5").unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[1].symbol, "vale3");
        assert_eq!(positions[1].contribution, 5000.5);
        assert!(parse_positions("PETR4").is_err());
    }

    #[test]
    fn test_args_map_to_config() {
        let args = Args::parse_from([
            "frontier-var",
            "--portfolio",
            "PETR4,VALE3",
            "--step",
            "10",
            "--sort",
            "var-amount",
            "--current",
            "30,70",
        ]);
        let date = NaiveDate::from_ymd_opt(2024, 6, 28).unwrap();
        let request = allocation_request(&args, "PETR4,VALE3", date).unwrap();
        assert_eq!(request.symbols, vec!["PETR4", "VALE3"]);
        assert!((request.config.step_size - 0.1).abs() < 1e-12);
        assert_eq!(request.config.sort_key, SortKey::ValueAtRiskAmount);
        assert_eq!(request.current_weights.unwrap().len(), 2);
    }
}
