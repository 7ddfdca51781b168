use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use mt5_tester::settings::Settings;
use mt5_tester::{ReportFile, ReportFiles, RunMode, RunSummary, tester_ini, tester_set};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run MetaTrader 5 backtests and optimizations")]
struct Args {
    #[arg(long)]
    settings: PathBuf,
    #[arg(long, default_value = mt5_tester::DEFAULT_ALIAS)]
    alias: String,
    #[arg(long, default_value = "info")]
    log_level: String,
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Single backtest with the configured parameter values.
    Run,
    /// Sweep every parameter that declares `interval` and `max`.
    Optimize,
    /// Print the generated .ini and .set files without starting the terminal.
    Render {
        #[arg(long, value_enum, default_value_t = ModeArg::Backtest)]
        mode: ModeArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Backtest,
    Optimization,
}

impl From<ModeArg> for RunMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Backtest => RunMode::Backtest,
            ModeArg::Optimization => RunMode::Optimization,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    let filter = std::env::var("MT5_TESTER_LOG").unwrap_or_else(|_| log_level.to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter).context("invalid log filter")?;
    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(env_filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
    Ok(())
}

fn print_summary(summary: &RunSummary<ReportFile>) {
    println!("outcome={:?}", summary.outcome);
    println!("config={}", summary.config_file.display());
    println!("parameters={}", summary.parameter_file.display());
    match &summary.report {
        Some(report) => println!("report={}", report.path.display()),
        None => println!("report=-"),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    let settings = Settings::load(&args.settings)?;
    let bt = &settings.backtest;

    let mode = match args.command {
        Cmd::Run => RunMode::Backtest,
        Cmd::Optimize => RunMode::Optimization,
        Cmd::Render { mode } => {
            let mode = RunMode::from(mode);
            println!("; {}", tester_ini::config_file_path(Path::new("<data_dir>"), bt.ea_name()).display());
            print!("{}", tester_ini::render_run_config(bt, mode));
            println!();
            println!("; {}", tester_set::parameter_file_path(Path::new("<data_dir>"), bt.ea_name()).display());
            print!("{}", tester_set::render_parameters(&bt.params, mode)?);
            return Ok(());
        }
    };

    let registry = settings.registry()?;
    if !registry.contains(&args.alias) {
        bail!("alias {} is not listed in {}", args.alias, args.settings.display());
    }

    info!(ea = bt.ea_name(), alias = %args.alias, ?mode, "starting tester");
    let summary = match mode {
        RunMode::Backtest => bt.run(&registry, &args.alias, &ReportFiles),
        RunMode::Optimization => bt.optimize(&registry, &args.alias, &ReportFiles),
    }
    .with_context(|| format!("tester run for {} failed", bt.ea_name()))?;

    print_summary(&summary);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cmd {
        let argv = ["mt5_tester", "--settings", "s.json"].iter().chain(args);
        Args::try_parse_from(argv).expect("parse args").command
    }

    #[test]
    fn each_subcommand_selects_its_mode() {
        assert!(matches!(parse(&["run"]), Cmd::Run));
        assert!(matches!(parse(&["optimize"]), Cmd::Optimize));
        assert!(matches!(
            parse(&["render"]),
            Cmd::Render { mode: ModeArg::Backtest }
        ));
        match parse(&["render", "--mode", "optimization"]) {
            Cmd::Render { mode } => assert_eq!(RunMode::from(mode), RunMode::Optimization),
            other => panic!("expected render, got {other:?}"),
        }
    }
}
