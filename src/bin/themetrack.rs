//! themetrack command line
//! 覆盖规则命令行工具
//! 1. normalize：对持仓/选股 CSV 执行系统 + 用户覆盖规则并写出结果
//! 2. check-rules：只解析规则表，报告规则数量与解析错误

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env};
use log::{error, info};

use themetrack::{
    MatcherStrategy, NormalizerConfig, RecordNormalizer, RecordTable, RuleLoader, RuleOrigin,
    ThemeTrackError, TraceSelector, TtResult,
};

#[derive(Parser)]
#[command(
    name = "themetrack",
    version,
    about = "Normalize holdings and picks with system/user override rule tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Apply override rules to a record table.
    Normalize(NormalizeArgs),

    /// Parse rule tables and report rule counts.
    CheckRules(CheckRulesArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum TableKind {
    Holdings,
    Picks,
}

impl TableKind {
    fn name(self) -> &'static str {
        match self {
            TableKind::Holdings => "holdings",
            TableKind::Picks => "picks",
        }
    }
}

#[derive(Parser)]
struct NormalizeArgs {
    /// JSON config file; command line options override its values.
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// System override rule table.
    #[arg(long, value_name = "CSV")]
    system_rules: Option<PathBuf>,

    /// User override rule table.
    #[arg(long, value_name = "CSV")]
    user_rules: Option<PathBuf>,

    /// Record table to normalize.
    #[arg(long, value_name = "CSV")]
    input: PathBuf,

    /// Where to write the normalized table.
    #[arg(long, value_name = "CSV")]
    output: PathBuf,

    /// Which table the input holds (used as rule log context).
    #[arg(long, value_enum, default_value = "holdings")]
    table: TableKind,

    /// Print the rule log of the N-th data row (1-based).
    #[arg(long, value_name = "ROW")]
    rules_log: Option<usize>,

    /// Print the rule log as JSON.
    #[arg(long, requires = "rules_log")]
    rules_log_json: bool,

    /// Evaluate every rule in order instead of using the column index.
    #[arg(long)]
    naive: bool,

    /// Worker threads (0 = all cores).
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Parser)]
struct CheckRulesArgs {
    /// Rule tables to parse.
    #[arg(required = true, value_name = "CSV")]
    files: Vec<PathBuf>,

    /// Parse the files as user rules.
    #[arg(long)]
    user: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG 优先，否则按 -v 次数决定默认级别
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let result = match &cli.command {
        Command::Normalize(args) => run_normalize(args),
        Command::CheckRules(args) => run_check_rules(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(args: &NormalizeArgs) -> TtResult<NormalizerConfig> {
    let mut config = match &args.config {
        Some(path) => NormalizerConfig::from_json_file(path)?,
        None => NormalizerConfig::default(),
    };
    if let Some(path) = &args.system_rules {
        config.system_rules = path.clone();
    }
    if let Some(path) = &args.user_rules {
        config.user_rules = Some(path.clone());
    }
    if args.naive {
        config.strategy = MatcherStrategy::Naive;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(row) = args.rules_log {
        if row == 0 {
            return Err(ThemeTrackError::InvalidInput(
                "--rules-log rows start at 1".to_string(),
            ));
        }
        config.trace = Some(TraceSelector {
            table: args.table.name().to_string(),
            record_index: row - 1,
        });
    }
    config.validate()?;
    Ok(config)
}

fn run_normalize(args: &NormalizeArgs) -> TtResult<ExitCode> {
    let config = build_config(args)?;
    let normalizer = RecordNormalizer::new(config)?;

    let mut table = RecordTable::from_csv_path(&args.input)?;
    let mut trace = normalizer.new_trace();

    let start = Instant::now();
    let summary = normalizer.normalize_table(args.table.name(), &mut table, &mut trace);
    info!(
        "{} records, {} changed, {} system / {} user rule matches in {:?}",
        summary.records,
        summary.changed_records,
        summary.system_matches,
        summary.user_matches,
        start.elapsed()
    );

    table.write_csv_path(&args.output)?;
    println!(
        "Normalized {} {} records ({} changed) -> {}",
        summary.records,
        args.table.name(),
        summary.changed_records,
        args.output.display()
    );

    if args.rules_log.is_some() {
        if args.rules_log_json {
            println!("{}", trace.to_json()?);
        } else {
            for entry in trace.entries() {
                println!("{}", entry);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_check_rules(args: &CheckRulesArgs) -> TtResult<ExitCode> {
    let origin = if args.user {
        RuleOrigin::User
    } else {
        RuleOrigin::System
    };

    let mut failed = 0usize;
    for file in &args.files {
        match RuleLoader::load(file, origin) {
            Ok(rules) => println!("{}: {} rules", file.display(), rules.len()),
            Err(e) => {
                error!("Failed to parse {}", file.display());
                eprintln!("{}", e);
                failed += 1;
            }
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
