//! idtrace - IDOR candidate detection CLI

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing_subscriber::EnvFilter;

use idtrace::analysis::auth::{cross_user_tokens, detect_cross_user_access, CrossUserAccess};
use idtrace::analysis::chain::DEFAULT_MAX_DEPTH;
use idtrace::analysis::lifeline::{self, Lifeline, LifelineSort};
use idtrace::analysis::{rank, ChainAnalyzer, ChainOptions, RiskLevel, RiskScore};
use idtrace::config::{self, TrackerConfig};
use idtrace::proxy::{har, InterceptProxy};
use idtrace::report::{self, diff, Report};
use idtrace::tracker::IdLedger;

/// idtrace - finds identifiers clients use without the server ever issuing them
#[derive(Parser)]
#[command(name = "idtrace", version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the intercept proxy and track identifiers until Ctrl+C
    Proxy {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Report output path
        #[arg(short, long)]
        output: Option<String>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Numeric IDs below this value are ignored
        #[arg(long)]
        min_numeric: Option<u64>,

        /// Only track these hosts (comma-separated, '*.example.com' allowed)
        #[arg(short, long, value_delimiter = ',')]
        domains: Option<Vec<String>>,
    },

    /// Build a report from a HAR archive
    ImportHar {
        /// HAR file exported from a browser or proxy
        input: PathBuf,

        /// Report output path
        #[arg(short, long)]
        output: Option<String>,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Numeric IDs below this value are ignored
        #[arg(long)]
        min_numeric: Option<u64>,

        /// Only track these hosts (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        domains: Option<Vec<String>>,
    },

    /// Show the counts and candidates of a report
    Summary {
        /// Report JSON file
        report: PathBuf,
    },

    /// Rank IDOR candidates by risk
    Score {
        /// Report JSON file
        report: PathBuf,

        /// Show only the N highest-scoring candidates
        #[arg(long)]
        top: Option<usize>,

        /// Exit with code 1 if a candidate reaches this level (critical, high, medium, low)
        #[arg(long)]
        fail_on: Option<String>,
    },

    /// Show request dependency chains
    Chain {
        /// Report JSON file
        report: PathBuf,

        /// Show only the N best chains
        #[arg(long)]
        top: Option<usize>,

        /// Minimum chain depth
        #[arg(long, default_value_t = 1)]
        min_depth: usize,

        /// Maximum traversal depth
        #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
        max_depth: usize,

        /// Only include flows on these hosts (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        domains: Option<Vec<String>>,
    },

    /// Show how long each identifier lives across the flow sequence
    Lifeline {
        /// Report JSON file
        report: PathBuf,

        /// Only show identifiers sent in at least this many requests
        #[arg(short, long, default_value_t = 1)]
        min_uses: usize,

        /// Sort order (lifespan, uses, first)
        #[arg(short, long, default_value = "lifespan")]
        sort: LifelineSort,

        /// Maximum number of identifiers shown
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Find identifiers accessed under more than one credential
    Auth {
        /// Report JSON file
        report: PathBuf,
    },

    /// Compare two reports
    Diff {
        /// Baseline report
        before: PathBuf,

        /// Newer report
        after: PathBuf,

        /// Write the diff as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export a report to another format
    Export {
        /// Report JSON file
        report: PathBuf,

        /// Output format (csv, sarif, har, flows-csv)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a commented configuration template
    Init {
        /// Destination path
        #[arg(default_value = "idtrace.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Check a configuration file for errors
    Validate {
        /// Configuration file
        path: PathBuf,
    },

    /// Print one configuration value (dotted keys such as patterns.uuid)
    Get {
        key: String,

        /// Configuration file (default: discovered in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Set one value in a YAML configuration file (lists are comma-separated)
    Set {
        key: String,

        value: String,

        /// Configuration file (default: discovered in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration
    Show {
        /// Configuration file (default: discovered in the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "idtrace=debug" } else { "idtrace=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════╗
    ║  IDTRACE v0.1.0                       ║
    ║  Passive IDOR candidate detection     ║
    ╚═══════════════════════════════════════╝
    "#;
    println!("{}", banner.cyan());
}

fn parse_level(value: &str) -> Option<RiskLevel> {
    match value.to_lowercase().as_str() {
        "critical" => Some(RiskLevel::Critical),
        "high" => Some(RiskLevel::High),
        "medium" => Some(RiskLevel::Medium),
        "low" => Some(RiskLevel::Low),
        _ => None,
    }
}

fn tracker_config(
    config_path: Option<&Path>,
    output: Option<String>,
    min_numeric: Option<u64>,
    domains: Option<Vec<String>>,
) -> idtrace::error::Result<TrackerConfig> {
    let mut tracker = config::load_config(config_path)?;
    config::merge_cli_args(&mut tracker, output, min_numeric, domains);
    Ok(tracker)
}

fn print_report_summary(report: &Report) {
    println!("\n{}", "  Tracking Summary".bold());
    println!("  {}", "─".repeat(35));

    let mut builder = Builder::default();
    builder.push_record(["Metric", "Count"]);
    builder.push_record([
        "Unique IDs".to_string(),
        report.summary.total_unique_ids.to_string(),
    ]);
    builder.push_record([
        "IDs with origin".to_string(),
        report.summary.ids_with_origin.to_string(),
    ]);
    builder.push_record([
        "IDs with usage".to_string(),
        report.summary.ids_with_usage.to_string(),
    ]);
    builder.push_record(["Flows".to_string(), report.summary.total_flows.to_string()]);

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    let count = report.potential_idor.len();
    if count == 0 {
        println!("\n  {}", "No potential IDOR candidates.".green());
        return;
    }

    println!(
        "\n  {} {}",
        format!("{count}").red().bold(),
        "potential IDOR candidate(s):".bold()
    );
    for candidate in &report.potential_idor {
        let first = candidate
            .usages
            .first()
            .map(|u| format!("{} {}", u.method, u.url))
            .unwrap_or_default();
        println!(
            "    {} {} {}",
            candidate.id_value.yellow().bold(),
            format!("({})", candidate.id_type).dimmed(),
            first
        );
    }
}

fn print_scores(scored: &[RiskScore], cross_user: &[CrossUserAccess]) {
    let mut builder = Builder::default();
    builder.push_record([
        "#", "ID", "Type", "Score", "Level", "Usages", "Factors", "Cross-user",
    ]);

    for (i, score) in scored.iter().enumerate() {
        let tokens = cross_user_tokens(&score.id_value, cross_user)
            .map(|t| t.join(", "))
            .unwrap_or_default();
        builder.push_record([
            (i + 1).to_string(),
            score.id_value.clone(),
            score.id_type.to_string(),
            score.score.to_string(),
            score.level.to_string().to_uppercase(),
            score.usage_count.to_string(),
            score.factors.join(" "),
            tokens,
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    let at = |level: RiskLevel| scored.iter().filter(|s| s.level == level).count();
    println!(
        "\n  {} {} {} {}",
        format!("{} Critical", at(RiskLevel::Critical)).red().bold(),
        format!("{} High", at(RiskLevel::High)).bright_red(),
        format!("{} Medium", at(RiskLevel::Medium)).yellow(),
        format!("{} Low", at(RiskLevel::Low)).blue(),
    );
}

fn print_lifeline(line: &Lifeline, total_flows: usize) {
    let value = if line.value.chars().count() > 20 {
        format!("{}...", line.value.chars().take(20).collect::<String>())
    } else {
        line.value.clone()
    };
    let percent = line.span_percent(total_flows);
    let value = if percent > 50.0 {
        value.green().bold()
    } else if percent > 20.0 {
        value.yellow()
    } else {
        value.dimmed()
    };
    println!("  {} {}", value, format!("({})", line.id_type).dimmed());
    println!("    {}", line.timeline(total_flows, 60));
    println!(
        "    {}",
        format!(
            "Lifespan: {} flows ({:.0}%) | Used in requests: {}x",
            line.span(),
            percent,
            line.use_count
        )
        .dimmed()
    );

    let short = |path: &str| path.chars().take(30).collect::<String>();
    if let Some(first) = line.events.first() {
        println!("    {} {} {}", "First:".dimmed(), first.method, short(&first.path));
    }
    if line.first != line.last {
        if let Some(last) = line.events.last() {
            println!("    {} {} {}", "Last: ".dimmed(), last.method, short(&last.path));
        }
    }
    println!();
}

fn print_diff(result: &diff::ReportDiff) {
    println!("\n{}", "  Report Diff".bold());
    println!("  {}", "─".repeat(35));

    let mut builder = Builder::default();
    builder.push_record(["", "Before", "After", "Delta"]);
    for (label, delta) in [("Flows", &result.flows), ("Tracked IDs", &result.ids)] {
        builder.push_record([
            label.to_string(),
            delta.before.to_string(),
            delta.after.to_string(),
            format!("{:+}", delta.delta),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    if !result.new_idor.is_empty() {
        println!("\n  {}", "New IDOR candidates:".red().bold());
        for c in &result.new_idor {
            println!("    + {} ({})", c.id_value.yellow(), c.id_type);
        }
    }
    if !result.removed_idor.is_empty() {
        println!("\n  {}", "Resolved IDOR candidates:".green().bold());
        for c in &result.removed_idor {
            println!("    - {} ({})", c.id_value, c.id_type);
        }
    }
    println!(
        "\n  {} unchanged candidate(s), {} new ID(s), {} removed ID(s)",
        result.unchanged_idor.len(),
        result.new_ids.len(),
        result.removed_ids.len()
    );
    if !result.has_changes() {
        println!("  {}", "No changes.".green());
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Proxy {
            port,
            output,
            config: config_path,
            min_numeric,
            domains,
        } => {
            print_banner();
            let tracker = tracker_config(config_path.as_deref(), output, min_numeric, domains)?;

            println!("  {} {}", "Proxy:".bold(), format!("http://127.0.0.1:{port}").green());
            println!("  {} {}", "Output:".bold(), tracker.output.green());
            if !tracker.target_domains.is_empty() {
                println!(
                    "  {} {}",
                    "Domains:".bold(),
                    tracker.target_domains.join(", ").cyan()
                );
            }
            println!(
                "\n  {}\n",
                "Press Ctrl+C to stop and write the report.".yellow()
            );

            let proxy = InterceptProxy::new(port, tracker.clone());
            let result = proxy.start().await?;

            print_report_summary(&result);
            println!("\n  {} {}", "Report saved to:".bold(), tracker.output.green());
        }

        Commands::ImportHar {
            input,
            output,
            config: config_path,
            min_numeric,
            domains,
        } => {
            print_banner();
            let tracker = tracker_config(config_path.as_deref(), output, min_numeric, domains)?;

            let result = har::import_har(&input, &tracker)?;
            report::json::export(&result, Path::new(&tracker.output))?;

            print_report_summary(&result);
            println!("\n  {} {}", "Report saved to:".bold(), tracker.output.green());
        }

        Commands::Summary { report: path } => {
            let result = report::json::load(&path)?;
            print_report_summary(&result);
        }

        Commands::Score {
            report: path,
            top,
            fail_on,
        } => {
            let result = report::json::load(&path)?;
            let mut scored = rank(&result.candidates());
            if scored.is_empty() {
                println!("  {}", "No potential IDOR candidates to score.".green());
                return Ok(());
            }
            let flows = result.to_flows();
            let cross_user = detect_cross_user_access(&flows);

            let total = scored.len();
            if let Some(n) = top {
                scored.truncate(n);
            }
            println!(
                "\n  {} ({} of {})\n",
                "Risk Ranking".bold(),
                scored.len(),
                total
            );
            print_scores(&scored, &cross_user);

            if let Some(ref threshold) = fail_on {
                match parse_level(threshold) {
                    Some(level) => {
                        if scored.iter().any(|s| s.level >= level) {
                            println!(
                                "\n  {} Candidates at or above {} risk detected.",
                                "FAIL:".red().bold(),
                                threshold.to_uppercase().red()
                            );
                            std::process::exit(1);
                        }
                    }
                    None => eprintln!(
                        "  {} Invalid --fail-on value: '{}'. Use: critical, high, medium, low",
                        "Error:".red().bold(),
                        threshold
                    ),
                }
            }
        }

        Commands::Chain {
            report: path,
            top,
            min_depth,
            max_depth,
            domains,
        } => {
            let result = report::json::load(&path)?;
            let flows = result.to_flows();
            let snapshot = IdLedger::from_flows(&flows).finalize();
            let analyzer = ChainAnalyzer::new(&flows, &snapshot);

            let options = ChainOptions {
                min_depth,
                top,
                max_depth,
                domains: domains.unwrap_or_default(),
            };
            let trees = analyzer.analyze(&options);

            println!(
                "\n  {} {} flows, {} edges, {} chain(s)\n",
                "Dependency chains:".bold(),
                analyzer.graph().len(),
                analyzer.graph().edge_count(),
                trees.len()
            );
            for (i, tree) in trees.iter().enumerate() {
                println!(
                    "  {} depth {}, {} nodes, score {}",
                    format!("Chain {}", i + 1).cyan().bold(),
                    tree.depth,
                    tree.node_count,
                    tree.score
                );
                for line in analyzer.render(tree) {
                    println!("    {line}");
                }
                println!();
            }
        }

        Commands::Lifeline {
            report: path,
            min_uses,
            sort,
            limit,
        } => {
            let result = report::json::load(&path)?;
            let flows = result.to_flows();
            if flows.is_empty() {
                println!("  {}", "No flows found in report.".yellow());
                return Ok(());
            }

            let lines = lifeline::select(lifeline::build_lifelines(&flows), min_uses, sort);
            println!(
                "\n  {} {}\n",
                "Identifier Lifelines".bold(),
                format!("(sorted by {sort})").dimmed()
            );
            for line in lines.iter().take(limit) {
                print_lifeline(line, flows.len());
            }
            println!(
                "  {}",
                format!(
                    "Showing {} of {} identifiers (min {} uses)",
                    lines.len().min(limit),
                    lines.len(),
                    min_uses
                )
                .dimmed()
            );
            println!(
                "  {}",
                "Legend: ○ issued (response)  ● sent (request)  ◆ both".dimmed()
            );
        }

        Commands::Auth { report: path } => {
            let result = report::json::load(&path)?;
            let flows = result.to_flows();
            let accesses = detect_cross_user_access(&flows);

            if accesses.is_empty() {
                println!("  {}", "No cross-user access detected.".green());
                return Ok(());
            }

            let mut builder = Builder::default();
            builder.push_record(["ID", "API", "Auth tokens", "Flows"]);
            for access in &accesses {
                builder.push_record([
                    access.id_value.clone(),
                    access.api_pattern.clone(),
                    access.auth_tokens.join(", "),
                    access.flows.len().to_string(),
                ]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!(
                "\n  {} {}\n",
                format!("{}", accesses.len()).red().bold(),
                "identifier/endpoint pair(s) reached by several credentials".bold()
            );
            println!("{table}");
        }

        Commands::Diff {
            before,
            after,
            output,
        } => {
            let baseline = report::json::load(&before)?;
            let current = report::json::load(&after)?;
            let result = diff::diff_reports(&baseline, &current);

            print_diff(&result);
            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                println!(
                    "\n  {} {}",
                    "Diff saved to:".bold(),
                    path.display().to_string().green()
                );
            }
        }

        Commands::Export {
            report: path,
            format,
            output,
        } => {
            let result = report::json::load(&path)?;
            let default_name = match format.as_str() {
                "sarif" => "idtrace.sarif.json",
                "har" => "idtrace_flows.har",
                "flows-csv" => "idtrace_flows.csv",
                _ => "idtrace_candidates.csv",
            };
            let output_path = output.unwrap_or_else(|| PathBuf::from(default_name));

            match format.as_str() {
                "csv" => {
                    report::csv::export_candidates(&rank(&result.candidates()), &output_path)?
                }
                "sarif" => report::sarif::export(&rank(&result.candidates()), &output_path)?,
                "har" => har::export_har(&result.to_flows(), &output_path)?,
                "flows-csv" => report::csv::export_flows(&result, &output_path)?,
                other => {
                    eprintln!(
                        "  {} Unknown format '{}'. Use: csv, sarif, har, flows-csv",
                        "Error:".red().bold(),
                        other
                    );
                    std::process::exit(2);
                }
            }
            println!(
                "  {} {}",
                "Exported to:".bold(),
                output_path.display().to_string().green()
            );
        }

        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    eprintln!(
                        "  {} {} already exists (use --force to overwrite)",
                        "Error:".red().bold(),
                        path.display()
                    );
                    std::process::exit(1);
                }
                std::fs::write(&path, config::default_config_yaml())?;
                println!(
                    "  {} {}",
                    "Configuration written to:".bold(),
                    path.display().to_string().green()
                );
            }
            ConfigAction::Validate { path } => {
                let errors = config::validate_config(&path);
                if errors.is_empty() {
                    println!("  {} {}", "Valid:".green().bold(), path.display());
                } else {
                    for error in &errors {
                        eprintln!("  {} {}", "Error:".red().bold(), error);
                    }
                    std::process::exit(1);
                }
            }
            ConfigAction::Get {
                key,
                config: config_path,
            } => {
                let tracker = config::load_config(config_path.as_deref())?;
                match tracker.get_value(&key) {
                    Some(value) => println!("{}", serde_yaml::to_string(&value)?.trim_end()),
                    None => {
                        eprintln!("  {} Unknown key: {}", "Error:".red().bold(), key);
                        std::process::exit(1);
                    }
                }
            }
            ConfigAction::Set {
                key,
                value,
                config: config_path,
            } => {
                let Some(path) = config_path
                    .or_else(config::find_config_path)
                    .filter(|p| p.exists())
                else {
                    eprintln!(
                        "  {} No config file found. Run 'idtrace config init' first.",
                        "Error:".red().bold()
                    );
                    std::process::exit(1);
                };
                config::set_config_value(&path, &key, &value)?;
                println!("  {} {} = {}", "Set".green().bold(), key, value);
                println!("  {} {}", "Updated:".dimmed(), path.display());
            }
            ConfigAction::Show { config: config_path } => {
                let source = config_path.clone().or_else(config::find_config_path);
                let tracker = config::load_config(config_path.as_deref())?;
                print_config(&tracker, source.as_deref());
            }
        },
    }

    Ok(())
}

fn print_config(tracker: &TrackerConfig, source: Option<&Path>) {
    let source = source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());
    println!("  {} {}\n", "Source:".bold(), source.cyan());

    let mut builder = Builder::default();
    builder.push_record(["Setting", "Value"]);
    builder.push_record(["output".to_string(), tracker.output.clone()]);
    builder.push_record(["min_numeric".to_string(), tracker.min_numeric.to_string()]);
    builder.push_record([
        "max_body_size".to_string(),
        tracker.max_body_size.to_string(),
    ]);
    builder.push_record([
        "target_domains".to_string(),
        tracker.target_domains.join(", "),
    ]);
    builder.push_record([
        "exclude_domains".to_string(),
        tracker.exclude_domains.join(", "),
    ]);
    builder.push_record([
        "trackable_content_types".to_string(),
        tracker.trackable_content_types.join(", "),
    ]);
    builder.push_record([
        "keep_filtered_flows".to_string(),
        tracker.keep_filtered_flows.to_string(),
    ]);
    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");

    println!("\n  {}", "Patterns (evaluation order):".bold());
    for (name, pattern) in &tracker.patterns {
        println!("    {} {}", format!("{name:12}").cyan(), pattern);
    }
    println!("\n  {}", "Exclude patterns:".bold());
    for pattern in &tracker.exclude_patterns {
        println!("    {pattern}");
    }
}
