use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};

use sqlweave_core::config::CONFIG_FILE_NAME;
use sqlweave_core::{Config, Diagnostic, Severity};
use sqlweave_engine::{ChangeType, ImpactExport, ImpactReport, ImpactSeverity};
use sqlweave_graph::{Direction, Lineage, NodeKind};
use sqlweave_index::IndexManager;

/// sqlweave - SQL dependency graph, lineage and impact analysis
#[derive(Parser)]
#[command(name = "sqlweave")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: <root>/sqlweave.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root to index
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the workspace and print a summary
    Index {
        /// Write the index report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show what feeds into or consumes an object
    Lineage {
        /// Object name or file path
        node: String,

        #[arg(short, long, value_enum, default_value_t = DirectionArg::Upstream)]
        direction: DirectionArg,

        /// Maximum traversal depth (default: analysis.max_depth)
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Assess what breaks if an object changes
    Impact {
        /// Object name or file path
        node: String,

        #[arg(long, value_enum, default_value_t = ChangeArg::Modify)]
        change: ChangeArg,

        /// Write the impact export as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write a Markdown report
        #[arg(short, long)]
        markdown: Option<PathBuf>,
    },

    /// List circular dependencies
    Cycles,

    /// Dump the dependency graph
    Graph {
        /// Write the snapshot as JSON instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default sqlweave.toml to the workspace root
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Upstream,
    Downstream,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Upstream => Direction::Upstream,
            DirectionArg::Downstream => Direction::Downstream,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ChangeArg {
    Drop,
    Rename,
    Alter,
    Modify,
}

impl From<ChangeArg> for ChangeType {
    fn from(arg: ChangeArg) -> Self {
        match arg {
            ChangeArg::Drop => ChangeType::Drop,
            ChangeArg::Rename => ChangeType::Rename,
            ChangeArg::Alter => ChangeType::Alter,
            ChangeArg::Modify => ChangeType::Modify,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "sqlweave=debug" } else { "warn" })
            }),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Commands::Init { force } = cli.command {
        return init_command(&cli.root, force);
    }

    let config = load_config(&cli)?;
    if cli.verbose {
        eprintln!("{} dialect: {}", "Using".cyan(), config.dialect);
    }

    let manager = IndexManager::new(config).context("Failed to set up the index")?;
    let report = manager.scan();
    if cli.verbose {
        eprintln!(
            "{} {} files ({} fallback, {} failed)",
            "Indexed".cyan(),
            report.files.len(),
            report.summary.fallback,
            report.summary.failed
        );
    }

    match cli.command {
        Commands::Index { output } => {
            print_index_summary(&report);
            if let Some(path) = output {
                report.save_to_file(&path)?;
                eprintln!("{} {}", "Report saved to:".green(), path.display());
            }
            if report.has_errors() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Lineage { node, direction, depth } => {
            let depth = depth.unwrap_or(manager.config().analysis.max_depth);
            let lineage = manager
                .trace_lineage(&node, direction.into(), depth)
                .with_context(|| format!("'{}' was not found in the dependency graph", node))?;
            print_lineage(&lineage);
            Ok(())
        }
        Commands::Impact {
            node,
            change,
            output,
            markdown,
        } => {
            let report = manager
                .analyze_impact(&node, change.into())
                .with_context(|| format!("'{}' was not found in the dependency graph", node))?;
            print_impact(&report);

            let export = ImpactExport::new(report);
            if let Some(path) = output {
                export.save_to_file(&path)?;
                eprintln!("{} {}", "Impact report saved to:".green(), path.display());
            }
            if let Some(path) = markdown {
                std::fs::write(&path, export.to_markdown())?;
                eprintln!("{} {}", "Markdown report saved to:".green(), path.display());
            }
            Ok(())
        }
        Commands::Cycles => {
            let cycles = manager.detect_circular_dependencies();
            if cycles.is_empty() {
                println!("{}", "✓ No circular dependencies".green());
            } else {
                println!("{}", format!("Found {} circular dependencies:", cycles.len()).yellow().bold());
                for cycle in &cycles {
                    println!("  {}", cycle.path());
                }
            }
            Ok(())
        }
        Commands::Graph { output } => {
            let snapshot = manager.graph_snapshot();
            let json = snapshot.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    eprintln!("{} {}", "Graph saved to:".green(), path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::discover(&cli.root)?,
    };
    config.project_root = cli.root.clone();
    tracing::debug!(root = %config.project_root.display(), dialect = %config.dialect, "Loaded configuration");
    Ok(config)
}

fn init_command(root: &Path, force: bool) -> Result<()> {
    let path = root.join(CONFIG_FILE_NAME);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().save_to_file(&path)?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}

fn print_index_summary(report: &sqlweave_core::IndexReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Workspace Index".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
    println!("{} {}", "Files parsed:".bold(), report.summary.parsed);
    println!("{} {}", "Pattern fallback:".bold(), report.summary.fallback);
    println!("{} {}", "Failed:".bold(), report.summary.failed);
    println!("{} {}", "Objects:".bold(), report.summary.objects);
    println!("{} {}", "Edges:".bold(), report.summary.edges);

    if !report.diagnostics.is_empty() {
        println!();
        for diagnostic in &report.diagnostics {
            print_diagnostic(diagnostic);
        }
    }
    println!();
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    let label = match diagnostic.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warn => "warning".yellow().bold(),
        Severity::Info => "info".blue().bold(),
    };
    let location = diagnostic
        .location
        .as_ref()
        .map(|loc| match loc.line {
            Some(line) => format!(" {}:{}", loc.file, line),
            None => format!(" {}", loc.file),
        })
        .unwrap_or_default();
    println!("{}[{}]{} {}", label, diagnostic.code, location.dimmed(), diagnostic.message);
}

fn kind_label(kind: NodeKind) -> colored::ColoredString {
    match kind {
        NodeKind::Table => "table".cyan(),
        NodeKind::View => "view".magenta(),
        NodeKind::File => "file".white(),
    }
}

fn print_lineage(lineage: &Lineage) {
    println!(
        "\n{} {} ({})",
        format!("{} lineage of", lineage.direction).bold(),
        lineage.root.name.green(),
        kind_label(lineage.root.kind)
    );
    if lineage.root.missing_definition {
        println!("{}", "  (no definition in workspace)".yellow());
    }
    println!();

    if lineage.steps.is_empty() {
        println!("  {}", "Nothing found".dimmed());
        return;
    }
    for step in &lineage.steps {
        println!(
            "  {}{} ({})  {}",
            "  ".repeat(step.depth - 1),
            step.node.name,
            kind_label(step.node.kind),
            format!("{}:{}", step.via.file.display(), step.via.line).dimmed()
        );
    }
    println!();
}

fn severity_label(severity: ImpactSeverity) -> colored::ColoredString {
    let text = severity.to_string();
    match severity {
        ImpactSeverity::Critical => text.red().bold(),
        ImpactSeverity::High => text.red(),
        ImpactSeverity::Medium => text.yellow(),
        ImpactSeverity::Low => text.blue(),
        ImpactSeverity::None => text.green(),
    }
}

fn print_impact(report: &ImpactReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Impact Analysis".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();
    println!("{} {} ({})", "Target:".bold(), report.target.name.green(), kind_label(report.target.kind));
    println!("{} {}", "Change:".bold(), report.change);
    println!("{} {}", "Severity:".bold(), severity_label(report.severity));
    println!();

    if report.is_empty() {
        println!("{}", "✓ No downstream consumers".green());
    }

    for (title, impacts) in [("Direct", &report.direct_impacts), ("Transitive", &report.transitive_impacts)] {
        if impacts.is_empty() {
            continue;
        }
        println!("{}", format!("{} impacts:", title).bold());
        for impact in impacts {
            println!(
                "  [{}] {} ({}) - {}",
                severity_label(impact.severity),
                impact.name,
                kind_label(impact.kind),
                impact.reason
            );
        }
        println!();
    }

    if !report.suggestions.is_empty() {
        println!("{}", "Suggestions:".bold());
        for suggestion in &report.suggestions {
            println!("  • {}", suggestion);
        }
        println!();
    }
    println!("{}", "=".repeat(60).bright_blue());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_impact_arguments() {
        let cli = Cli::try_parse_from(["sqlweave", "impact", "orders", "--change", "drop", "-m", "impact.md"]).unwrap();
        match cli.command {
            Commands::Impact { node, change, markdown, .. } => {
                assert_eq!(node, "orders");
                assert!(matches!(ChangeType::from(change), ChangeType::Drop));
                assert_eq!(markdown, Some(PathBuf::from("impact.md")));
            }
            _ => panic!("expected impact command"),
        }
    }
}
