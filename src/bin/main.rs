//! Quarry CLI - compile formulas into structured query clauses
//!
//! Usage:
//!   quarry parse <formula>
//!   quarry compile [--catalog <file>] [--query <file>] --as <target> [--name <name>] <formula>
//!   quarry granularities [--catalog <file>] --table <id> <field>
//!   quarry validate [--catalog <file>] <query.json>
//!   quarry run <query.json>
//!
//! Examples:
//!   quarry parse '2 * Max([Total])'
//!   quarry compile --as aggregation '2 * Max([Total])'
//!   quarry compile --as filter --query orders.json '[Product → Category] = "Widget"'
//!   quarry granularities --table 1 'Created At'
//!
//! Without `--catalog`, the catalog configured in quarry.toml is used, and
//! failing that the built-in sample catalog.

use clap::{Parser, Subcommand, ValueEnum};
use quarry::compile::{CompileOptions, Compiler, TargetKind};
use quarry::config::Settings;
use quarry::context::{Catalog, InMemoryCatalog};
use quarry::error::QueryError;
use quarry::execution::ExecutionTracker;
use quarry::formula::{self, render_diagnostic};
use quarry::model::serialize;
use quarry::model::{Clause, Maintainer, StructuredQuery, TableId};
use quarry::sample;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry - compile custom expressions into structured analytic queries")]
#[command(version)]
struct Cli {
    /// Path to a quarry.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a formula and print it back in canonical form
    Parse {
        formula: String,

        /// Print the expression tree as well
        #[arg(long)]
        tree: bool,
    },

    /// Compile a formula into a clause
    Compile {
        formula: String,

        /// Catalog file (.json or .toml)
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Query (wire JSON) the clause is compiled against
        #[arg(short, long)]
        query: Option<PathBuf>,

        /// Source table when no query is given (defaults to the first table)
        #[arg(short, long)]
        table: Option<u64>,

        /// Clause kind to compile into
        #[arg(long = "as", value_enum)]
        target: TargetArg,

        /// Name for the aggregation or custom column
        #[arg(short, long)]
        name: Option<String>,

        /// Print the whole query with the clause added
        #[arg(long)]
        add: bool,
    },

    /// List the breakout granularities of a field
    Granularities {
        /// Display name of the field
        field: String,

        #[arg(short, long)]
        catalog: Option<PathBuf>,

        #[arg(short, long)]
        table: u64,
    },

    /// Check a query's clauses against the catalog
    Validate {
        /// Query file (wire JSON)
        file: PathBuf,

        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Execute a query against the sample dataset
    Run {
        /// Query file (wire JSON)
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Aggregation,
    Filter,
    Expression,
}

impl From<TargetArg> for TargetKind {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Aggregation => TargetKind::Aggregation,
            TargetArg::Filter => TargetKind::Filter,
            TargetArg::Expression => TargetKind::CustomColumn,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Parse { formula, tree } => cmd_parse(&formula, tree),
        Commands::Compile {
            formula,
            catalog,
            query,
            table,
            target,
            name,
            add,
        } => cmd_compile(
            &settings,
            &formula,
            catalog.as_deref(),
            query.as_deref(),
            table,
            target.into(),
            name.as_deref(),
            add,
        ),
        Commands::Granularities {
            field,
            catalog,
            table,
        } => cmd_granularities(&settings, &field, catalog.as_deref(), table),
        Commands::Validate { file, catalog } => cmd_validate(&settings, &file, catalog.as_deref()),
        Commands::Run { file } => cmd_run(&file),
    }
}

fn load_catalog(settings: &Settings, path: Option<&Path>) -> Result<InMemoryCatalog, String> {
    let configured = settings
        .catalog
        .resolved_path()
        .map_err(|e| format!("Error in catalog setting: {}", e))?;
    match path.map(Path::to_path_buf).or(configured) {
        Some(path) => InMemoryCatalog::from_file(&path)
            .map_err(|e| format!("Error loading catalog '{}': {}", path.display(), e)),
        None => Ok(sample::catalog()),
    }
}

fn load_query(path: &Path) -> Result<StructuredQuery, String> {
    let source = fs::read_to_string(path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
    serialize::from_str(&source).map_err(|e| format!("Error in '{}': {}", path.display(), e))
}

fn report_formula_error(source: &str, error: &QueryError) {
    match error.span() {
        Some(span) => eprint!("{}", render_diagnostic(source, span, &error.to_string())),
        None => eprintln!("Error: {}", error),
    }
}

fn cmd_parse(source: &str, tree: bool) -> ExitCode {
    match formula::parse(source) {
        Ok(expr) => {
            println!("{}", formula::format(&expr));
            if tree {
                println!("{:#?}", expr);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprint!("{}", render_diagnostic(source, e.span(), &e.message()));
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_compile(
    settings: &Settings,
    source: &str,
    catalog: Option<&Path>,
    query: Option<&Path>,
    table: Option<u64>,
    target: TargetKind,
    name: Option<&str>,
    add: bool,
) -> ExitCode {
    let catalog = match load_catalog(settings, catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let query = match (query, table) {
        (Some(path), _) => match load_query(path) {
            Ok(q) => q,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        (None, Some(id)) => StructuredQuery::new(TableId(id)),
        (None, None) => match catalog.tables().first() {
            Some(id) => StructuredQuery::new(*id),
            None => {
                eprintln!("Error: the catalog has no tables");
                return ExitCode::FAILURE;
            }
        },
    };

    let compiler = Compiler::new(&catalog).with_options(CompileOptions::from_settings(settings));

    if add {
        return match compiler.add_to_query(&query, source, target, name, None) {
            Ok(updated) => match serialize::to_string_pretty(&updated) {
                Ok(json) => {
                    println!("{}", json);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            },
            Err(e) => {
                report_formula_error(source, &e);
                ExitCode::FAILURE
            }
        };
    }

    let compiled = match compiler.compile(&query, source, target, name) {
        Ok(c) => c,
        Err(e) => {
            report_formula_error(source, &e);
            return ExitCode::FAILURE;
        }
    };

    let expression = match &compiled.clause {
        Clause::Aggregation(a) => &a.expression,
        Clause::Filter(f) => &f.predicate,
        Clause::CustomColumn(c) => &c.expression,
        Clause::Breakout(_) | Clause::OrderBy(_) => {
            eprintln!("Error: unexpected clause kind {}", compiled.clause.kind());
            return ExitCode::FAILURE;
        }
    };

    println!("-- {}: {}", compiled.clause.kind(), compiled.display_name);
    println!("-- kind: {}", compiled.kind.describe());
    match serialize::expression_to_value(expression)
        .and_then(|v| serde_json::to_string_pretty(&v).map_err(Into::into))
    {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_granularities(
    settings: &Settings,
    field: &str,
    catalog: Option<&Path>,
    table: u64,
) -> ExitCode {
    let catalog = match load_catalog(settings, catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some(fields) = catalog.table_fields(TableId(table)) else {
        eprintln!("Error: unknown table {}", table);
        return ExitCode::FAILURE;
    };
    let Some(info) = fields.iter().find(|f| f.name == field) else {
        eprintln!("Error: table {} has no field named '{}'", table, field);
        return ExitCode::FAILURE;
    };

    let units = catalog.granularities(info.id);
    if units.is_empty() {
        println!("{} ({}) has no temporal granularities", info.name, info.kind.describe());
        return ExitCode::SUCCESS;
    }
    for unit in units {
        println!("{:<16} {}", unit.as_str(), unit.label());
    }
    ExitCode::SUCCESS
}

fn cmd_validate(settings: &Settings, file: &Path, catalog: Option<&Path>) -> ExitCode {
    let catalog = match load_catalog(settings, catalog) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let query = match load_query(file) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let maintainer = Maintainer::new(&catalog).with_policy(settings.consistency.order_by_policy);
    match maintainer.validate(&query) {
        Ok(()) => {
            println!("OK: {} is valid", file.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Validation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_run(file: &Path) -> ExitCode {
    let query = match load_query(file) {
        Ok(q) => q,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let executor = sample::executor();
    let tracker = ExecutionTracker::new();
    let outcome = runtime.block_on(tracker.run(&executor, &query));

    match outcome.map(|o| o.current()) {
        Ok(Some(results)) => {
            let header: Vec<&str> = results.columns.iter().map(|c| c.name.as_str()).collect();
            println!("{}", header.join("\t"));
            for row in &results.rows {
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                println!("{}", cells.join("\t"));
            }
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("Results were superseded");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Execution error: {}", e);
            ExitCode::FAILURE
        }
    }
}
