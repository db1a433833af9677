//! CLI entry point for `rowgate`.

use std::process;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rowgate::adhoc::gate::{Principal, DEFAULT_ROLE};
use rowgate::config::{DatabaseConfig, QueryConfig};
use rowgate::engine::postgres::PgEngine;
use rowgate::policy::model::PolicyRequest;
use rowgate::rows::Selection;
use rowgate::sql::value::GenericRow;
use rowgate::{Context, Error, Result};

#[derive(Parser)]
#[command(
    name = "rowgate",
    version,
    about = "Query any PostgreSQL table and manage its row-level-security policies"
)]
struct Cli {
    #[command(flatten)]
    database: DatabaseConfig,

    #[command(flatten)]
    query: QueryConfig,

    /// Subject of the calling principal; required for ad-hoc writes
    #[arg(long, env = "ROWGATE_SUBJECT")]
    subject: Option<String>,

    /// Role claim of the calling principal
    #[arg(long, env = "ROWGATE_ROLE", default_value = DEFAULT_ROLE)]
    role: String,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// List tables of the exposed schema
    Tables,
    /// List columns of a table
    Columns {
        /// Table name
        table: String,
    },
    /// Show columns and row count of a table
    Describe {
        /// Table name
        table: String,
    },
    /// Dump columns, indexes and foreign keys of every table
    Schema,
    /// List rows with filters, sorting and paging
    Rows {
        /// Table name
        table: String,
        /// Request parameter as KEY=VALUE, e.g. `age__gte=30` or `page=2`
        #[arg(short = 'p', long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        /// Columns to return
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,
        /// Join clause appended after the base table (aliased `t`)
        #[arg(long)]
        join: Option<String>,
    },
    /// Fetch one row by primary key
    Get {
        /// Table name
        table: String,
        /// Primary-key value
        id: String,
    },
    /// Insert a row from a JSON object
    Insert {
        /// Table name
        table: String,
        /// JSON object of column values
        payload: String,
    },
    /// Update a row by primary key from a JSON object
    Update {
        /// Table name
        table: String,
        /// Primary-key value
        id: String,
        /// JSON object of changed column values
        payload: String,
    },
    /// Delete a row by primary key
    Delete {
        /// Table name
        table: String,
        /// Primary-key value
        id: String,
    },
    /// Run ad-hoc SQL
    Sql {
        /// SQL text with `$1..$n` placeholders
        sql: String,
        /// Positional argument as JSON, e.g. `42` or `"ann"`
        #[arg(short = 'a', long = "arg")]
        args: Vec<String>,
    },
    /// Manage row-level-security policies
    Policies {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// List policies
    List {
        /// Only policies on this table
        #[arg(long)]
        table: Option<String>,
    },
    /// Show one policy
    Get {
        /// Policy id
        id: Uuid,
    },
    /// Create a policy
    Create(PolicyArgs),
    /// Replace a policy
    Update {
        /// Policy id
        id: Uuid,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Delete a policy
    Delete {
        /// Policy id
        id: Uuid,
    },
}

#[derive(Args)]
struct PolicyArgs {
    /// Policy name
    #[arg(long)]
    name: String,
    /// Target table
    #[arg(long)]
    table: String,
    /// select, insert, update, delete or all
    #[arg(long)]
    action: String,
    /// Role the policy applies to; repeat or comma-separate
    #[arg(long = "role", required = true, value_delimiter = ',')]
    roles: Vec<String>,
    /// SQL predicate
    #[arg(long)]
    definition: String,
    /// Free-form description
    #[arg(long)]
    description: Option<String>,
}

impl From<PolicyArgs> for PolicyRequest {
    fn from(args: PolicyArgs) -> Self {
        PolicyRequest {
            name: args.name,
            table_name: args.table,
            action: args.action,
            roles: args.roles,
            definition: args.definition,
            description: args.description,
        }
    }
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn parse_object(raw: &str) -> Result<GenericRow> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::Validation("payload must be a JSON object".to_string())),
        Err(e) => Err(Error::Validation(format!("invalid JSON payload: {e}"))),
    }
}

/// Arguments that are not valid JSON are passed as plain strings.
fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

fn render<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.map_err(|e| Error::execution("encoding output", e.into()))
}

fn run(context: &Context<PgEngine>, cli: Cli) -> Result<String> {
    let pretty = cli.pretty;
    let principal = cli
        .subject
        .map(|subject| Principal::new(subject, cli.role.clone()));

    match cli.command {
        Command::Migrate => render(&context.run_migrations()?, pretty),
        Command::Tables => render(&context.list_tables()?, pretty),
        Command::Columns { table } => render(&context.get_columns(&table)?, pretty),
        Command::Describe { table } => render(&context.describe_table(&table)?, pretty),
        Command::Schema => render(&context.schema_snapshot()?, pretty),
        Command::Rows {
            table,
            params,
            select,
            join,
        } => {
            let selection = Selection {
                columns: select,
                join,
            };
            let pairs = params.iter().map(|(k, v)| (k.as_str(), v.as_str()));
            render(&context.query_rows_with(&table, pairs, &selection)?, pretty)
        }
        Command::Get { table, id } => render(&context.get_row_by_id(&table, &id)?, pretty),
        Command::Insert { table, payload } => {
            render(&context.insert_row(&table, &parse_object(&payload)?)?, pretty)
        }
        Command::Update { table, id, payload } => render(
            &context.update_row(&table, &id, &parse_object(&payload)?)?,
            pretty,
        ),
        Command::Delete { table, id } => render(&context.delete_row(&table, &id)?, pretty),
        Command::Sql { sql, args } => render(
            &context.execute_ad_hoc(&sql, &parse_args(&args), principal.as_ref())?,
            pretty,
        ),
        Command::Policies { command } => match command {
            PolicyCommand::List { table } => {
                render(&context.list_policies(table.as_deref())?, pretty)
            }
            PolicyCommand::Get { id } => render(&context.get_policy(id)?, pretty),
            PolicyCommand::Create(policy) => {
                render(&context.create_policy(&policy.into())?, pretty)
            }
            PolicyCommand::Update { id, policy } => {
                render(&context.update_policy(id, &policy.into())?, pretty)
            }
            PolicyCommand::Delete { id } => render(&context.delete_policy(id)?, pretty),
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rowgate=info,warn")),
        )
        .init();

    let cli = Cli::parse();

    let engine = match PgEngine::connect(&cli.database) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error connecting to database: {e}");
            process::exit(2);
        }
    };
    let context = Context::new(engine, cli.query.clone());

    match run(&context, cli) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(if e.is_client_error() { 1 } else { 2 });
        }
    }
}
