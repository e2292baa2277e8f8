use std::collections::HashSet;

use accesscontrol::db;
use accesscontrol::models::rbac::Subject;
use accesscontrol::models::resource_permission::{
    GetResourcePermissionsQuery, SetResourcePermissionCommand,
};
use accesscontrol::store::ResourcePermissionStore;
use accesscontrol::Config;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::SqlitePool;

#[derive(Parser, Debug)]
#[command(author, version, about = "access control administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ResourceArgs {
    #[arg(long)]
    org: i64,
    /// Resource kind, e.g. `dashboards`
    #[arg(long)]
    resource: String,
    /// Attribute the id is expressed in, e.g. `uid`
    #[arg(long, default_value = "")]
    attribute: String,
    #[arg(long)]
    id: String,
    #[arg(long = "action")]
    actions: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Set a subject's actions on a resource; no actions revokes all of them
    Grant {
        /// `user:<id>`, `team:<id>` or `builtin:<role>`
        #[arg(long)]
        subject: Subject,
        #[command(flatten)]
        target: ResourceArgs,
    },
    /// List who holds the given actions on a resource
    List {
        #[command(flatten)]
        target: ResourceArgs,
        #[arg(long)]
        only_managed: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::MigrateRun => {
            db::init(&config).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = db::connect(&config).await?;
            print_status(&pool).await?;
        }
        Commands::Grant { subject, target } => {
            let store = ResourcePermissionStore::new(db::init(&config).await?);
            let command = SetResourcePermissionCommand {
                actions: target.actions,
                resource: target.resource,
                resource_id: target.id,
                resource_attribute: target.attribute,
            };
            let permission = store
                .set_resource_permission(target.org, &subject, &command, None)
                .await
                .with_context(|| format!("failed to grant {} on {}", subject, command.scope()))?;
            println!("{}", serde_json::to_string_pretty(&permission)?);
        }
        Commands::List { target, only_managed } => {
            let store = ResourcePermissionStore::new(db::init(&config).await?);
            let query = GetResourcePermissionsQuery {
                actions: target.actions,
                resource: target.resource,
                resource_id: target.id,
                resource_attribute: target.attribute,
                only_managed,
                inherited_scopes: Vec::new(),
            };
            let permissions = store.get_resource_permissions(target.org, &query).await?;
            println!("{}", serde_json::to_string_pretty(&permissions)?);
        }
    }

    Ok(())
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let has_table: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    let applied_versions: HashSet<i64> = if has_table {
        sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in db::MIGRATOR.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
