//! Cadence: schedule policy administration
//!
//! Main binary with subcommands:
//! - `list`: Print the policy index
//! - `show`: Print one policy with its associations and schedules
//! - `create` / `delete`: Add or remove whole policies
//! - `enable` / `disable`: Toggle a policy
//! - `add-schedule`, `modify-schedule`, `delete-schedule`: Edit schedules
//! - `associations`, `app-groups`: Edit what a policy applies to

use std::sync::Arc;
use std::time::Duration;

use cadence_policy::{
    AppGroup, Association, NewPolicy, OperationCode, OptionsPatch, PatternSpec, PolicyClient,
    SchedulePolicy, SchedulePolicyRegistry, ScheduleSelector, SubTaskId,
};
use cadence_transport::{HttpConfig, HttpTransport};
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Schedule policy administration", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Connection {
    /// Base URL of the REST API
    #[arg(long, env = "CADENCE_BASE_URL")]
    base_url: String,

    /// Session token sent as `Authtoken`
    #[arg(long, env = "CADENCE_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "CADENCE_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Total retry budget for reads in seconds (0 disables retries)
    #[arg(long, env = "CADENCE_RETRY_BUDGET")]
    retry_budget: Option<u64>,
}

#[derive(Args)]
struct SelectorArgs {
    /// Schedule id
    #[arg(long)]
    id: Option<u64>,

    /// Schedule name
    #[arg(long)]
    name: Option<String>,
}

impl SelectorArgs {
    fn selector(&self) -> ScheduleSelector {
        ScheduleSelector {
            id: self.id.map(SubTaskId),
            name: self.name.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List all schedule policies
    List,

    /// Show one policy
    Show {
        /// Policy name
        policy: String,
    },

    /// Create a policy from a JSON description
    Create {
        /// Path to a JSON file with name, policyType, associations, appGroups and schedules
        file: String,
    },

    /// Delete a policy
    Delete {
        /// Policy name
        policy: String,
    },

    /// Enable a policy
    Enable {
        /// Policy name
        policy: String,
    },

    /// Disable a policy
    Disable {
        /// Policy name
        policy: String,
    },

    /// Add a schedule to a policy
    AddSchedule {
        /// Policy name
        policy: String,

        /// Schedule name
        #[arg(long)]
        name: String,

        /// Pattern fields as a JSON object
        #[arg(long)]
        pattern: Option<String>,

        /// Option fields as a JSON object
        #[arg(long)]
        options: Option<String>,
    },

    /// Change the pattern and/or options of a schedule
    ModifySchedule {
        /// Policy name
        policy: String,

        #[command(flatten)]
        selector: SelectorArgs,

        /// Pattern fields to change, as a JSON object
        #[arg(long)]
        pattern: Option<String>,

        /// Option fields to change, as a JSON object
        #[arg(long)]
        options: Option<String>,
    },

    /// Remove a schedule from a policy
    DeleteSchedule {
        /// Policy name
        policy: String,

        #[command(flatten)]
        selector: SelectorArgs,
    },

    /// Change the clients and client groups a policy applies to
    Associations {
        /// Policy name
        policy: String,

        /// Client names (comma-separated)
        #[arg(long, value_delimiter = ',')]
        clients: Vec<String>,

        /// Client group names (comma-separated)
        #[arg(long, value_delimiter = ',')]
        client_groups: Vec<String>,

        /// How to apply the list: overwrite, update or delete
        #[arg(long, default_value = "overwrite")]
        op: OperationCode,
    },

    /// Change the application groups a policy applies to
    AppGroups {
        /// Policy name
        policy: String,

        /// Application group names
        #[arg(required = true)]
        names: Vec<String>,

        /// How to apply the list: overwrite, update or delete
        #[arg(long, default_value = "overwrite")]
        op: OperationCode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cadence=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut registry = connect(&cli.connection).await?;

    match cli.command {
        Commands::List => {
            println!("{}", registry);
        }

        Commands::Show { policy } => {
            let policy = get(&registry, &policy).await?;
            print_policy(&policy);
        }

        Commands::Create { file } => {
            let contents = std::fs::read_to_string(&file)
                .map_err(|e| miette::miette!("failed to read {}: {}", file, e))?;
            let new: NewPolicy = serde_json::from_str(&contents)
                .map_err(|e| miette::miette!("invalid policy description in {}: {}", file, e))?;
            let policy = registry
                .add(new)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            tracing::info!(policy = %policy.name(), id = policy.id(), "created policy");
            print_policy(&policy);
        }

        Commands::Delete { policy } => {
            registry
                .delete(&policy)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            tracing::info!(%policy, "deleted policy");
            println!("{}", registry);
        }

        Commands::Enable { policy } => {
            let mut policy = get(&registry, &policy).await?;
            policy.enable().await.map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }

        Commands::Disable { policy } => {
            let mut policy = get(&registry, &policy).await?;
            policy.disable().await.map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }

        Commands::AddSchedule {
            policy,
            name,
            pattern,
            options,
        } => {
            let pattern = parse_pattern(pattern.as_deref())?.unwrap_or_default();
            let options = parse_options(options.as_deref())?.unwrap_or_default();

            let mut policy = get(&registry, &policy).await?;
            policy
                .add_schedule(&name, pattern, &options)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }

        Commands::ModifySchedule {
            policy,
            selector,
            pattern,
            options,
        } => {
            let pattern = parse_pattern(pattern.as_deref())?;
            let options = parse_options(options.as_deref())?;

            let mut policy = get(&registry, &policy).await?;
            policy
                .modify_schedule(&selector.selector(), pattern.as_ref(), options.as_ref())
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }

        Commands::DeleteSchedule { policy, selector } => {
            let mut policy = get(&registry, &policy).await?;
            policy
                .delete_schedule(&selector.selector())
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }

        Commands::Associations {
            policy,
            clients,
            client_groups,
            op,
        } => {
            let list = clients
                .iter()
                .map(Association::client)
                .chain(client_groups.iter().map(Association::client_group))
                .collect();

            let mut policy = get(&registry, &policy).await?;
            policy
                .update_associations(list, op)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }

        Commands::AppGroups { policy, names, op } => {
            let list = names.iter().map(AppGroup::new).collect();

            let mut policy = get(&registry, &policy).await?;
            policy
                .update_app_groups(list, op)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            print_policy(&policy);
        }
    }

    Ok(())
}

async fn connect(connection: &Connection) -> Result<SchedulePolicyRegistry> {
    let mut config = HttpConfig::new(&connection.base_url);
    if let Some(token) = &connection.auth_token {
        config = config.with_auth_token(token);
    }
    if let Some(secs) = connection.request_timeout {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = connection.retry_budget {
        config.retry_budget = Duration::from_secs(secs);
    }

    let transport = HttpTransport::new(config)
        .map_err(|e| miette::miette!("failed to create HTTP client: {}", e))?;
    let client = PolicyClient::new(Arc::new(transport));

    let registry = SchedulePolicyRegistry::new(client)
        .await
        .map_err(|e| miette::miette!("failed to load policy index: {}", e))?;
    tracing::debug!(
        base_url = %connection.base_url,
        policies = registry.all_policies().len(),
        "loaded policy index"
    );
    Ok(registry)
}

async fn get(registry: &SchedulePolicyRegistry, name: &str) -> Result<SchedulePolicy> {
    registry
        .get(name)
        .await
        .map_err(|e| miette::miette!("{}", e))
}

fn parse_json(flag: &str, raw: Option<&str>) -> Result<Option<serde_json::Value>> {
    raw.map(|s| {
        serde_json::from_str(s).map_err(|e| miette::miette!("--{} is not valid JSON: {}", flag, e))
    })
    .transpose()
}

fn parse_pattern(raw: Option<&str>) -> Result<Option<PatternSpec>> {
    parse_json("pattern", raw)?
        .map(|v| PatternSpec::from_value(v).map_err(|e| miette::miette!("{}", e)))
        .transpose()
}

fn parse_options(raw: Option<&str>) -> Result<Option<OptionsPatch>> {
    parse_json("options", raw)?
        .map(|v| OptionsPatch::from_value(v).map_err(|e| miette::miette!("{}", e)))
        .transpose()
}

fn print_policy(policy: &SchedulePolicy) {
    println!(
        "{} (id {}, {}, {})",
        policy.name(),
        policy.id(),
        policy.policy_type(),
        if policy.is_enabled() { "enabled" } else { "disabled" }
    );

    println!("\nAssociations:");
    for association in policy.associations() {
        if let Some(name) = &association.client_name {
            println!("  client        {}", name);
        } else if let Some(name) = &association.client_group_name {
            println!("  client group  {}", name);
        }
    }

    println!("\nApp groups:");
    for app_group in policy.app_groups() {
        println!("  {}", app_group.app_group_name);
    }

    println!("\nSchedules:");
    for schedule in policy.schedules() {
        let id = schedule
            .id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let pattern = schedule
            .pattern()
            .map(|p| serde_json::Value::Object(p.fields().clone()).to_string())
            .unwrap_or_default();
        println!("  {:>6}  {:<24} {}", id, schedule.name(), pattern);
    }
}
