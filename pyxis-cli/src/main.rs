use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use tokio_util::sync::CancellationToken;

use pyxis_core::descriptor::Registry;
use pyxis_core::reconciler::{ReconcileError, Reconciler};
use pyxis_core::remote::RemoteClient;
use pyxis_core::resource::{RemoteState, Resource, Value};
use pyxis_provider_awscc::{CloudControlRemote, descriptors};

#[derive(Parser)]
#[command(name = "pyxis")]
#[command(about = "Drives cloud resources toward their declared desired state", long_about = None)]
struct Cli {
    /// AWS region to operate in
    #[arg(long, global = true, default_value = "us-east-1")]
    region: String,

    /// Override every per-type convergence timeout, in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a resource and wait until it converges
    Create {
        /// Resource type (see `pyxis resources`)
        resource_type: String,
        /// Name for the new resource
        name: String,
        /// Path to a JSON file with the desired attributes
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Show the current remote state of a resource
    Read {
        resource_type: String,
        /// Remote identifier (e.g., vpc-xxx)
        identifier: String,
        /// Desired-state file to show drift against
        #[arg(long)]
        desired: Option<PathBuf>,
    },
    /// Apply attribute changes in place and wait until the resource converges
    Update {
        resource_type: String,
        identifier: String,
        /// Path to a JSON file with the desired attributes
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Delete a resource and wait until it is gone
    Delete {
        resource_type: String,
        identifier: String,
    },
    /// Adopt an existing remote resource and print its attributes
    Import {
        resource_type: String,
        identifier: String,
    },
    /// List the resource types this provider supports
    Resources,
    /// Generate shell completions
    Completions { shell: Shell },
}

type CliError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Cli {
        region,
        timeout_secs,
        command,
    } = Cli::parse();

    // Ctrl-C cancels in-flight reconciliation at the next poll boundary.
    // Remote calls already issued may still take effect; `pyxis read`
    // afterwards shows what actually happened.
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = match command {
        Commands::Create {
            resource_type,
            name,
            file,
        } => run_create(&region, timeout_secs, &resource_type, &name, &file, &cancel).await,
        Commands::Read {
            resource_type,
            identifier,
            desired,
        } => run_read(&region, timeout_secs, &resource_type, &identifier, desired.as_deref()).await,
        Commands::Update {
            resource_type,
            identifier,
            file,
        } => run_update(&region, timeout_secs, &resource_type, &identifier, &file, &cancel).await,
        Commands::Delete {
            resource_type,
            identifier,
        } => run_delete(&region, timeout_secs, &resource_type, &identifier, &cancel).await,
        Commands::Import {
            resource_type,
            identifier,
        } => run_import(&region, timeout_secs, &resource_type, &identifier).await,
        Commands::Resources => run_resources(),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "pyxis",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn build_reconciler(region: &str, timeout_secs: Option<u64>) -> Reconciler {
    let client = CloudControlRemote::new(region).await;
    let mut all = descriptors();
    if let Some(secs) = timeout_secs {
        let timeout = Duration::from_secs(secs);
        all = all
            .into_iter()
            .map(|d| d.with_timeouts(timeout, timeout, timeout))
            .collect();
    }
    Reconciler::new(
        Arc::new(client) as Arc<dyn RemoteClient>,
        Registry::new(all),
    )
}

async fn run_create(
    region: &str,
    timeout_secs: Option<u64>,
    resource_type: &str,
    name: &str,
    file: &Path,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let attributes = load_attributes(file)?;
    let reconciler = build_reconciler(region, timeout_secs).await;

    let mut resource = Resource::new(resource_type, name);
    resource.attributes = attributes;

    println!(
        "{} {} '{}'...",
        "Creating".cyan().bold(),
        resource_type,
        name
    );
    let state = reconciler
        .create(&resource, cancel)
        .await
        .map_err(describe_failure)?;

    println!(
        "{} {} {} ({})",
        "Created".green().bold(),
        resource_type,
        state.identifier,
        state.status
    );
    println!("{}", attributes_json(&state.attributes));
    Ok(())
}

async fn run_read(
    region: &str,
    timeout_secs: Option<u64>,
    resource_type: &str,
    identifier: &str,
    desired: Option<&Path>,
) -> Result<(), CliError> {
    let reconciler = build_reconciler(region, timeout_secs).await;

    match reconciler
        .find(resource_type, identifier)
        .await
        .map_err(describe_failure)?
    {
        None => {
            println!(
                "{} {} {} not found",
                "Missing".yellow().bold(),
                resource_type,
                identifier
            );
        }
        Some(state) => {
            println!(
                "{} {} ({})",
                resource_type.bold(),
                state.identifier,
                state.status
            );
            println!("{}", attributes_json(&state.attributes));
            if let Some(path) = desired {
                let desired_attributes = load_attributes(path)?;
                print_drift(&desired_attributes, &state);
            }
        }
    }
    Ok(())
}

async fn run_update(
    region: &str,
    timeout_secs: Option<u64>,
    resource_type: &str,
    identifier: &str,
    file: &Path,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let attributes = load_attributes(file)?;
    let reconciler = build_reconciler(region, timeout_secs).await;

    let mut resource = Resource::new(resource_type, identifier);
    resource.attributes = attributes;

    println!(
        "{} {} {}...",
        "Updating".cyan().bold(),
        resource_type,
        identifier
    );
    let state = reconciler
        .update(identifier, &resource, cancel)
        .await
        .map_err(describe_failure)?;

    println!(
        "{} {} {} ({})",
        "Updated".green().bold(),
        resource_type,
        state.identifier,
        state.status
    );
    println!("{}", attributes_json(&state.attributes));
    Ok(())
}

async fn run_delete(
    region: &str,
    timeout_secs: Option<u64>,
    resource_type: &str,
    identifier: &str,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let reconciler = build_reconciler(region, timeout_secs).await;

    println!(
        "{} {} {}...",
        "Deleting".cyan().bold(),
        resource_type,
        identifier
    );
    reconciler
        .delete(resource_type, identifier, cancel)
        .await
        .map_err(describe_failure)?;

    println!("{} {} {}", "Deleted".green().bold(), resource_type, identifier);
    Ok(())
}

async fn run_import(
    region: &str,
    timeout_secs: Option<u64>,
    resource_type: &str,
    identifier: &str,
) -> Result<(), CliError> {
    let reconciler = build_reconciler(region, timeout_secs).await;

    match reconciler
        .find(resource_type, identifier)
        .await
        .map_err(describe_failure)?
    {
        None => Err(format!("{} {} does not exist", resource_type, identifier).into()),
        Some(state) => {
            println!(
                "{} {} {} ({})",
                "Imported".green().bold(),
                resource_type,
                state.identifier,
                state.status
            );
            // The attribute document doubles as a starting desired-state file.
            println!("{}", attributes_json(&state.attributes));
            Ok(())
        }
    }
}

fn run_resources() -> Result<(), CliError> {
    let registry = Registry::new(descriptors());
    println!("{}", "Supported resource types:".bold());
    for name in registry.type_names() {
        if let Some(descriptor) = registry.get(name) {
            println!("  {:<20} {}", name, descriptor.remote_type_name.dimmed());
        }
    }
    Ok(())
}

fn load_attributes(path: &Path) -> Result<HashMap<String, Value>, CliError> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| format!("invalid JSON in {}: {}", path.display(), e))?;
    match Value::from_json(&json) {
        Some(Value::Map(map)) => Ok(map),
        _ => Err(format!("{} must contain a JSON object of attributes", path.display()).into()),
    }
}

fn attributes_json(attributes: &HashMap<String, Value>) -> String {
    serde_json::to_string_pretty(&Value::Map(attributes.clone()).to_json())
        .unwrap_or_else(|_| "{}".to_string())
}

/// Render attribute drift between the desired file and the remote state,
/// restricted to the attributes the caller declared
fn print_drift(desired: &HashMap<String, Value>, state: &RemoteState) {
    let declared: HashMap<String, Value> = state
        .attributes
        .iter()
        .filter(|(key, _)| desired.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let remote_doc = attributes_json(&declared);
    let desired_doc = attributes_json(desired);
    if remote_doc == desired_doc {
        println!("{}", "No drift.".green());
        return;
    }

    println!("{}", "Drift against desired state:".yellow().bold());
    let diff = TextDiff::from_lines(&remote_doc, &desired_doc);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => print!("{}", format!("- {}", change).red()),
            ChangeTag::Insert => print!("{}", format!("+ {}", change).green()),
            ChangeTag::Equal => print!("  {}", change),
        }
    }
}

/// Keep the remote identifier visible on failures; a half-created resource
/// can still be imported or cleaned up by hand
fn describe_failure(err: ReconcileError) -> CliError {
    let message = err.to_string();
    match err.identifier() {
        Some(id) if !message.contains(id) => {
            format!("{} (remote identifier: {})", message, id).into()
        }
        _ => message.into(),
    }
}
