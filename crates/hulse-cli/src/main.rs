//! Hulse CLI - submit tasks, host compute and manage clusters.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hulse_client::{
    ApiClient, CallbackListener, ClientError, HulseClient, ListenerConfig,
};
use hulse_core::{LoginCallback, SUPPORTED_TASKS};

mod config;
mod engine;

use config::{CliConfig, Credentials};
use engine::CommandEngine;

/// How often `login` checks for the browser callback.
const LOGIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Hulse CLI - the command line client for the Hulse platform
#[derive(Parser)]
#[command(name = "hulse", version)]
#[command(about = "CLI for the Hulse platform", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the browser and save the API key
    Login {
        /// Seconds to wait for the browser callback
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Forget the saved API key
    Logout,

    /// Run a Hulse host serving tasks on this machine
    Host {
        /// API key (defaults to the saved one)
        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,

        /// Inference executable run once per task
        #[arg(short, long, env = "HULSE_ENGINE", default_value = "hulse-engine")]
        engine: String,

        /// Extra argument passed to the engine before the task arguments; repeatable
        #[arg(long = "engine-arg", allow_hyphen_values = true)]
        engine_args: Vec<String>,

        /// Maximum tasks executed at once
        #[arg(long, default_value = "1")]
        max_concurrent: usize,

        /// Seconds to wait before reconnecting after the stream closes
        #[arg(long, default_value = "5")]
        reconnect_delay: u64,
    },

    /// Submit a task and print its result
    Query {
        /// Task to run (omit to let the server infer it)
        #[arg(short, long)]
        task: Option<String>,

        /// Model identifier
        #[arg(short, long)]
        model: Option<String>,

        /// Input text; repeat for a batch
        #[arg(short, long, required = true)]
        data: Vec<String>,

        /// Seconds to wait for a result
        #[arg(long)]
        timeout: Option<u64>,

        /// API key (defaults to the saved one)
        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// List supported tasks
    Tasks,

    /// List your clusters
    #[command(name = "get-clusters")]
    GetClusters {
        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// Create a cluster
    #[command(name = "create-cluster")]
    CreateCluster {
        /// Cluster name
        #[arg(short, long)]
        name: String,

        /// Cluster description
        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// Join a cluster
    #[command(name = "join-cluster")]
    JoinCluster {
        /// Cluster ID
        id: i64,

        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// Leave a cluster
    #[command(name = "leave-cluster")]
    LeaveCluster {
        /// Cluster ID
        id: i64,

        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// Rename a cluster or change its description
    #[command(name = "edit-cluster")]
    EditCluster {
        /// Cluster ID
        id: i64,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// New description
        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// Delete a cluster
    #[command(name = "delete-cluster")]
    DeleteCluster {
        /// Cluster ID
        id: i64,

        #[arg(short, long, env = "HULSE_API_KEY")]
        key: Option<String>,
    },

    /// Save an existing API key after checking it against the server
    Init {
        /// API key to save
        #[arg(short, long)]
        key: String,
    },

    /// Print the saved API key
    #[command(name = "get-api-key")]
    GetApiKey,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::from_env();

    if let Err(e) = run(cli.command, &config).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &CliConfig) -> CliResult {
    match command {
        Commands::Login { timeout } => login(config, Duration::from_secs(timeout)).await,
        Commands::Logout => logout(config),
        Commands::Host {
            key,
            engine,
            engine_args,
            max_concurrent,
            reconnect_delay,
        } => {
            let key = resolve_key(config, key)?;
            let engine = engine_args
                .into_iter()
                .fold(CommandEngine::new(engine), CommandEngine::with_arg);
            host(
                config,
                key,
                engine,
                max_concurrent,
                Duration::from_secs(reconnect_delay),
            )
            .await
        }
        Commands::Query {
            task,
            model,
            data,
            timeout,
            key,
        } => {
            let key = resolve_key(config, key)?;
            query(config, key, task, model, data, timeout.map(Duration::from_secs)).await
        }
        Commands::Tasks => {
            println!("Supported tasks:");
            for task in SUPPORTED_TASKS {
                println!("  {}", task);
            }
            Ok(())
        }
        Commands::GetClusters { key } => {
            let clusters = api(config, key)?.clusters().await?;
            println!(
                "Here are your clusters:\n\n{}",
                serde_json::to_string_pretty(&clusters)?
            );
            Ok(())
        }
        Commands::CreateCluster {
            name,
            description,
            key,
        } => {
            let cluster = api(config, key)?
                .create_cluster(&name, description.as_deref())
                .await?;
            println!("Cluster created:\n{}", serde_json::to_string_pretty(&cluster)?);
            Ok(())
        }
        Commands::JoinCluster { id, key } => {
            let cluster = api(config, key)?.join_cluster(id).await?;
            println!("Joined cluster '{}' ({})", cluster.name, cluster.id);
            Ok(())
        }
        Commands::LeaveCluster { id, key } => {
            api(config, key)?.leave_cluster(id).await?;
            println!("Left cluster {}", id);
            Ok(())
        }
        Commands::EditCluster {
            id,
            name,
            description,
            key,
        } => {
            if name.is_none() && description.is_none() {
                return Err("nothing to change; pass --name and/or --description".into());
            }
            let cluster = api(config, key)?
                .edit_cluster(id, name.as_deref(), description.as_deref())
                .await?;
            println!("Cluster updated:\n{}", serde_json::to_string_pretty(&cluster)?);
            Ok(())
        }
        Commands::DeleteCluster { id, key } => {
            api(config, key)?.delete_cluster(id).await?;
            println!("Deleted cluster {}", id);
            Ok(())
        }
        Commands::Init { key } => init(config, key).await,
        Commands::GetApiKey => {
            let key = config
                .credentials()?
                .api_key
                .ok_or(ClientError::MissingCredential)?;
            println!("{}", key);
            Ok(())
        }
    }
}

/// `--key` wins over the saved key.
fn resolve_key(config: &CliConfig, flag: Option<String>) -> CliResult<String> {
    if let Some(key) = flag.filter(|k| !k.is_empty()) {
        return Ok(key);
    }
    config
        .credentials()?
        .api_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ClientError::MissingCredential.into())
}

fn api(config: &CliConfig, key: Option<String>) -> CliResult<ApiClient> {
    Ok(ApiClient::new(
        config.endpoints.clone(),
        resolve_key(config, key)?,
    ))
}

async fn login(config: &CliConfig, timeout: Duration) -> CliResult {
    let mut listener =
        CallbackListener::new(ListenerConfig::new(config.endpoints.login_success_url()));
    let addr = listener.start().await?;

    println!(
        "Open this URL in your browser to log in:\n\n  {}\n",
        config.endpoints.login_url(addr.port())
    );

    let callback = tokio::select! {
        callback = listener.wait_for_callback(LOGIN_POLL_INTERVAL, Some(timeout)) => callback,
        _ = tokio::signal::ctrl_c() => {
            info!("Login interrupted");
            None
        }
    };

    let callback = finish_login(&mut listener, callback, &config.credentials_path).await?;
    println!(
        "Logged in as {}",
        callback.username.as_deref().unwrap_or(&callback.email)
    );
    Ok(())
}

/// Save a captured login, then stop the listener whether or not one arrived.
///
/// A listener that fails to stop is only logged; saved credentials stand.
async fn finish_login(
    listener: &mut CallbackListener,
    callback: Option<LoginCallback>,
    credentials_path: &Path,
) -> CliResult<LoginCallback> {
    let saved: CliResult<LoginCallback> = match callback {
        Some(callback) => match Credentials::from_login(&callback).save(credentials_path) {
            Ok(()) => Ok(callback),
            Err(e) => Err(e.into()),
        },
        None => Err("login did not complete".into()),
    };

    if let Err(e) = listener.stop().await {
        warn!(error = %e, "Failed to stop login listener");
    }
    saved
}

fn logout(config: &CliConfig) -> CliResult {
    Credentials::clear(&config.credentials_path)?;
    println!("Logged out");
    Ok(())
}

async fn init(config: &CliConfig, key: String) -> CliResult {
    let api = ApiClient::new(config.endpoints.clone(), key.clone());
    if !api.ping().await? {
        return Err("the server rejected this API key".into());
    }

    let mut credentials = config.credentials()?;
    credentials.api_key = Some(key);
    credentials.save(&config.credentials_path)?;

    println!(
        "API key saved to {}",
        config.credentials_path.display()
    );
    Ok(())
}

async fn query(
    config: &CliConfig,
    key: String,
    task: Option<String>,
    model: Option<String>,
    mut data: Vec<String>,
    timeout: Option<Duration>,
) -> CliResult {
    let mut client = HulseClient::new(config.endpoints.clone()).with_credential(key);
    if let Some(timeout) = timeout {
        client = client.with_timeout(timeout);
    }

    let data = if data.len() == 1 {
        hulse_core::TaskData::Text(data.remove(0))
    } else {
        hulse_core::TaskData::Batch(data)
    };

    let result = client
        .query(task.as_deref(), model.as_deref(), data)
        .await?;
    println!("{}", serde_json::to_string_pretty(&result.payload)?);
    Ok(())
}

async fn host(
    config: &CliConfig,
    key: String,
    engine: CommandEngine,
    max_concurrent: usize,
    reconnect_delay: Duration,
) -> CliResult {
    let client = HulseClient::new(config.endpoints.clone()).with_credential(key);
    let producer = client
        .host(Arc::new(engine))?
        .with_max_concurrent(max_concurrent);

    println!("Starting your Hulse host 🚀");

    let serve = async {
        // Reconnection loop
        loop {
            match producer.run().await {
                Err(ClientError::Server { status }) if status == 401 || status == 403 => {
                    error!(status = status, "API key rejected, stopping host");
                    return Err::<(), Box<dyn Error>>(
                        ClientError::Server { status }.into(),
                    );
                }
                Err(e) => warn!(error = %e, "Host connection ended"),
                Ok(never) => match never {},
            }

            info!(
                delay_secs = reconnect_delay.as_secs(),
                "Reconnecting in {} seconds...",
                reconnect_delay.as_secs()
            );
            tokio::time::sleep(reconnect_delay).await;
        }
    };

    tokio::select! {
        result = serve => result,
        _ = tokio::signal::ctrl_c() => {
            let stats = producer.stats();
            info!(posted = stats.posted, skipped = stats.skipped, "Host stopped");
            Ok(())
        }
    }
}
