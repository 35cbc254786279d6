//! delegate-runner: provision CI task groups as Kubernetes Pods

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use delegate_k8s_runner::domain::entities::EncryptedSecret;
use delegate_k8s_runner::services::encryption::{create_secret_decryptor, DecryptedSecrets};
use delegate_k8s_runner::{
    AppError, ClusterClient, KubeClusterClient, RunnerConfig, SecretDecryptor, TaskDescriptor,
    TaskRunner,
};
use k8s_openapi::api::core::v1::{Pod, Secret};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Delegate Kubernetes task runner
#[derive(Parser)]
#[command(name = "delegate-runner")]
#[command(about = "Provision CI task groups as Kubernetes Pods")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runner configuration file (YAML or JSON); defaults to the environment
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the target namespace
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GroupArgs {
    /// Task group id
    #[arg(short, long)]
    group: String,

    /// Task descriptor list (YAML or JSON)
    #[arg(short, long)]
    tasks: PathBuf,

    /// Execution infrastructure (YAML or JSON)
    #[arg(short, long)]
    infra: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the Secrets and the Pod a task group would get, secret data redacted
    Render(GroupArgs),

    /// Create the task group's Secrets and Pod in the cluster
    Provision(GroupArgs),

    /// Hand the task group over for execution
    Execute {
        #[arg(short, long)]
        group: String,
    },

    /// Tear down a task group
    Cleanup {
        #[arg(short, long)]
        group: String,
    },
}

/// Cluster stand-in for commands that never create anything
struct OfflineCluster;

#[async_trait]
impl ClusterClient for OfflineCluster {
    async fn create_secret(&self, _: &str, _: &Secret, _: &str) -> delegate_k8s_runner::Result<Secret> {
        Err(AppError::UnsupportedOperation(
            "no cluster connection in offline mode".to_string(),
        ))
    }

    async fn create_pod(&self, _: &str, _: &Pod, _: &str) -> delegate_k8s_runner::Result<Pod> {
        Err(AppError::UnsupportedOperation(
            "no cluster connection in offline mode".to_string(),
        ))
    }

    async fn delete_secret(&self, _: &str, _: &str) -> delegate_k8s_runner::Result<()> {
        Err(AppError::UnsupportedOperation(
            "no cluster connection in offline mode".to_string(),
        ))
    }
}

/// Decryptor for commands that never read secrets, so no key is required
struct NoKeyDecryptor;

#[async_trait]
impl SecretDecryptor for NoKeyDecryptor {
    async fn decrypt(&self, _: &EncryptedSecret) -> delegate_k8s_runner::Result<DecryptedSecrets> {
        Err(AppError::DecryptionError(
            "no secret key is configured for this command".to_string(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RunnerConfig::from_env().context("Failed to load configuration from environment")?,
    };
    if let Some(namespace) = cli.namespace {
        config = config.with_namespace(namespace);
    }

    match cli.command {
        Commands::Render(args) => render(config, args).await,
        Commands::Provision(args) => provision(config, args).await,
        Commands::Execute { group } => {
            let runner = keyless_runner(config)?;
            runner.execute(&group, &[]).await?;
            Ok(())
        }
        Commands::Cleanup { group } => {
            let runner = keyless_runner(config)?;
            runner.cleanup(&group).await?;
            Ok(())
        }
    }
}

fn offline_runner(config: RunnerConfig) -> Result<TaskRunner> {
    let decryptor = create_secret_decryptor().context("Failed to set up secret decryption")?;
    Ok(TaskRunner::new(config, decryptor, Arc::new(OfflineCluster))?)
}

/// Runner for `execute` and `cleanup`, which touch neither secrets nor the
/// cluster
fn keyless_runner(config: RunnerConfig) -> Result<TaskRunner> {
    Ok(TaskRunner::new(
        config,
        Arc::new(NoKeyDecryptor),
        Arc::new(OfflineCluster),
    )?)
}

fn load_inputs(args: &GroupArgs) -> Result<(Vec<TaskDescriptor>, Vec<u8>)> {
    let tasks = read(&args.tasks)?;
    let tasks: Vec<TaskDescriptor> = serde_yaml::from_slice(&tasks)
        .with_context(|| format!("Failed to parse tasks from {}", args.tasks.display()))?;
    let infra = read(&args.infra)?;
    Ok((tasks, infra))
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn render(config: RunnerConfig, args: GroupArgs) -> Result<()> {
    let (tasks, infra) = load_inputs(&args)?;
    let runner = offline_runner(config)?;
    let plan = runner.plan(&args.group, &tasks, &infra).await?.redacted();

    let mut documents = Vec::new();
    for secret in plan.secrets() {
        documents.push(serde_yaml::to_string(secret).context("Failed to render secret")?);
    }
    documents.push(serde_yaml::to_string(&plan.pod).context("Failed to render pod")?);
    println!("{}", documents.join("---\n"));
    Ok(())
}

async fn provision(config: RunnerConfig, args: GroupArgs) -> Result<()> {
    let (tasks, infra) = load_inputs(&args)?;
    let decryptor = create_secret_decryptor().context("Failed to set up secret decryption")?;
    let cluster = KubeClusterClient::connect()
        .await
        .context("Failed to connect to the Kubernetes API")?;
    let runner = TaskRunner::new(config, decryptor, Arc::new(cluster))?;

    let pod = runner.init(&args.group, &tasks, &infra).await?;
    info!(
        "Task group {} is {}",
        args.group,
        runner.state(&args.group).await
    );
    println!("{}", serde_json::to_string_pretty(&pod)?);
    Ok(())
}
