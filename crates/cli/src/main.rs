use clap::{Args, Parser, Subcommand};
use opsync::api::OpenPhoneClient;
use opsync::config::{self, NEW_MESSAGE_WEBHOOK_PATH};
use opsync::export::{
    self, ExportOptions, RetryOptions, DEFAULT_FAILED_OUTPUT, DEFAULT_OUTPUT,
    DEFAULT_RECOVERED_OUTPUT,
};
use opsync::sink::FileSink;
use opsync::webhook::{self, LoggingHandler, Registration, WebhookRequest};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "opsync")]
#[command(about = "Export an OpenPhone account to JSON and receive new-message webhooks", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Without a subcommand, runs the export.
    #[command(flatten)]
    export: ExportArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone)]
struct ExportArgs {
    /// Export at most N users (default: all)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    max_count: Option<u64>,

    /// Consolidated document path
    #[arg(long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Failure ledger path (written only when something failed)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_FAILED_OUTPUT)]
    failed_output: PathBuf,

    /// Config file path (default: OPSYNC_CONFIG_PATH or ~/.opsync/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Walk every user, phone number, conversation, message, call and transcript into one JSON document.
    Export(ExportArgs),

    /// Reissue the fetches recorded in a failure ledger.
    Retry {
        /// Ledger written by a previous run
        #[arg(long, value_name = "PATH", default_value = DEFAULT_FAILED_OUTPUT)]
        input: PathBuf,

        /// Where the recovered fragments go
        #[arg(long, value_name = "PATH", default_value = DEFAULT_RECOVERED_OUTPUT)]
        output: PathBuf,

        /// Ledger for fetches that fail again
        #[arg(long, value_name = "PATH", default_value = DEFAULT_FAILED_OUTPUT)]
        failed_output: PathBuf,

        /// Config file path (default: OPSYNC_CONFIG_PATH or ~/.opsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the webhook receiver for message.received events.
    Serve {
        /// Config file path (default: OPSYNC_CONFIG_PATH or ~/.opsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Listen port (default from config, OPENPHONE_WEBHOOK_PORT, or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Create the message.received webhook, or reuse one that already points at this receiver.
    SetupWebhook {
        /// Public base URL of the receiver (default: OPENPHONE_WEBHOOK_BASE_URL)
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        /// Webhook label
        #[arg(long, default_value_t = NEW_MESSAGE_WEBHOOK_PATH.trim_start_matches('/').to_string())]
        label: String,

        /// Owning user id
        #[arg(long, value_name = "ID")]
        user_id: Option<String>,

        /// Comma-separated phone number ids ("*" for all numbers)
        #[arg(long, value_name = "IDS")]
        resource_ids: Option<String>,

        /// Config file path (default: OPSYNC_CONFIG_PATH or ~/.opsync/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("opsync {}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            if let Err(e) = run_export(cli.export).await {
                log::error!("export failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Export(args)) => {
            if let Err(e) = run_export(args).await {
                log::error!("export failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Retry {
            input,
            output,
            failed_output,
            config,
        }) => {
            let options = RetryOptions {
                input,
                output,
                failed_output,
            };
            if let Err(e) = run_retry(config, options).await {
                log::error!("retry failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::SetupWebhook {
            base_url,
            label,
            user_id,
            resource_ids,
            config,
        }) => {
            if let Err(e) = run_setup_webhook(config, base_url, label, user_id, resource_ids).await {
                log::error!("setup-webhook failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn api_client(config: &config::Config) -> anyhow::Result<OpenPhoneClient> {
    let api_key = config::require_api_key(config)?;
    OpenPhoneClient::new(&config.api, &api_key)
}

async fn run_export(args: ExportArgs) -> anyhow::Result<()> {
    let (config, _) = config::load_config(args.config)?;
    let client = api_client(&config)?;
    let options = ExportOptions {
        max_count: args
            .max_count
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
        output: args.output,
        failed_output: args.failed_output,
    };
    let summary =
        export::run_export(&client, &config.retry.policy(), &options, &mut FileSink).await?;
    println!(
        "exported {} user(s) to {}",
        summary.users,
        options.output.display()
    );
    if summary.ledger_written {
        println!(
            "{} fetch(es) failed; run `opsync retry --input {}` to reissue them",
            summary.failures,
            options.failed_output.display()
        );
    }
    Ok(())
}

async fn run_retry(config_path: Option<PathBuf>, options: RetryOptions) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let ledger = opsync::ledger::read_ledger(&options.input)?;
    if ledger.failures.is_empty() {
        println!("nothing to retry in {}", options.input.display());
        return Ok(());
    }
    let client = api_client(&config)?;
    let summary = export::run_retry(
        &client,
        &config.retry.policy(),
        ledger.failures,
        &options,
        &mut FileSink,
    )
    .await?;
    println!(
        "recovered {}/{} task(s) into {}",
        summary.complete,
        summary.tasks,
        options.output.display()
    );
    if summary.ledger_written {
        println!(
            "{} fetch(es) still failing; see {}",
            summary.still_failing,
            options.failed_output.display()
        );
    }
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, _) = config::load_config(config_path)?;
    if let Some(p) = port {
        config.webhook.port = p;
    }
    let secret = config::resolve_webhook_secret(&config).ok_or_else(|| {
        anyhow::anyhow!(
            "OPENPHONE_WEBHOOK_SIGNING_SECRET is required for webhook signature verification"
        )
    })?;
    webhook::run_receiver(&config.webhook, &secret, Arc::new(LoggingHandler)).await
}

async fn run_setup_webhook(
    config_path: Option<PathBuf>,
    base_url: Option<String>,
    label: String,
    user_id: Option<String>,
    resource_ids: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    config::validate_webhook(&config.webhook)?;
    let client = api_client(&config)?;
    let base_url = base_url
        .filter(|s| !s.trim().is_empty())
        .or_else(|| config::resolve_webhook_base_url(&config))
        .ok_or_else(|| {
            anyhow::anyhow!("missing base URL (set OPENPHONE_WEBHOOK_BASE_URL or pass --base-url)")
        })?;
    let request = WebhookRequest {
        url: webhook::build_webhook_url(&base_url, &config.webhook.path),
        label: Some(label).filter(|s| !s.trim().is_empty()),
        user_id,
        resource_ids: resource_ids
            .as_deref()
            .map(webhook::parse_resource_ids)
            .unwrap_or_default(),
    };
    let registration = webhook::ensure_message_received_webhook(&client, &request).await?;
    let verb = match registration {
        Registration::Existing(_) => "reusing",
        Registration::Created(_) => "created",
    };
    let hook = registration.webhook();
    println!(
        "{} webhook {} for {} (status={})",
        verb,
        hook.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
        request.url,
        hook.get("status").and_then(|v| v.as_str()).unwrap_or("unknown")
    );
    Ok(())
}
