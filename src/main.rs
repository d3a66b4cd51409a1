use clap::{ArgAction, Parser, Subcommand};
use dropupload::api::drive::{download_url, open_download};
use dropupload::db::Store;
use dropupload::error::{UploadError, UploadResult};
use dropupload::settings;
use dropupload::telemetry;
use dropupload::upload_manager::{
    CancelOutcome, CredentialProvider, DropPayload, NodeCache, UploadManager, UploadState,
};
use dropupload::UploaderConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dropupload")]
#[command(about = "Upload files and folder trees to a drive service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store the api key used for every request
    Login {
        #[arg(long)]
        api_key: String,
    },
    /// Forget the stored api key
    Logout,
    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Upload files and directories under a remote parent
    Upload {
        /// Remote parent id that receives the top-level entries
        #[arg(long)]
        parent: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Open the download link of a node in the browser
    Download {
        #[arg(long)]
        id: String,
        /// Print the link instead of opening it
        #[arg(long)]
        print: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    SetEndpoint { url: String },
    SetTimeout { secs: u64 },
    SetRollback {
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_logging();
    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> UploadResult<ExitCode> {
    let store = Store::open_default()?;
    match command {
        Command::Login { api_key } => {
            store.save_api_key(&api_key)?;
            println!("api key saved to {}", store.path().display());
        }
        Command::Logout => {
            store.clear_api_key()?;
            println!("signed out");
        }
        Command::Config { action } => configure(&store, action)?,
        Command::Upload { parent, paths } => return upload(store, parent, paths).await,
        Command::Download { id, print } => {
            let config = UploaderConfig::load(&store)?;
            if print {
                println!("{}", download_url(&config.api_endpoint, &id, &store.api_key()?)?);
            } else {
                let url = open_download(&config, &store, &id)?;
                println!("opened {url}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn configure(store: &Store, action: ConfigAction) -> UploadResult<()> {
    match action {
        ConfigAction::Show => {
            let config = UploaderConfig::load(store)?;
            println!("api_endpoint         = {}", config.api_endpoint);
            println!("request_timeout_secs = {}", config.request_timeout.as_secs());
            println!("rollback_on_failure  = {}", config.rollback_on_failure);
            println!(
                "signed_in            = {}",
                store.load_api_key()?.is_some()
            );
        }
        ConfigAction::SetEndpoint { url } => {
            let url = settings::set_api_endpoint(store, &url)?;
            println!("api_endpoint = {url}");
        }
        ConfigAction::SetTimeout { secs } => {
            let secs = settings::set_request_timeout(store, secs)?;
            println!("request_timeout_secs = {secs}");
        }
        ConfigAction::SetRollback { enabled } => {
            let enabled = settings::set_rollback_on_failure(store, enabled)?;
            println!("rollback_on_failure = {enabled}");
        }
    }
    Ok(())
}

async fn upload(store: Store, parent: String, paths: Vec<PathBuf>) -> UploadResult<ExitCode> {
    let config = UploaderConfig::load(&store)?;
    let credentials: Arc<dyn CredentialProvider> = Arc::new(store);
    let manager = UploadManager::from_config(&config, credentials, Arc::new(NodeCache::new()))?;

    let payload = DropPayload::from_paths(&paths).await;
    let progress = manager.subscribe_progress();
    let printer = std::thread::spawn(move || {
        for update in progress {
            eprintln!(
                "[{}] {}/{} bytes",
                update.state, update.done_bytes, update.total_bytes
            );
            if update.state.is_terminal() {
                break;
            }
        }
    });

    let session = manager.create_session();
    let mut runner = {
        let manager = manager.clone();
        let session = session.clone();
        tokio::spawn(async move { manager.run_session(&session, &parent, payload).await })
    };

    let mut interrupted = false;
    let joined = loop {
        tokio::select! {
            joined = &mut runner => break joined,
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    // 第二次 Ctrl-C 不再等待回滚
                    runner.abort();
                    eprintln!("upload interrupted");
                    return Ok(ExitCode::from(130));
                }
                interrupted = true;
                // 回滚在后台进行，循环继续监听第二次 Ctrl-C
                let manager = manager.clone();
                let id = session.id().to_string();
                tokio::spawn(async move {
                    match manager.request_cancel(&id).await {
                        Ok(CancelOutcome::Cancelled) => eprintln!("cancelling upload..."),
                        Ok(CancelOutcome::Deferred) => {
                            eprintln!("upload will be cancelled once sending starts")
                        }
                        Err(err) => tracing::warn!("cannot cancel upload: {err}"),
                    }
                });
            }
        }
    };
    let outcome =
        joined.map_err(|e| UploadError::Transport(format!("upload task stopped: {e}")))?;

    let snapshot = session.snapshot();
    drop(session);
    drop(manager);
    let _ = printer.join();

    match outcome {
        Ok(()) => {
            println!(
                "uploaded {} file(s), {} folder(s)",
                snapshot.file_names.len(),
                snapshot.directory_names.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(_) if snapshot.state == UploadState::Aborted => {
            println!("upload aborted");
            Ok(ExitCode::from(130))
        }
        Err(err) => Err(err),
    }
}
