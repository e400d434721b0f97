use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use framenote::api::models::{
    ChatRequest, CreatePaymentRequest, DownloadQuality, DownloadUrlRequest, ExportFormat,
    JoinGroupRequest, ProcessOptions, Task, TaskStatus,
};
use framenote::chat::{ChatSink, DEFAULT_USER_ID};
use framenote::gateway::{DownloadProgress, DEFAULT_EXPIRES_IN};
use framenote::poller::{PaymentPoller, PaymentWatch, TaskPoller, TaskSource};
use framenote::{paths, ApiClient, Config, LocalStore, PollHandle, PollOutcome, PollState};

#[derive(Parser)]
#[command(name = "framenote")]
#[command(about = "Turn videos into notes with the FrameNote service")]
#[command(version)]
struct Cli {
    /// Config file (default: <app data>/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local video and print its task id
    Upload {
        file: PathBuf,
        /// Start processing right after the upload
        #[arg(long)]
        process: bool,
    },
    /// Submit a video page URL for download and processing
    SubmitUrl {
        url: String,
        /// fast | medium | slow
        #[arg(long, default_value = "medium")]
        quality: String,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Show what a video page URL points at without submitting it
    Preview {
        url: String,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Start the processing pipeline for an uploaded task
    Process {
        task_id: String,
        #[arg(long)]
        no_multimodal: bool,
        #[arg(long)]
        keep_temp: bool,
    },
    /// Show task status
    Status {
        task_id: String,
        /// Keep polling until the task completes or fails
        #[arg(long)]
        watch: bool,
        /// Task was created through submit-url
        #[arg(long)]
        download: bool,
    },
    Results {
        task_id: String,
        /// Only the ASR transcript
        #[arg(long)]
        asr: bool,
    },
    Notes {
        #[command(subcommand)]
        command: NotesCommand,
    },
    /// Stream a full-text summary of a processed task
    Summary {
        task_id: String,
    },
    /// Download notes as markdown, json or pdf
    Export {
        task_id: String,
        #[arg(long, default_value = "markdown")]
        format: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print a signed download URL for a task file
    Sign {
        task_id: String,
        path: String,
        #[arg(long, default_value_t = DEFAULT_EXPIRES_IN)]
        expires_in: u64,
    },
    /// Sign and download a task file
    Fetch {
        task_id: String,
        path: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Ask the notes agent, streaming the answer
    Chat {
        task_id: String,
        message: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Single-shot chat turn
    Ask {
        task_id: String,
        message: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Show or clear the agent conversation of a task
    History {
        task_id: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        clear: bool,
    },
    Platforms,
    Login {
        phone: String,
        #[arg(long)]
        password: String,
    },
    Sms {
        #[command(subcommand)]
        command: SmsCommand,
    },
    SetPassword {
        password: String,
    },
    Logout,
    Me,
    Membership,
    Pay {
        #[command(subcommand)]
        command: PayCommand,
    },
    Community {
        #[command(subcommand)]
        command: CommunityCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum NotesCommand {
    Get { task_id: String },
    /// Replace the notes with the contents of a markdown file
    Save { task_id: String, file: PathBuf },
}

#[derive(Subcommand)]
enum SmsCommand {
    Send { phone: String },
    Verify { phone: String, code: String },
}

#[derive(Subcommand)]
enum PayCommand {
    /// Create an order and print where to pay it
    Create {
        plan: String,
        #[arg(long, default_value = "alipay")]
        method: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        return_url: Option<String>,
        /// Wait for the order to settle
        #[arg(long)]
        wait: bool,
    },
    /// Confirm the pending order after returning from the provider
    Resume {
        /// The URL the provider redirected back to
        url: String,
    },
    Methods,
    /// Purchasable membership plans
    Plans,
    Usage,
}

#[derive(Subcommand)]
enum CommunityCommand {
    Qr,
    Join {
        user_id: String,
        level: String,
        #[arg(long)]
        wechat_id: Option<String>,
        #[arg(long)]
        nickname: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    /// Persist an API base override ("" for same-origin)
    SetBase { url: String },
    ClearBase,
}

struct AppContext {
    config: Config,
    client: ApiClient,
}

impl AppContext {
    fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => paths::get_config_path().map_err(anyhow::Error::msg)?,
        };
        let config = Config::load(&config_path)?;

        let db_path = config.database_path().map_err(anyhow::Error::msg)?;
        let store = LocalStore::open(&db_path)
            .with_context(|| format!("failed to open local store {:?}", db_path))?;
        let client = ApiClient::new(config.api.clone(), Arc::new(store))?;

        Ok(Self { config, client })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("framenote=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = AppContext::load(cli.config)?;
    let client = &ctx.client;

    match cli.command {
        Commands::Upload { file, process } => {
            let uploaded = client.upload_video(&file).await?;
            println!("{}", uploaded.task_id);
            if let Some(message) = uploaded.message {
                eprintln!("{}", message);
            }
            if process {
                client
                    .start_processing(&uploaded.task_id, &ProcessOptions::default())
                    .await?;
                eprintln!("Processing started");
            }
        }
        Commands::SubmitUrl {
            url,
            quality,
            platform,
        } => {
            let quality: DownloadQuality = serde_json::from_value(serde_json::Value::String(quality))
                .context("quality must be fast, medium or slow")?;
            let request = DownloadUrlRequest {
                url,
                quality,
                platform,
            };
            let submission = client.submit_url(&request).await?;
            println!("{}", submission.task_id);
            if let Some(title) = submission.title {
                eprintln!("{}", title);
            }
        }
        Commands::Preview { url, platform } => {
            let request = DownloadUrlRequest {
                platform,
                ..DownloadUrlRequest::new(url)
            };
            print_json(&client.preview_video(&request).await?)?;
        }
        Commands::Process {
            task_id,
            no_multimodal,
            keep_temp,
        } => {
            let options = ProcessOptions {
                enable_multimodal: !no_multimodal,
                keep_temp,
            };
            let reply = client.start_processing(&task_id, &options).await?;
            print_json(&reply)?;
        }
        Commands::Status {
            task_id,
            watch,
            download,
        } => {
            let source = if download {
                TaskSource::Download
            } else {
                TaskSource::Processing
            };
            if watch {
                let handle =
                    TaskPoller::spawn(client.clone(), &task_id, source, &ctx.config.polling, true)?;
                match watch_task(handle).await {
                    PollOutcome::Terminal(task) if task.status == TaskStatus::Failed => {
                        bail!(
                            "task {} failed: {}",
                            task.task_id,
                            task.error_message.unwrap_or_default()
                        );
                    }
                    PollOutcome::Cancelled => eprintln!("Stopped watching"),
                    _ => {}
                }
            } else {
                let task = TaskPoller::fetch_once(client, &task_id, source).await?;
                print_task(&task);
            }
        }
        Commands::Results { task_id, asr } => {
            if asr {
                print_json(&client.asr_result(&task_id).await?)?;
            } else {
                print_json(&client.results(&task_id).await?)?;
            }
        }
        Commands::Notes { command } => match command {
            NotesCommand::Get { task_id } => {
                println!("{}", client.notes(&task_id).await?);
            }
            NotesCommand::Save { task_id, file } => {
                let markdown = std::fs::read_to_string(&file)
                    .with_context(|| format!("cannot read {:?}", file))?;
                client.save_notes(&task_id, &markdown).await?;
                eprintln!("Saved");
            }
        },
        Commands::Export {
            task_id,
            format,
            output,
        } => {
            let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
            let dest = output.unwrap_or_else(|| {
                PathBuf::from(format!("{}.{}", task_id, format.extension()))
            });
            let bytes = client
                .export(&task_id, format, &dest, Some(print_progress))
                .await?;
            finish_progress(bytes, &dest);
        }
        Commands::Sign {
            task_id,
            path,
            expires_in,
        } => {
            let signed = client.sign_file(&task_id, &path, expires_in).await?;
            println!("{}", signed.absolute);
            eprintln!("expires at {}", signed.expires_at.to_rfc3339());
        }
        Commands::Fetch {
            task_id,
            path,
            output,
        } => {
            let dest = match output {
                Some(dest) => dest,
                None => default_fetch_dest(&path)?,
            };
            let bytes = client
                .fetch_file(&task_id, &path, &dest, Some(print_progress))
                .await?;
            finish_progress(bytes, &dest);
        }
        Commands::Summary { task_id } => {
            let print_piece = |text: &str| {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            };
            tokio::select! {
                result = client.stream_summary(&task_id, print_piece) => {
                    result?;
                    println!();
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!();
                    eprintln!("Interrupted");
                }
            }
        }
        Commands::Chat {
            task_id,
            message,
            user,
        } => {
            let mut sink = StdoutSink::default();
            tokio::select! {
                result = client.stream_chat(&task_id, &message, user.as_deref(), &mut sink) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!();
                    eprintln!("Interrupted");
                }
            }
        }
        Commands::Ask {
            task_id,
            message,
            user,
        } => {
            let request = ChatRequest::new(task_id, user.unwrap_or_else(|| DEFAULT_USER_ID.to_string()), message);
            let reply = client.send_message(&request).await?;
            println!("{}", reply.message);
            for suggestion in reply.suggestions.unwrap_or_default() {
                eprintln!("  - {}", suggestion);
            }
        }
        Commands::History {
            task_id,
            user,
            clear,
        } => {
            let user = user.unwrap_or_else(|| DEFAULT_USER_ID.to_string());
            if clear {
                client.clear_agent_session(&task_id, &user).await?;
                eprintln!("Cleared");
            } else {
                print_json(&client.chat_history(&task_id, &user).await?)?;
            }
        }
        Commands::Platforms => print_json(&client.supported_platforms().await?)?,
        Commands::Login { phone, password } => {
            let session = client.login(&phone, &password).await?;
            println!("Logged in as {}", session.user.nickname.unwrap_or(session.user.id));
        }
        Commands::Sms { command } => match command {
            SmsCommand::Send { phone } => {
                client.send_sms(&phone).await?;
                eprintln!("Code sent");
            }
            SmsCommand::Verify { phone, code } => {
                let session = client.verify_sms(&phone, &code).await?;
                println!("Logged in as {}", session.user.nickname.unwrap_or(session.user.id));
                if session.need_set_password {
                    eprintln!("No password yet; run `framenote set-password`");
                }
            }
        },
        Commands::SetPassword { password } => {
            client.set_password(&password).await?;
            eprintln!("Password set");
        }
        Commands::Logout => client.logout().await?,
        Commands::Me => print_json(&client.me().await?)?,
        Commands::Membership => print_json(&client.membership().await?)?,
        Commands::Pay { command } => match command {
            PayCommand::Create {
                plan,
                method,
                user,
                return_url,
                wait,
            } => {
                let mut request = CreatePaymentRequest::new(plan, method);
                request.user_id = user;
                request.return_url = return_url;

                let created = client.create_order(&request).await?;
                println!("{}", created.order_no);
                if let Some(url) = &created.payment_url {
                    eprintln!("Pay at: {}", url);
                }
                if let Some(qr) = &created.qr_code {
                    eprintln!("QR code: {}", qr);
                }
                if wait {
                    let policy = PaymentPoller::policy(&ctx.config.polling);
                    let watch = PaymentPoller::watch(client.clone(), &created.order_no, policy);
                    finish_payment(watch).await?;
                }
            }
            PayCommand::Resume { url } => {
                let watch = PaymentPoller::resume(client.clone(), &url, &ctx.config)?;
                finish_payment(watch).await?;
            }
            PayCommand::Methods => print_json(&client.payment_methods().await?)?,
            PayCommand::Plans => print_json(&client.membership_plans().await?)?,
            PayCommand::Usage => print_json(&client.usage_today().await?)?,
        },
        Commands::Community { command } => match command {
            CommunityCommand::Qr => println!("{}", client.community_qr().await?),
            CommunityCommand::Join {
                user_id,
                level,
                wechat_id,
                nickname,
            } => {
                let request = JoinGroupRequest {
                    user_id,
                    membership_level: level,
                    wechat_id,
                    nickname,
                };
                print_json(&client.join_group(&request).await?)?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommand::Show => {
                print!("{}", ctx.config.to_toml_string()?);
                eprintln!("effective api base: {:?}", client.api_base());
            }
            ConfigCommand::SetBase { url } => {
                client.set_api_base(&url)?;
                eprintln!("api base: {:?}", client.api_base());
            }
            ConfigCommand::ClearBase => {
                client.clear_api_base()?;
                eprintln!("api base: {:?}", client.api_base());
            }
        },
    }

    Ok(())
}

/// Print task transitions until the poller stops or Ctrl-C
async fn watch_task(handle: PollHandle<Task>) -> PollOutcome<Task> {
    let mut updates = handle.updates();
    let printer = async {
        while let Some(state) = updates.next().await {
            match state {
                PollState::Idle => {}
                PollState::Status(task) => print_task(&task),
                PollState::Failed { error, .. } if error.is_recoverable() => {
                    eprintln!("poll failed, retrying: {}", error)
                }
                PollState::Failed { error, .. } => eprintln!("poll rejected: {}", error),
            }
        }
    };

    tokio::select! {
        _ = printer => {}
        _ = tokio::signal::ctrl_c() => handle.cancel(),
    }
    handle.wait().await
}

async fn finish_payment(watch: PaymentWatch) -> Result<()> {
    eprintln!("Waiting for order {} ...", watch.order_no());
    tokio::select! {
        _ = wait_for_stop(&watch) => {}
        _ = tokio::signal::ctrl_c() => watch.cancel(),
    }

    let result = watch.finish().await?;
    match &result.outcome {
        PollOutcome::Terminal(order) => {
            println!("{}", order.status);
            if let Some(membership) = &result.membership {
                print_json(membership)?;
            }
            if !result.succeeded() {
                bail!("payment {}", order.status);
            }
        }
        PollOutcome::TimedOut { .. } => {
            bail!("payment not confirmed in time; run `framenote pay resume` again later")
        }
        PollOutcome::Cancelled | PollOutcome::Stopped { .. } => eprintln!("Stopped waiting"),
    }
    Ok(())
}

async fn wait_for_stop(watch: &PaymentWatch) {
    let mut updates = watch.handle().updates();
    while updates.next().await.is_some() {}
}

fn print_task(task: &Task) {
    let progress = task
        .progress
        .map(|p| format!(" {:.0}%", p * 100.0))
        .unwrap_or_default();
    let step = task
        .current_step
        .as_deref()
        .map(|s| format!(" [{}]", s))
        .unwrap_or_default();
    println!("{} {}{}{}", task.task_id, task.status, step, progress);
    if let Some(message) = &task.error_message {
        eprintln!("  {}", message);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_progress(progress: DownloadProgress) {
    match progress.percent {
        Some(percent) => eprint!("\r{:5.1}%  {:.2} MB/s", percent, progress.speed_mbps),
        None => eprint!("\r{} bytes  {:.2} MB/s", progress.downloaded, progress.speed_mbps),
    }
    let _ = std::io::stderr().flush();
}

fn finish_progress(bytes: u64, dest: &Path) {
    eprintln!();
    eprintln!("Wrote {} bytes to {}", bytes, dest.display());
}

fn default_fetch_dest(relative_path: &str) -> Result<PathBuf> {
    let name = Path::new(relative_path)
        .file_name()
        .context("path has no file name")?;
    let dir = paths::get_downloads_dir().map_err(anyhow::Error::msg)?;
    Ok(dir.join(name))
}

/// Writes deltas to stdout as they arrive
#[derive(Default)]
struct StdoutSink {
    sources: Vec<String>,
}

impl ChatSink for StdoutSink {
    fn on_delta(&mut self, delta: &str) {
        print!("{}", delta);
        let _ = std::io::stdout().flush();
    }

    fn on_sources(&mut self, sources: &[String]) {
        self.sources.extend_from_slice(sources);
    }

    fn on_error(&mut self, message: &str) {
        eprintln!();
        eprintln!("[agent error] {}", message);
    }

    fn on_done(&mut self) {
        println!();
        for source in &self.sources {
            eprintln!("  source: {}", source);
        }
    }
}
