use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yaolist_storage::config;
use yaolist_storage::storage::{
    Acl, BackendBox, ObjectLocator, OperationResult, PresignOptions, PutLargeOptions,
    ReturnTemplate, StorageManager,
};

#[derive(Parser, Debug)]
#[command(name = "yaolist-storage", about = "Object storage operations over configured backends")]
struct Cli {
    /// Config file, defaults to ./config.json / 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Target {
    /// Backend id from the config file / 后端ID
    #[arg(short, long)]
    backend: String,

    /// Bucket, defaults to the backend's bucket / 存储桶
    #[arg(long)]
    bucket: Option<String>,

    /// Object key / 对象键
    #[arg(short, long)]
    key: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured backends and available backend types
    Backends,
    /// Print build information
    Version,
    /// Upload a small file in one request
    Put {
        #[command(flatten)]
        target: Target,
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, value_parser = parse_acl, default_value = "default")]
        acl: Acl,
    },
    /// Upload a large file in parts
    PutLarge {
        #[command(flatten)]
        target: Target,
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
        /// Part size in bytes / 分片大小
        #[arg(long)]
        chunk_size: Option<u64>,
        #[arg(long)]
        parallelism: Option<usize>,
        #[arg(long, value_parser = parse_acl, default_value = "default")]
        acl: Acl,
    },
    /// Download an object to a file, or stdout
    Get {
        #[command(flatten)]
        target: Target,
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Delete an object
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// Rename an object within its bucket
    Move {
        #[command(flatten)]
        target: Target,
        /// New object key / 新对象键
        #[arg(long)]
        to: String,
    },
    /// Issue a direct-upload grant
    Presign {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 3600)]
        expires: u64,
        /// Reject the upload if the key exists / 禁止覆盖
        #[arg(long)]
        insert_only: bool,
        /// Ask the provider to return size, hash, name, type and url / 自定义返回体
        #[arg(long)]
        return_body: bool,
    },
    /// Issue a time-limited download URL
    PresignDownload {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },
    /// Schedule deletion after a number of days
    Lifecycle {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        days: u32,
    },
}

fn parse_acl(value: &str) -> Result<Acl, String> {
    match value {
        "default" => Ok(Acl::Default),
        "private" => Ok(Acl::Private),
        "public-read" => Ok(Acl::PublicRead),
        "public-read-write" => Ok(Acl::PublicReadWrite),
        other => Err(format!("unknown acl: {}", other)),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a result and turn failures into a non-zero exit / 输出结果
fn finish(result: OperationResult) -> anyhow::Result<()> {
    print_json(&result)?;
    if result.is_success() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn resolve(manager: &StorageManager, target: &Target) -> anyhow::Result<(BackendBox, ObjectLocator)> {
    let backend = match manager.get_backend(&target.backend).await {
        Some(backend) => backend,
        None => {
            let reason = manager
                .get_backend_error(&target.backend)
                .await
                .unwrap_or_else(|| "not configured".to_string());
            return Err(anyhow!("Backend {} unavailable: {}", target.backend, reason));
        }
    };
    let locator = match &target.bucket {
        Some(bucket) => ObjectLocator::new(bucket.as_str(), target.key.as_str()),
        None => backend.locator(&target.key),
    };
    Ok((backend, locator))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::get_config_path);
    let app_config = config::load_config(&config_path).map_err(|e| anyhow!(e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| app_config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let manager = yaolist_storage::build_manager(&app_config).await?;

    match cli.command {
        Commands::Version => {
            println!("yaolist-storage {} (built {})", env!("CARGO_PKG_VERSION"), env!("BUILD_TIME"));
            Ok(())
        }
        Commands::Backends => {
            let mut types = Vec::new();
            for backend_type in manager.list_backend_types().await {
                if let Some(info) = manager.backend_info(&backend_type).await {
                    types.push(info);
                }
            }
            print_json(&serde_json::json!({
                "backends": manager.list_backends().await,
                "errors": manager.get_all_backend_errors().await,
                "types": types,
            }))
        }
        Commands::Put { target, file, acl } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            finish(backend.put(&locator, Bytes::from(content), acl).await)
        }
        Commands::PutLarge { target, file, chunk_size, parallelism, acl } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            let mut options = PutLargeOptions::default()
                .acl(acl)
                .progress(Arc::new(|done, total| {
                    tracing::info!("Uploaded {}/{} bytes", done, total);
                }));
            if let Some(chunk_size) = chunk_size {
                options = options.chunk_size(chunk_size);
            }
            if let Some(parallelism) = parallelism {
                options = options.parallelism(parallelism);
            }
            finish(backend.put_large(&locator, &file, options).await)
        }
        Commands::Get { target, output } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            let mut reader = match backend.get(&locator).await {
                Ok(reader) => reader,
                Err(result) => return finish(result),
            };
            let written = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    tokio::io::copy(&mut reader, &mut file).await?
                }
                None => tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?,
            };
            tracing::info!("Downloaded {} bytes from {}", written, locator);
            Ok(())
        }
        Commands::Delete { target } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            finish(backend.delete(&locator).await)
        }
        Commands::Move { target, to } => {
            let (backend, from) = resolve(&manager, &target).await?;
            let to = ObjectLocator::new(from.bucket.as_str(), to);
            finish(backend.move_object(&from, &to).await)
        }
        Commands::Presign { target, expires, insert_only, return_body } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            let options = PresignOptions {
                insert_only,
                return_template: return_body.then(ReturnTemplate::standard),
            };
            match backend.presign(&locator, Duration::from_secs(expires), options).await {
                Ok(grant) => print_json(&grant),
                Err(result) => finish(result),
            }
        }
        Commands::PresignDownload { target, expires } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            match backend.presign_download(&locator, Duration::from_secs(expires)).await {
                Ok(url) => print_json(&serde_json::json!({ "url": url })),
                Err(result) => finish(result),
            }
        }
        Commands::Lifecycle { target, days } => {
            let (backend, locator) = resolve(&manager, &target).await?;
            match backend.set_lifecycle(&locator, days).await {
                Ok(job) => print_json(&job),
                Err(result) => finish(result),
            }
        }
    }
}
