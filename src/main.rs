use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use slatefs::fuse::mount::mount_unprivileged;
use slatefs::{
    LocalFsBackend, LogConfig, ObjectBackend, ObjectClient, ObjectFs, S3Backend, S3Config,
};

#[derive(Parser)]
#[command(name = "slatefs", version, about = "S3-backed log-structured FUSE filesystem")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount a filesystem via FUSE.
    Mount(MountArgs),
}

#[derive(Args)]
struct MountArgs {
    /// Directory to mount the filesystem.
    #[arg(value_name = "MOUNT_POINT")]
    mount_point: PathBuf,

    /// Backing store to mount against.
    #[arg(long, value_enum, default_value = "local")]
    backend: BackendKind,

    /// Key prefix log objects are stored under.
    #[arg(long, default_value = "slatefs")]
    prefix: String,

    /// Local directory used as the object store (local backend).
    #[arg(long, value_name = "DIR", default_value = "./objects")]
    data_dir: PathBuf,

    /// S3 bucket name (s3 backend).
    #[arg(long)]
    bucket: Option<String>,

    /// Custom S3 endpoint, e.g. a MinIO URL (s3 backend).
    #[arg(long)]
    endpoint: Option<String>,

    /// AWS region (s3 backend).
    #[arg(long)]
    region: Option<String>,

    /// Static access key; falls back to the ambient credential chain.
    #[arg(long)]
    access_key: Option<String>,

    /// Static secret key; falls back to the ambient credential chain.
    #[arg(long)]
    secret_key: Option<String>,

    /// Use path-style bucket addressing (MinIO and friends).
    #[arg(long)]
    force_path_style: bool,

    /// Metadata-buffer flush threshold in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    meta_threshold: usize,

    /// Data-buffer flush threshold in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    data_threshold: usize,
}

#[derive(ValueEnum, Clone, Copy)]
enum BackendKind {
    Local,
    S3,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "slatefs=info".to_string()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Mount(args) => mount_cmd(args).await?,
    }

    Ok(())
}

async fn mount_cmd(args: MountArgs) -> anyhow::Result<()> {
    if !args.mount_point.exists() {
        std::fs::create_dir_all(&args.mount_point)?;
    }
    if !args.mount_point.is_dir() {
        anyhow::bail!("mount point must be a directory");
    }

    let cfg = LogConfig {
        meta_threshold: args.meta_threshold,
        data_threshold: args.data_threshold,
    };

    match args.backend {
        BackendKind::Local => {
            if !args.data_dir.exists() {
                std::fs::create_dir_all(&args.data_dir)?;
            }
            let backend = LocalFsBackend::new(&args.data_dir);
            run_mount(backend, &args, cfg).await
        }
        BackendKind::S3 => {
            let Some(bucket) = args.bucket.clone() else {
                anyhow::bail!("--bucket must be set when --backend s3");
            };
            let backend = S3Backend::with_config(S3Config {
                bucket,
                region: args.region.clone(),
                endpoint: args.endpoint.clone(),
                force_path_style: args.force_path_style,
                access_key: args.access_key.clone(),
                secret_key: args.secret_key.clone(),
                ..Default::default()
            })
            .await?;
            run_mount(backend, &args, cfg).await
        }
    }
}

async fn run_mount<B>(backend: B, args: &MountArgs, cfg: LogConfig) -> anyhow::Result<()>
where
    B: ObjectBackend + 'static,
{
    let client = ObjectClient::new(backend);
    let fs = ObjectFs::mount(client, args.prefix.clone(), cfg).await?;
    let handle = mount_unprivileged(fs, &args.mount_point).await?;

    println!("mounted at {}", args.mount_point.display());
    tokio::signal::ctrl_c().await?;
    println!("unmounting...");
    handle.unmount().await?;
    Ok(())
}
