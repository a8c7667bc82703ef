use clap::Parser;

use calltone::cli::{default_envfile_path, RunOptions};

#[derive(Parser)]
#[command(name = "calltone")]
#[command(about = "Per-call-type ringtones for a softphone host, driven over stdin/stdout")]
#[command(version)]
struct Args {
    /// Path to environment file
    #[arg(long)]
    envfile: Option<std::path::PathBuf>,

    /// Path of the preference file (overrides RING_STORE_PATH)
    #[arg(long, value_name = "PATH")]
    store: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let envfile = args.envfile.or_else(|| Some(default_envfile_path()));
    let options = RunOptions {
        envfile,
        store_path: args.store,
    };

    let code = calltone::run(options).await?;
    // The blocking stdin reader cannot be cancelled, so leave without
    // waiting for the runtime to wind down
    std::process::exit(code);
}
