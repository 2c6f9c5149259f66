#![cfg(not(tarpaulin_include))]

use clap::Parser;
use dataflow::app;
use dataflow::config::{
    Config, DEFAULT_BIND, DEFAULT_EXPORT_DIR, DEFAULT_SESSION_IDLE_SECS, DEFAULT_SESSION_ROOT,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(about = "DataFlow web server: upload, filter, edit, clean, chart and export tables.")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "DATAFLOW_BIND", default_value = DEFAULT_BIND)]
    bind: String,

    /// Directory holding one sub-directory per session.
    #[arg(long, env = "DATAFLOW_SESSION_DIR", default_value = DEFAULT_SESSION_ROOT)]
    session_dir: PathBuf,

    /// Name of the per-session artifact directory.
    #[arg(long, default_value = DEFAULT_EXPORT_DIR)]
    export_dir: String,

    /// Seconds of inactivity after which a session is dropped from memory.
    #[arg(long, env = "DATAFLOW_SESSION_IDLE", default_value_t = DEFAULT_SESSION_IDLE_SECS)]
    session_idle: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let args = Args::parse();

    let config = Config {
        bind_addr: args.bind,
        session_root: args.session_dir,
        export_dir_name: args.export_dir,
        session_idle: Duration::from_secs(args.session_idle),
    };
    log::info!("sessions stored under {}", config.session_root.display());
    app::run(config).await
}
