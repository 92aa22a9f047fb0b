//! The plain launcher (spec §6, "CLI surface").

use clap::Parser;
use dflow_cli::{run_launcher, LauncherArgs};

#[tokio::main]
async fn main() {
    let args = LauncherArgs::parse();
    std::process::exit(run_launcher(args).await);
}
