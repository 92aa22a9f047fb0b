//! The Tcl-scripting launcher (spec §6, "CLI surface"). The original's
//! embedded Tcl interpreter is out of this core's scope (spec §1), so
//! this entry point runs the same plain-text script format `dflow-run`
//! does; the two binaries exist only to preserve "two launchers exist".

use clap::Parser;
use dflow_cli::{run_launcher, LauncherArgs};

#[tokio::main]
async fn main() {
    let args = LauncherArgs::parse();
    std::process::exit(run_launcher(args).await);
}
