//! Shared launcher plumbing for the `dflow-run` and `dflow-tclsh`
//! binaries (spec §6, "CLI surface"). The two launchers share every line
//! of behavior here: the only historical difference between them was the
//! embedded scripting front end, which is out of this core's scope (spec
//! §1), so both binaries run the same plain-text script format and exist
//! only as two separate entry points, matching "two launchers exist".

pub mod error;
pub mod launcher;
pub mod script;

pub use error::{Result, ScriptError};
pub use launcher::{run_launcher, LauncherArgs};
