//! Entry point of the `tvshim` binary, which the DVR invokes in place of its
//! transcoder. Arguments are taken verbatim; there is no option parsing here.

use std::ffi::OsString;

use tracing::error;
use tvshim_core::journal;
use tvshim_core::{load_shim_config, Invocation, LoggingSection};

const FAILURE: i32 = 1;

/// Runs one invocation and returns the process exit code.
pub fn main_with_args<I>(args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let args: Vec<String> = args
        .into_iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    let config = match load_shim_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("tvshim: {err}");
            return FAILURE;
        }
    };

    if let Err(err) = journal::init(&config.logging) {
        eprintln!("tvshim: {err}; logging to stderr instead");
        let fallback = LoggingSection {
            enabled: false,
            ..config.logging.clone()
        };
        let _ = journal::init(&fallback);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("tvshim: failed to start runtime: {err}");
            return FAILURE;
        }
    };

    let invocation = Invocation::new(config);
    let code = match runtime.block_on(invocation.run(args)) {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "invocation failed");
            eprintln!("tvshim: {err}");
            FAILURE
        }
    };
    // the control reader may still be parked on stdin
    runtime.shutdown_background();
    code
}
