pub mod types;

use std::process;

use tracing::{error, warn};

use types::{Opts, ServerConfig};

pub fn verify_opts(opts: &Opts) -> ServerConfig {
    let config = match ServerConfig::from_opts(opts) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {}", e);
            process::exit(1);
        }
    };

    if !opts.sanitize_filenames {
        warn!(
            "Client-supplied filenames are used as-is and may point outside {}. Pass \
             --sanitize-filenames to restrict them.",
            opts.directory
        );
    }

    config
}
