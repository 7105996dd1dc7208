#[macro_use]
extern crate lazy_static;

mod http;
mod opts;
mod store;

use clap::Parser;

use std::process;
use std::sync::mpsc;
use std::thread;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use http::listing::ListingService;
use http::upload::UploadReceiver;
use http::{shutdown_pipe, Endpoint, Service, ShutdownSignal};
use opts::types::Opts;
use store::UploadDir;

type EndpointResult = (&'static str, Result<(), http::types::ServerError>);

fn spawn_endpoint<S: Service>(
    endpoint: Endpoint<S>,
    shutdown: ShutdownSignal,
    done: mpsc::Sender<EndpointResult>,
) -> thread::JoinHandle<()> {
    let name = endpoint.name();
    let spawned = thread::Builder::new()
        .name(format!("{}-accept", name))
        .spawn(move || {
            let res = endpoint.run(shutdown);
            let _ = done.send((name, res));
        });
    match spawned {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start the {} endpoint: {}", name, e);
            process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();

    let opts: Opts = Opts::parse();
    let config = opts::verify_opts(&opts);

    let store = match UploadDir::open(&config.upload_dir) {
        Ok(store) => store,
        Err(e) => {
            error!(
                "Failed to open upload directory {}: {}",
                config.upload_dir.display(),
                e
            );
            process::exit(1);
        }
    };

    let (trigger, signal) = match shutdown_pipe() {
        Ok(pipe) => pipe,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let upload = Endpoint::bind(
        config.upload_addr,
        UploadReceiver::new(&config, store.clone()),
        config.read_timeout,
    );
    let listing = Endpoint::bind(
        config.listing_addr,
        ListingService::new(store),
        config.read_timeout,
    );
    let (upload, listing) = match (upload, listing) {
        (Ok(upload), Ok(listing)) => (upload, listing),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to start: {}", e);
            process::exit(1);
        }
    };

    info!(
        "Storing uploads in {}; upload endpoint on {}, listing on {}",
        config.upload_dir.display(),
        config.upload_addr,
        config.listing_addr
    );

    let (done_tx, done_rx) = mpsc::channel();
    let handles = vec![
        spawn_endpoint(upload, signal.clone(), done_tx.clone()),
        spawn_endpoint(listing, signal, done_tx),
    ];

    // Either endpoint stopping takes the other down with it
    if let Ok((name, res)) = done_rx.recv() {
        match res {
            Ok(()) => info!("The {} endpoint stopped", name),
            Err(e) => error!("The {} endpoint failed: {}", name, e),
        }
    }
    trigger.trigger();

    for handle in handles {
        let _ = handle.join();
    }
    for (name, res) in done_rx.try_iter() {
        if let Err(e) = res {
            error!("The {} endpoint failed: {}", name, e);
        }
    }
}
