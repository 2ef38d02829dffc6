use std::process;
use std::sync::Arc;

use argparse::{ArgumentParser, Store, StoreTrue};
use log::{error, info};
use wampire::router::Router;

struct Options {
    port: u16,
    log_to_file: bool,
}

fn parse_args() -> Options {
    let mut port = 8888u16;
    let mut log_to_file = false;
    {
        let mut parser = ArgumentParser::new();
        parser.set_description("A WAMP v2 JSON router implementing the basic profile.");
        parser
            .refer(&mut port)
            .add_option(&["-p", "--port"], Store, "Port to listen on (default 8888)");
        parser.refer(&mut log_to_file).add_option(
            &["--log"],
            StoreTrue,
            "Redirect logging to server.log instead of stderr",
        );
        parser.parse_args_or_exit();
    }
    Options { port, log_to_file }
}

fn init_logging(options: &Options) {
    if options.log_to_file {
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open("server.log")
                .expect("failed to open server.log"),
        );
        env_logger::Builder::from_default_env()
            .target(env_logger::Target::Pipe(target))
            .init();
    } else {
        env_logger::init();
    }
}

#[tokio::main]
async fn main() {
    let options = parse_args();
    init_logging(&options);

    let router = match Router::new().await {
        Ok(router) => router,
        Err(e) => {
            error!("failed to start router: {}", e);
            process::exit(1);
        }
    };

    let addr = format!("127.0.0.1:{}", options.port);
    let listen_router = router.clone();
    let listen_addr = addr.clone();
    let listener = tokio::spawn(async move {
        if let Err(e) = wampire::server::listen(listen_router, &listen_addr).await {
            error!("server loop exited: {}", e);
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining sessions");
    listener.abort();
    shutdown(router).await;
}

async fn shutdown(router: Arc<Router>) {
    router.shutdown().await;
    info!("router stopped");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
        _ = sigquit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
