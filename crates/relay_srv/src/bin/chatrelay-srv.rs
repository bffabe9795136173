//! The binary chatrelay-srv.

use chatrelay_srv::*;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// By default chatrelay-srv runs in "testing" configuration, bound
    /// to localhost on an ephemeral port with a small worker pool.
    ///
    /// The "production" configuration listens on port 8080 on all
    /// interfaces and sizes the worker pool from the cpu count.
    #[arg(long)]
    pub production: bool,

    /// Override the address(es) to listen on. May be repeated.
    #[arg(long)]
    pub listen: Vec<std::net::SocketAddr>,

    /// Keep the log, presence table and topic in this directory so they
    /// survive a restart. Without it, relay state lives in memory only.
    #[arg(long)]
    pub data_dir: Option<std::path::PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(
                    tracing_subscriber::filter::LevelFilter::INFO.into(),
                )
                .from_env_lossy(),
        )
        .init();

    let args = <Args as clap::Parser>::parse();

    let mut config = if args.production {
        Config::production()
    } else {
        Config::testing()
    };

    if !args.listen.is_empty() {
        config.listen_address_list = args.listen.clone();
    }

    if args.data_dir.is_some() {
        config.data_dir = args.data_dir.clone();
    }

    tracing::info!(?args, ?config, "starting");

    let (send, recv) = std::sync::mpsc::channel();

    if let Err(err) = ctrlc::set_handler(move || {
        let _ = send.send(());
    }) {
        eprintln!("failed to install ctrl-c handler: {err}");
        std::process::exit(1);
    }

    let srv = match RelaySrv::new(config) {
        Ok(srv) => srv,
        Err(err) => {
            eprintln!("failed to start relay: {err}");
            std::process::exit(1);
        }
    };

    srv.print_addrs();

    let _ = recv.recv();

    println!("Terminating...");
    drop(srv);
    println!("Done.");
    std::process::exit(0);
}
