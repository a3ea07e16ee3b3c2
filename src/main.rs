//! ferrod - an in-memory IRC server daemon.

use std::process::ExitCode;
use std::rc::Rc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ferrod::config::Config;
use ferrod::logging::{LogLevel, TracingStream};
use ferrod::network;
use ferrod::server::Server;

const DEFAULT_CONFIG: &str = "ferrod.conf";

struct CmdLine {
    config_path: String,
    nolog: bool,
    debug: bool,
}

fn parse_args() -> Result<CmdLine, String> {
    let mut cmdline = CmdLine {
        config_path: DEFAULT_CONFIG.to_string(),
        nolog: false,
        debug: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--nolog" => cmdline.nolog = true,
            "--debug" => cmdline.debug = true,
            "--config" => {
                cmdline.config_path = args
                    .next()
                    .ok_or_else(|| "--config requires a path".to_string())?;
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(cmdline)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cmdline = match parse_args() {
        Ok(c) => c,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::load(&cmdline.config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %cmdline.config_path, "failed to load config: {err}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        server = %config.server.name,
        network = %config.server.network,
        sid = %config.server.sid,
        "starting ferrod"
    );

    let bind = config.value("bind");
    let address = bind.get_string("address", "127.0.0.1");
    let port = bind.get_uint("port", 6667, 1, 65535);
    let listen_addr = format!("{address}:{port}");

    // The engine is single-threaded by design; the runtime matches.
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            error!("failed to build runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    let local = tokio::task::LocalSet::new();
    let result: std::io::Result<()> = local.block_on(&runtime, async {
        let server = build_server(config, &cmdline);
        let listener = TcpListener::bind(&listen_addr).await?;
        info!(address = %listen_addr, "listening");
        network::run(server, listener).await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn build_server(config: Config, cmdline: &CmdLine) -> Server {
    let server = Server::new(config);

    // Engine log events reach the tracing subscriber, and file streams
    // open per <log> tags unless suppressed.
    server
        .logs
        .attach("*", Rc::new(std::cell::RefCell::new(TracingStream::new(LogLevel::Verbose))));
    let log_tags: Vec<_> = server.config.values("log").to_vec();
    server
        .logs
        .open_file_logs(&log_tags, cmdline.nolog, cmdline.debug);

    server
}
