//! Flag parsing, brace expansion, and process-startup wiring for the
//! `rstream` binary.

pub mod args;
pub mod brace;
pub mod pidfile;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::pin::Pin;

use regex::Regex;

use engine::{ClientEngine, ServerEngine, SourceConfig};
use resume::ResumeStore;

pub use args::Args;

/// Process exit codes: `0` on clean shutdown, `1` on a startup/configuration
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Ok = 0,
    ConfigError = 1,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid include regex: {0}")]
    BadRegex(#[from] regex::Error),
    #[error("failed to resolve source host {host}: {source}")]
    UnresolvedHost {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no address found for source host {0}")]
    NoAddress(String),
    #[error("resume store error: {0}")]
    Resume(#[from] resume::ResumeError),
    #[error("failed to bind listen socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("server engine failed after startup: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("pid file error: {0}")]
    PidFile(#[from] pidfile::PidFileError),
    #[error("working directory error: {0}")]
    WorkingDir(#[source] std::io::Error),
}

/// Parses nothing itself — `args` is expected to already have come from
/// [`clap::Parser::parse`] — and runs the appropriate engine to completion.
/// This is the single entry point both `main.rs` and integration tests
/// call.
#[must_use]
pub fn run(args: Args) -> ExitCode {
    logging::init(args.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(error = %err, "failed to start async runtime");
            return ExitCode::ConfigError;
        }
    };

    match runtime.block_on(run_async(args)) {
        Ok(()) => ExitCode::Ok,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            ExitCode::ConfigError
        }
    }
}

async fn run_async(args: Args) -> Result<(), StartupError> {
    let _pid_guard = if args.foreground {
        None
    } else {
        Some(pidfile::acquire(&args.pid_file)?)
    };

    let shutdown: Pin<Box<dyn Future<Output = ()>>> = Box::pin(shutdown_signal());

    if args.server {
        run_server(args, shutdown).await
    } else {
        run_client(args, shutdown).await
    }
}

async fn run_server(
    args: Args,
    shutdown: Pin<Box<dyn Future<Output = ()>>>,
) -> Result<(), StartupError> {
    let include = Regex::new(&args.regex)?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    let engine = ServerEngine::bind(addr, args.dir.clone(), include, args.checksums, args.gzip)
        .await
        .map_err(|source| StartupError::Bind {
            port: args.port,
            source,
        })?;
    tracing::info!(port = args.port, dir = %args.dir.display(), "server listening");
    engine
        .run(shutdown)
        .await
        .map(|_stats| ())
        .map_err(StartupError::Runtime)
}

async fn run_client(
    args: Args,
    shutdown: Pin<Box<dyn Future<Output = ()>>>,
) -> Result<(), StartupError> {
    let hosts = brace::expand_all(&args.sources);
    let mut configs = Vec::with_capacity(hosts.len());
    for host in hosts {
        let addr = resolve(&host, args.port)?;
        configs.push(SourceConfig { name: host, addr });
    }

    let resume_path = args.dir.join(".rstream-resume.redb");
    let resume = ResumeStore::open(&resume_path)?;
    let engine = ClientEngine::new(args.dir.clone(), configs, resume, args.stdout_copy)
        .map_err(StartupError::WorkingDir)?;
    engine
        .run(shutdown)
        .await
        .map_err(StartupError::WorkingDir)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, StartupError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|source| StartupError::UnresolvedHost {
            host: host.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| StartupError::NoAddress(host.to_string()))
}

/// Resolves when `SIGINT`, `SIGTERM`, or `SIGQUIT` is received (or, on
/// non-Unix targets, Ctrl-C).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut int = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
        let mut term =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to register SIGQUIT handler");
        tokio::select! {
            _ = int.recv() => {}
            _ = term.recv() => {}
            _ = quit.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_converts_to_process_exit_code() {
        let ok: std::process::ExitCode = ExitCode::Ok.into();
        let err: std::process::ExitCode = ExitCode::ConfigError.into();
        // std::process::ExitCode has no public accessor; this just checks
        // the conversion compiles and doesn't panic for both variants.
        let _ = (ok, err);
    }

    #[test]
    fn resolve_rejects_unresolvable_host() {
        let result = resolve("this-host-name-should-never-resolve.invalid", 4096);
        assert!(result.is_err());
    }
}
