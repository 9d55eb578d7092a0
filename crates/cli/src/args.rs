//! Command-line surface shared by the server and client binary.

use std::path::PathBuf;

use clap::Parser;

/// Replicates a rooted set of regular files from a source host to one or
/// more target hosts, delivering incremental appends in near real time.
#[derive(Debug, Parser, Clone)]
#[command(name = "rstream", version, about)]
pub struct Args {
    /// Server mode; absence implies client mode.
    #[arg(short = 'l', long = "server")]
    pub server: bool,

    /// TCP port: listen (server) or connect (client).
    #[arg(short = 'P', long = "port", default_value_t = 4096)]
    pub port: u16,

    /// Shared/working directory root.
    #[arg(short = 'd', long = "dir")]
    pub dir: PathBuf,

    /// Server: include regex for filenames.
    #[arg(short = 'r', long = "regex", default_value = ".*")]
    pub regex: String,

    /// Client: also write received bytes to standard output.
    #[arg(short = 's', long = "stdout-copy")]
    pub stdout_copy: bool,

    /// Server: gzip block payloads.
    #[arg(short = 'z', long = "gzip")]
    pub gzip: bool,

    /// Server: compute and advertise SHA-1 digests.
    #[arg(short = 'c', long = "checksums")]
    pub checksums: bool,

    /// Pid file path.
    #[arg(short = 'p', long = "pid-file", default_value = "/var/run/rstream.pid")]
    pub pid_file: PathBuf,

    /// Foreground; otherwise a pid-file lock is taken (see
    /// `crate::pidfile`) in place of full daemonization.
    #[arg(short = 'f', long = "foreground")]
    pub foreground: bool,

    /// Increase verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Client: source hostnames, each expanded through shell-glob-style
    /// brace permutation (see [`crate::brace`]).
    pub sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_flags() {
        let args = Args::parse_from([
            "rstream", "-l", "-P", "5000", "-d", "/srv/logs", "-r", r"\.log$", "-c", "-z",
        ]);
        assert!(args.server);
        assert_eq!(args.port, 5000);
        assert_eq!(args.dir, PathBuf::from("/srv/logs"));
        assert_eq!(args.regex, r"\.log$");
        assert!(args.checksums);
        assert!(args.gzip);
    }

    #[test]
    fn parses_client_flags_and_positional_sources() {
        let args = Args::parse_from(["rstream", "-d", "/var/mirror", "-s", "host-a", "host-b"]);
        assert!(!args.server);
        assert!(args.stdout_copy);
        assert_eq!(args.sources, vec!["host-a", "host-b"]);
    }

    #[test]
    fn repeated_v_counts_verbosity() {
        let args = Args::parse_from(["rstream", "-d", "/tmp", "-vvv"]);
        assert_eq!(args.verbose, 3);
    }

    #[test]
    fn port_defaults_to_4096() {
        let args = Args::parse_from(["rstream", "-d", "/tmp"]);
        assert_eq!(args.port, 4096);
    }
}
