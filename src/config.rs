//! Command-line and environment configuration for the binaries.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser};

use crate::source::{DeviceChooser, MuseSource, MuseSourceConfig, SampleSource, SimulatedSource};
use crate::upload::StaticGateway;

/// Options shared by the recorder front-ends (`muse-recorder`, `tui`).
#[derive(Args, Debug, Clone)]
pub struct RecorderConfig {
    /// Base URL of the data server.
    #[arg(long, env = "MUSE_RECORDER_SERVER", default_value = "http://localhost:3000")]
    pub server: String,

    /// Signed-in user the sessions belong to.
    #[arg(long, env = "MUSE_RECORDER_USER", default_value = "anonymous")]
    pub username: String,

    /// Anti-forgery token issued by the web session.
    #[arg(long, env = "MUSE_RECORDER_CSRF_TOKEN")]
    pub csrf_token: Option<String>,

    /// Use synthetic headsets instead of Bluetooth.
    #[arg(long)]
    pub simulate: bool,

    /// Stream the three PPG channels.
    #[arg(long)]
    pub enable_ppg: bool,

    /// Stream the AUX electrode.
    #[arg(long)]
    pub enable_aux: bool,

    /// Seconds to scan before offering devices.
    #[arg(long, default_value_t = 15)]
    pub scan_timeout: u64,

    /// Advertised-name prefix of the headsets to offer.
    #[arg(long, default_value = "Muse")]
    pub name_prefix: String,
}

impl RecorderConfig {
    pub fn gateway(&self) -> StaticGateway {
        StaticGateway {
            username: self.username.clone(),
            csrf_token: self.csrf_token.clone(),
        }
    }

    pub fn source_config(&self) -> MuseSourceConfig {
        MuseSourceConfig {
            enable_aux: self.enable_aux,
            enable_ppg: self.enable_ppg,
            scan_timeout_secs: self.scan_timeout,
            name_prefix: self.name_prefix.clone(),
        }
    }

    /// A fresh source for the next connect. Simulated headsets are named
    /// `<prefix>-SIM<n>`.
    pub fn new_source(&self, n: usize, chooser: &DeviceChooser) -> Box<dyn SampleSource> {
        if self.simulate {
            Box::new(SimulatedSource::new(format!("{}-SIM{n}", self.name_prefix)))
        } else {
            Box::new(MuseSource::new(self.source_config(), Arc::clone(chooser)))
        }
    }
}

/// `muse-recorder` and `tui` command line.
#[derive(Parser, Debug)]
#[command(version, about = "Record Muse EEG sessions and upload them")]
pub struct RecorderCli {
    #[command(flatten)]
    pub recorder: RecorderConfig,
}

/// `data-server` command line.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Store uploaded recording sessions per user")]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "MUSE_RECORDER_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Root of the per-user data directories.
    #[arg(long, env = "MUSE_RECORDER_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Peers allowed to name the user in `X-Authenticated-User`; repeat the
    /// flag or pass a comma-separated list.
    #[arg(
        long = "trusted-proxy",
        env = "MUSE_RECORDER_TRUSTED_PROXIES",
        value_delimiter = ',',
        default_values_t = [IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)]
    )]
    pub trusted_proxies: Vec<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = RecorderCli::try_parse_from(["muse-recorder"]).unwrap();
        let cfg = cli.recorder;
        assert_eq!(cfg.scan_timeout, 15);
        assert_eq!(cfg.name_prefix, "Muse");
        assert!(!cfg.simulate);
        assert!(!cfg.source_config().enable_aux);
    }

    #[test]
    fn flags_map_onto_source_config() {
        let cli = RecorderCli::try_parse_from([
            "muse-recorder",
            "--username",
            "alice",
            "--csrf-token",
            "abc",
            "--enable-ppg",
            "--scan-timeout",
            "5",
        ])
        .unwrap();
        let cfg = cli.recorder;
        let src = cfg.source_config();
        assert!(src.enable_ppg);
        assert_eq!(src.scan_timeout_secs, 5);
        assert_eq!(cfg.gateway().csrf_token.as_deref(), Some("abc"));
        assert_eq!(cfg.gateway().username, "alice");
    }

    #[test]
    fn server_config_parses_bind() {
        let cfg = ServerConfig::try_parse_from(["data-server", "--bind", "0.0.0.0:8080"]).unwrap();
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.trusted_proxies.len(), 2);
        assert!(cfg.trusted_proxies.iter().all(IpAddr::is_loopback));

        let cfg = ServerConfig::try_parse_from([
            "data-server",
            "--trusted-proxy",
            "10.0.0.1,10.0.0.2",
            "--trusted-proxy",
            "fd00::1",
        ])
        .unwrap();
        assert_eq!(cfg.trusted_proxies.len(), 3);
        assert_eq!(cfg.trusted_proxies[2], "fd00::1".parse::<IpAddr>().unwrap());
    }
}
