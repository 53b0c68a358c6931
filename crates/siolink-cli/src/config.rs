use log::warn;
use serde::{Deserialize, Serialize};
use siolink_core::RelayConfig;
use siolink_core::relay::DEFAULT_RELAY_TARGET;
use siolink_net::TcpRelayOptions;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub target: SocketAddrV4,
    pub honor_requested_target: bool,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            target: DEFAULT_RELAY_TARGET,
            honor_requested_target: false,
        }
    }
}

/// Socket timeouts are in milliseconds; absent means block forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSection {
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub nodelay: bool,
    pub nonblocking_connect: bool,
}

impl Default for TcpSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            nodelay: true,
            nonblocking_connect: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CliConfig {
    pub relay: RelaySection,
    pub tcp: TcpSection,
}

impl CliConfig {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            target: self.relay.target,
            honor_requested_target: self.relay.honor_requested_target,
        }
    }

    pub fn tcp_options(&self) -> TcpRelayOptions {
        TcpRelayOptions {
            connect_timeout: self.tcp.connect_timeout_ms.map(Duration::from_millis),
            read_timeout: self.tcp.read_timeout_ms.map(Duration::from_millis),
            write_timeout: self.tcp.write_timeout_ms.map(Duration::from_millis),
            nodelay: self.tcp.nodelay,
            nonblocking_connect: self.tcp.nonblocking_connect,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("siolink").join("siolink.toml");
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("siolink").join("siolink.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("siolink")
            .join("siolink.toml");
    }

    PathBuf::from("siolink.toml")
}

pub fn load_from_file(path: &Path) -> CliConfig {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return CliConfig::default(),
    };

    match toml::from_str::<CliConfig>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            CliConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_from_file(&dir.path().join("absent.toml"));
        assert_eq!(cfg, CliConfig::default());
        assert_eq!(cfg.relay_config(), RelayConfig::default());
        assert_eq!(cfg.tcp_options(), TcpRelayOptions::default());
    }

    #[test]
    fn sections_are_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[relay]\ntarget = \"10.0.0.2:4000\"\nhonor_requested_target = true\n\n\
             [tcp]\nread_timeout_ms = 250\nnonblocking_connect = true"
        )
        .unwrap();

        let cfg = load_from_file(file.path());
        let relay = cfg.relay_config();
        assert_eq!(relay.target, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 4000));
        assert!(relay.honor_requested_target);

        let tcp = cfg.tcp_options();
        assert_eq!(tcp.read_timeout, Some(Duration::from_millis(250)));
        assert_eq!(tcp.connect_timeout, None);
        assert!(tcp.nodelay);
        assert!(tcp.nonblocking_connect);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tcp]\nnodelay = false").unwrap();

        let cfg = load_from_file(file.path());
        assert_eq!(cfg.relay, RelaySection::default());
        assert!(!cfg.tcp.nodelay);
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[relay]\ntarget = 42").unwrap();
        assert_eq!(load_from_file(file.path()), CliConfig::default());
    }

    #[test]
    fn defaults_survive_serialization() {
        let text = toml::to_string_pretty(&CliConfig::default()).unwrap();
        let cfg: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, CliConfig::default());
    }
}
