//! Network identity queries - active wireless network and VPN tunnel
//!
//! Wraps the platform `networksetup` tool. Parsing is split out from command
//! execution so the sentinel handling stays testable without the tool.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use std::process::Command;
use tracing::{debug, warn};

/// Substring emitted by the OS when the wireless radio is switched off.
pub const RADIO_OFF_SENTINEL: &str = "Wi-Fi power is currently off";

const NETWORK_NAME_PREFIX: &str = "Current Wi-Fi Network: ";
const DISABLED_SERVICES_NOTICE: &str =
    "An asterisk (*) denotes that a network service is disabled.";

/// Transient view of the current network identity. Captured before and
/// after each probe run to detect environment drift; never persisted on
/// its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub network_name: Option<String>,
    pub tunnel_name: Option<String>,
}

/// Seam between the measurement cycle and the OS network queries.
pub trait NetworkSource: Send + Sync {
    fn snapshot(&self) -> Result<NetworkSnapshot>;
}

pub struct NetworkContext {
    wifi_interface: String,
    excluded_services: Vec<String>,
}

impl NetworkContext {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            wifi_interface: config.wifi_interface.clone(),
            excluded_services: config.excluded_services.clone(),
        }
    }

    /// Query the active wireless network name.
    ///
    /// Returns `Ok(None)` when the query succeeded but no name was
    /// parsable (e.g. not associated with any network).
    pub fn current_network_name(&self) -> Result<Option<String>> {
        let output = run_networksetup(&["-getairportnetwork", &self.wifi_interface])?;
        parse_airport_output(&output)
    }

    /// Enumerate configured services that look like tunnels, filtering out
    /// hardware interfaces through the exclusion predicate.
    pub fn list_candidate_tunnels(&self) -> Result<Vec<String>> {
        let output = run_networksetup(&["-listallnetworkservices"])?;
        Ok(parse_service_list(&output, |s| self.is_candidate_tunnel(s)))
    }

    /// Heuristic: a service is a tunnel candidate unless it names a known
    /// hardware interface. The exclusion list comes from configuration so
    /// platform quirks stay replaceable without touching the scheduler.
    pub fn is_candidate_tunnel(&self, service: &str) -> bool {
        !self.excluded_services.iter().any(|e| e == service)
    }

    /// Probe candidates sequentially; the first reporting "connected" wins.
    /// A failed status query for one candidate is logged and skipped.
    pub fn active_tunnel(&self, candidates: &[String]) -> Option<String> {
        for candidate in candidates {
            match run_networksetup(&["-showpppoestatus", candidate]) {
                Ok(output) => {
                    if parse_tunnel_status(&output) {
                        debug!("active tunnel: {}", candidate);
                        return Some(candidate.clone());
                    }
                }
                Err(e) => {
                    warn!("tunnel status query failed for {}: {}", candidate, e);
                }
            }
        }
        None
    }
}

impl NetworkSource for NetworkContext {
    fn snapshot(&self) -> Result<NetworkSnapshot> {
        let network_name = self.current_network_name()?;
        let candidates = self.list_candidate_tunnels()?;
        let tunnel_name = self.active_tunnel(&candidates);
        debug!(
            "network snapshot: name={:?} tunnel={:?}",
            network_name, tunnel_name
        );
        Ok(NetworkSnapshot {
            network_name,
            tunnel_name,
        })
    }
}

fn run_networksetup(args: &[&str]) -> Result<String> {
    let output = Command::new("networksetup")
        .args(args)
        .output()
        .map_err(|e| Error::NetworkQuery(format!("failed to execute networksetup: {e}")))?;

    screen_command_output(&output, args.first().copied().unwrap_or_default())
}

/// Some `networksetup` builds exit non-zero when the radio is off, so the
/// sentinel is checked on stdout before the exit status.
fn screen_command_output(output: &std::process::Output, verb: &str) -> Result<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    if stdout.contains(RADIO_OFF_SENTINEL) {
        return Err(Error::RadioOff(stdout.replace('\n', "\\n")));
    }

    if !output.status.success() {
        return Err(Error::NetworkQuery(format!(
            "networksetup {verb} exited with {}",
            output.status
        )));
    }

    Ok(stdout)
}

fn parse_airport_output(output: &str) -> Result<Option<String>> {
    if output.contains(RADIO_OFF_SENTINEL) {
        return Err(Error::RadioOff(output.replace('\n', "\\n")));
    }

    let name = output
        .lines()
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches(NETWORK_NAME_PREFIX).to_string())
        .filter(|name| !name.is_empty());

    Ok(name)
}

fn parse_service_list(output: &str, is_candidate: impl Fn(&str) -> bool) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.is_empty() && *line != DISABLED_SERVICES_NOTICE)
        .filter(|line| is_candidate(line))
        .map(str::to_string)
        .collect()
}

fn parse_tunnel_status(output: &str) -> bool {
    output
        .lines()
        .find(|line| !line.is_empty())
        .is_some_and(|status| status == "connected")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;

    fn context() -> NetworkContext {
        NetworkContext::new(&NetworkConfig::default())
    }

    #[test]
    fn parses_network_name() {
        let name = parse_airport_output("Current Wi-Fi Network: Home-5G\n").unwrap();
        assert_eq!(name.as_deref(), Some("Home-5G"));
    }

    #[test]
    fn radio_off_sentinel_is_detected() {
        let out = "Wi-Fi power is currently off.\n";
        let err = parse_airport_output(out).unwrap_err();
        assert!(matches!(err, Error::RadioOff(_)));
    }

    #[test]
    fn empty_output_yields_no_name() {
        assert_eq!(parse_airport_output("").unwrap(), None);
        assert_eq!(parse_airport_output("\n\n").unwrap(), None);
    }

    #[test]
    fn service_list_excludes_hardware_entries() {
        let output = "An asterisk (*) denotes that a network service is disabled.\n\
                      USB 10/100/1000 LAN\n\
                      Wi-Fi\n\
                      iPhone USB\n\
                      Thunderbolt Bridge\n\
                      Corporate VPN\n\
                      Wireguard Home\n";
        let ctx = context();
        let services = parse_service_list(output, |s| ctx.is_candidate_tunnel(s));
        assert_eq!(services, vec!["Corporate VPN", "Wireguard Home"]);
    }

    #[test]
    fn candidate_predicate_respects_configured_exclusions() {
        let config = NetworkConfig {
            wifi_interface: "en1".to_string(),
            excluded_services: vec!["Ethernet".to_string()],
        };
        let ctx = NetworkContext::new(&config);
        assert!(!ctx.is_candidate_tunnel("Ethernet"));
        assert!(ctx.is_candidate_tunnel("Wi-Fi"));
        assert!(ctx.is_candidate_tunnel("Corporate VPN"));
    }

    #[test]
    fn tunnel_status_requires_connected() {
        assert!(parse_tunnel_status("connected\n"));
        assert!(parse_tunnel_status("\nconnected\n"));
        assert!(!parse_tunnel_status("disconnected\n"));
        assert!(!parse_tunnel_status(""));
    }

    #[test]
    fn radio_off_sentinel_wins_over_exit_status() {
        use std::os::unix::process::ExitStatusExt;
        let output = std::process::Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: b"Wi-Fi power is currently off.\n".to_vec(),
            stderr: Vec::new(),
        };
        let err = screen_command_output(&output, "-getairportnetwork").unwrap_err();
        assert!(matches!(err, Error::RadioOff(_)));
    }

    #[test]
    fn nonzero_exit_without_sentinel_is_a_query_error() {
        use std::os::unix::process::ExitStatusExt;
        let output = std::process::Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        let err = screen_command_output(&output, "-listallnetworkservices").unwrap_err();
        assert!(matches!(err, Error::NetworkQuery(_)));
        assert!(err.to_string().contains("-listallnetworkservices"));
    }

    #[test]
    fn live_query_if_tool_present() {
        // Only exercises the command path on machines that have the tool
        let ctx = context();
        if let Ok(name) = ctx.current_network_name() {
            println!("active network: {:?}", name);
        }
    }
}
