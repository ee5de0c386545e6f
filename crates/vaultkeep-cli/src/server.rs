//! Sibling-shutdown handshake (spec §6 "Ports & discovery", §5
//! "Timeouts"): when a run-marker shows another instance of this role
//! already claims `db_dir`, probe its candidate ports with `GET /`,
//! identify the admin service by its `Server` header, and ask it to
//! `POST /shutdown` before giving up this process's own boot attempt.
//!
//! The wire description enumerates the sibling's *open* listening ports
//! via OS introspection of its pid. Doing that without a port-enumeration
//! dependency outside this workspace's stack is not practical, so this
//! probes the candidate ports this process itself was configured with —
//! the set it is about to bind — which covers the restart-with-unchanged-
//! configuration case the handshake exists for. See `DESIGN.md`.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;

use vaultkeep_runtime::is_already_running;

const TRACING_TARGET: &str = "vaultkeep_cli::server";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(20);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

const ADMIN_SERVER_HEADER_PREFIX: &str = "server administration";

/// Finds and shuts down the sibling instance holding the run-marker for
/// `role` under `db_dir`, waiting up to 20 s (§5) for it to actually
/// exit. `session_key`, if set, is sent as the restricted-resource
/// session cookie on the `/shutdown` request — an operator-provisioned
/// credential for this handshake, since the handshake itself has no
/// session of its own.
pub async fn shutdown_sibling(db_dir: &Path, role: &str, host: IpAddr, candidate_ports: &[u16], session_key: Option<&str>) -> anyhow::Result<()> {
    if !is_already_running(db_dir, role) {
        tracing::debug!(target: TRACING_TARGET, "no live sibling to shut down");
        return Ok(());
    }

    let client = Client::builder().timeout(PROBE_TIMEOUT).build().context("could not build probe client")?;
    let admin_port = find_admin_port(&client, host, candidate_ports)
        .await
        .with_context(|| format!("no sibling admin service found among {candidate_ports:?}"))?;

    tracing::info!(target: TRACING_TARGET, admin_port, "found sibling admin service, requesting shutdown");
    post_shutdown(&client, host, admin_port, session_key).await.context("sibling rejected the shutdown request")?;

    wait_for_exit(db_dir, role).await
}

async fn find_admin_port(client: &Client, host: IpAddr, candidate_ports: &[u16]) -> anyhow::Result<u16> {
    for &port in candidate_ports {
        let url = format!("http://{host}:{port}/");
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(target: TRACING_TARGET, port, %err, "probe failed");
                continue;
            }
        };
        let is_admin = response
            .headers()
            .get(reqwest::header::SERVER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(ADMIN_SERVER_HEADER_PREFIX));
        if is_admin {
            return Ok(port);
        }
    }
    anyhow::bail!("none of the probed ports identified themselves as the admin service")
}

async fn post_shutdown(client: &Client, host: IpAddr, port: u16, session_key: Option<&str>) -> anyhow::Result<()> {
    let url = format!("http://{host}:{port}/shutdown");
    let mut request = client.post(&url);
    if let Some(session_key) = session_key {
        request = request.header(reqwest::header::COOKIE, format!("session_key={session_key}"));
    }
    let response = request.send().await.context("shutdown request failed")?;
    if !response.status().is_success() {
        anyhow::bail!("sibling responded to /shutdown with {}", response.status());
    }
    Ok(())
}

async fn wait_for_exit(db_dir: &Path, role: &str) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_WAIT;
    while tokio::time::Instant::now() < deadline {
        if !is_already_running(db_dir, role) {
            tracing::info!(target: TRACING_TARGET, "sibling instance exited");
            return Ok(());
        }
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
    anyhow::bail!("sibling instance did not exit within {}s of the shutdown request", SHUTDOWN_WAIT.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_marker_means_nothing_to_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let result = shutdown_sibling(dir.path(), "server", IpAddr::from([127, 0, 0, 1]), &[], None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unreachable_candidate_ports_are_not_mistaken_for_the_admin_service() {
        let client = Client::builder().timeout(PROBE_TIMEOUT).build().unwrap();
        let result = find_admin_port(&client, IpAddr::from([127, 0, 0, 1]), &[1]).await;
        assert!(result.is_err());
    }
}
