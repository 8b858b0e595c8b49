//! Resource provisioner: per-node virtual link, address alias and data
//! directory.

use crate::error::{Result, SimError};
use crate::node::Node;
use nodesim_host::{Host, HostError, MacAddress};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Creates and removes the host resources a node needs before its agent
/// can start.
pub struct Provisioner {
    host: Arc<dyn Host>,
    release_settle: Duration,
}

fn provision_err<'a>(node: &'a Node, step: &'static str) -> impl FnOnce(HostError) -> SimError + 'a {
    move |cause| SimError::ResourceProvision {
        step,
        node: node.name.clone(),
        cause,
    }
}

impl Provisioner {
    /// Create a provisioner. `release_settle` is the pause between removing
    /// a node's link and removing its data directory.
    pub fn new(host: Arc<dyn Host>, release_settle: Duration) -> Self {
        Self {
            host,
            release_settle,
        }
    }

    /// Make sure `node`'s link, address and data directory exist.
    ///
    /// If the node's address is already on the host it is treated as a
    /// leftover from an earlier run: kept as-is when `persist` is set,
    /// otherwise released and provisioned fresh. Repeated calls converge on
    /// a single link holding the address.
    pub async fn ensure(&self, node: &Node, persist: bool) -> Result<()> {
        let present = self
            .host
            .address_present(node.ip)
            .await
            .map_err(provision_err(node, "probe-address"))?;

        if !present {
            self.provision_network(node).await?;
        } else if persist {
            info!(node = %node.name, ip = %node.ip, "Reusing existing network resources");
        } else {
            info!(node = %node.name, ip = %node.ip, "Address already in use, recreating resources");
            if let Err(e) = self.release(node).await {
                // partial leftovers are expected here
                debug!(node = %node.name, error = %e, "Release before reprovision was incomplete");
            }
            self.provision_network(node).await?;
        }

        self.host
            .create_dir_all(&node.dir)
            .await
            .map_err(provision_err(node, "create-dir"))?;
        Ok(())
    }

    async fn provision_network(&self, node: &Node) -> Result<()> {
        let mac = MacAddress::generate();
        debug!(node = %node.name, device = %node.device, %mac, "Creating virtual link");

        self.host
            .add_dummy_link(&node.device)
            .await
            .map_err(provision_err(node, "add-link"))?;
        self.host
            .set_link_mac(&node.device, &mac)
            .await
            .map_err(provision_err(node, "set-mac"))?;
        self.host
            .add_address(&node.device, node.ip)
            .await
            .map_err(provision_err(node, "add-address"))?;
        self.host
            .set_link_up(&node.device)
            .await
            .map_err(provision_err(node, "link-up"))?;
        Ok(())
    }

    /// Remove `node`'s address, link and data directory.
    ///
    /// Every step is attempted even if an earlier one fails, so this is
    /// safe on partially provisioned nodes. The first failure is returned.
    pub async fn release(&self, node: &Node) -> Result<()> {
        let mut first: Option<SimError> = None;
        let mut note = |step: &'static str, result: std::result::Result<(), HostError>| {
            if let Err(cause) = result {
                warn!(node = %node.name, step, error = %cause, "Release step failed");
                first.get_or_insert(SimError::ResourceRelease {
                    step,
                    node: node.name.clone(),
                    cause,
                });
            }
        };

        note(
            "del-address",
            self.host.delete_address(&node.device, node.ip).await,
        );
        note("del-link", self.host.delete_dummy_link(&node.device).await);
        tokio::time::sleep(self.release_settle).await;
        note("remove-dir", self.host.remove_dir_all(&node.dir).await);

        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodesim_host::MemoryHost;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    fn node() -> Node {
        Node {
            server: true,
            binary: PathBuf::from("/usr/local/bin/nomad"),
            name: "sim-server0".into(),
            region: "global".into(),
            dc: "dc1".into(),
            ip: Ipv4Addr::new(10, 0, 0, 1),
            device: "simeth0".into(),
            dir: PathBuf::from("/tmp/sim/sim-server0"),
            pid: None,
        }
    }

    fn setup() -> (Arc<MemoryHost>, Provisioner) {
        let host = Arc::new(MemoryHost::new());
        let provisioner = Provisioner::new(host.clone(), Duration::from_secs(3));
        (host, provisioner)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_provision() {
        let (host, provisioner) = setup();
        let node = node();

        provisioner.ensure(&node, false).await.unwrap();

        let link = host.link("simeth0").expect("link created");
        assert!(link.up);
        assert!(link.mac.expect("mac set").is_local_unicast());
        assert_eq!(link.addresses, vec![(node.ip, "simeth0:0".to_string())]);
        assert!(host.dir_exists(&node.dir));
        assert_eq!(
            host.events(),
            vec![
                "probe-address 10.0.0.1",
                "add-link simeth0",
                "set-mac simeth0",
                "add-address 10.0.0.1",
                "link-up simeth0",
                "create-dir /tmp/sim/sim-server0",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_is_replaced_not_duplicated() {
        let (host, provisioner) = setup();
        let node = node();
        host.seed_link("simeth0", node.ip);

        provisioner.ensure(&node, false).await.unwrap();
        provisioner.ensure(&node, false).await.unwrap();

        assert_eq!(host.links().len(), 1);
        assert_eq!(host.links_with(node.ip), vec!["simeth0"]);
        assert_eq!(host.link("simeth0").unwrap().addresses.len(), 1);
        assert!(host.dir_exists(&node.dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_kept_when_persisting() {
        let (host, provisioner) = setup();
        let node = node();
        host.seed_link("simeth0", node.ip);

        provisioner.ensure(&node, true).await.unwrap();

        assert!(host.events_for("add-link").is_empty());
        assert!(host.events_for("del-link").is_empty());
        assert_eq!(host.link("simeth0").unwrap().mac, None);
        assert!(host.dir_exists(&node.dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_is_named() {
        let (host, provisioner) = setup();
        let node = node();
        host.fail_on("add-address", "10.0.0.1");

        let err = provisioner.ensure(&node, false).await.unwrap_err();
        match err {
            SimError::ResourceProvision { step, node, .. } => {
                assert_eq!(step, "add-address");
                assert_eq!(node, "sim-server0");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!host.dir_exists(&PathBuf::from("/tmp/sim/sim-server0")));
        assert!(host.events_for("link-up").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_attempts_every_step() {
        let (host, provisioner) = setup();
        let node = node();
        // only the directory is left over
        host.seed_dir(&node.dir);

        let err = provisioner.release(&node).await.unwrap_err();
        assert!(matches!(
            err,
            SimError::ResourceRelease { step: "del-address", .. }
        ));
        assert_eq!(host.events_for("del-link"), vec!["simeth0"]);
        assert!(!host.dir_exists(&node.dir));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_waits_before_removing_dir() {
        let (host, provisioner) = setup();
        let node = node();
        provisioner.ensure(&node, false).await.unwrap();

        let start = tokio::time::Instant::now();
        provisioner.release(&node).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(host.links().is_empty());
        assert!(!host.dir_exists(&node.dir));
    }
}
