use std::path::Path;
use std::sync::Arc;

use cronmesh_monitor::ClusterMonitor;
use cronmesh_registry::{CommandAction, EmbeddedRegistry, MonitorCommand, RegistryClient};

pub async fn publish(
    registry_path: &Path,
    group: &str,
    job: &str,
    action: CommandAction,
) -> anyhow::Result<()> {
    let store = Arc::new(EmbeddedRegistry::open(registry_path)?);
    let monitor = ClusterMonitor::new(store as Arc<dyn RegistryClient>);

    let cmd = MonitorCommand::new(group, job, action);
    let target = monitor.publish_event(&cmd).await?;
    monitor.close().await?;

    match target {
        Some(node) => {
            println!("✓ command for {group}/{job} published to {node}");
            Ok(())
        }
        None => anyhow::bail!("group {group} has no live nodes"),
    }
}
