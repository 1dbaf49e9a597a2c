use std::path::Path;
use std::sync::Arc;

use cronmesh_monitor::ClusterMonitor;
use cronmesh_registry::{EmbeddedRegistry, JobGroupInfo, RegistryClient};

pub async fn list(registry_path: &Path, format: &str) -> anyhow::Result<()> {
    let store = Arc::new(EmbeddedRegistry::open(registry_path)?);
    let monitor = ClusterMonitor::new(store as Arc<dyn RegistryClient>);

    let groups = monitor.get_all_job_groups().await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&groups)?),
        _ => print_groups(&groups),
    }

    monitor.close().await?;
    Ok(())
}

fn print_groups(groups: &[JobGroupInfo]) {
    if groups.is_empty() {
        println!("no job groups with live nodes");
        return;
    }
    for group in groups {
        println!("{}  nodes: {}", group.name, group.cluster_nodes.join(", "));
        for job in &group.jobs {
            let state = if !job.is_active {
                "inactive"
            } else if job.is_running {
                "running"
            } else {
                "idle"
            };
            let mut line = format!("  {:<24} {:<9} {}", job.job_name, state, job.cron_expr);
            if job.is_running && !job.current_node_id.is_empty() {
                line.push_str(&format!("  on {}", job.current_node_id));
            } else if let Some(next) = job.next_fire_time {
                line.push_str(&format!("  next {next}"));
            }
            println!("{line}");
        }
    }
}
