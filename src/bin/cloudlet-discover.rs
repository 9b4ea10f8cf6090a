//! Finds nearby cloudlets and prints the resource state each one reports.

use log::info;

use cloudlet::{Config, DiscoveryClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = Config::load()?;
    let client = DiscoveryClient::from_config(&cfg.discovery)?;

    let mut cloudlets = client.find_nearby_cloudlets().await?;
    if cloudlets.is_empty() {
        println!("no cloudlets found for {}", cfg.discovery.dns_name);
        return Ok(());
    }

    // Candidates are queried one at a time; a failure only affects its own line.
    for cloudlet in &mut cloudlets {
        match client.get_cloudlet_info(cloudlet).await {
            Ok(()) => {
                let r = &cloudlet.resources;
                println!(
                    "{}  cpus={} clock={}MHz mem={}MB free={}MB usage={}%",
                    cloudlet.socket_addr(),
                    r.cpu_num,
                    r.cpu_clock_mhz,
                    r.mem_total_mb,
                    r.free_mem_mb,
                    r.cpu_usage_percent
                );
            }
            Err(e) => println!("{}  unavailable: {}", cloudlet.socket_addr(), e),
        }
    }

    info!("Queried {} cloudlet(s)", cloudlets.len());
    Ok(())
}
