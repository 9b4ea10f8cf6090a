//! Hand-off point between the provisioning server and whatever actually
//! moves overlays and starts or stops VMs.

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::protocol::{ProvisionCommand, VmRecord};

pub mod script;
pub use script::ScriptProvisioner;

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Carry out `command` for the given VMs.
    ///
    /// The records are handed over by value; the server keeps no copy.
    async fn provision(&self, command: ProvisionCommand, vms: Vec<VmRecord>) -> Result<()>;
}

/// Accepts every command and only logs it. Used when no script is configured.
#[derive(Debug, Default)]
pub struct LogProvisioner;

#[async_trait]
impl Provisioner for LogProvisioner {
    async fn provision(&self, command: ProvisionCommand, vms: Vec<VmRecord>) -> Result<()> {
        let names: Vec<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();
        info!("{} requested for {} VM(s): {:?}", command, vms.len(), names);
        Ok(())
    }
}
