//! Command codes and payload types for the two cloudlet protocols.
//!
//! The provisioning protocol (server side, JSON payloads) moves VM records
//! between a client and the cloudlet. The discovery protocol (client side,
//! MessagePack payloads) asks a cloudlet for its live resource state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Protocol version this server speaks.
pub const PROTOCOL_VERSION: &str = "0.1";

/// Default provisioning server port.
pub const DEFAULT_SERVER_PORT: u16 = 9090;

/// Default discovery port on a cloudlet.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8021;

/// A provisioning request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionCommand {
    List,
    TransferStart,
    Launch,
    Stop,
}

impl ProvisionCommand {
    pub const ALL: [ProvisionCommand; 4] = [
        ProvisionCommand::List,
        ProvisionCommand::TransferStart,
        ProvisionCommand::Launch,
        ProvisionCommand::Stop,
    ];

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x0011 => Some(Self::List),
            0x0021 => Some(Self::TransferStart),
            0x0031 => Some(Self::Launch),
            0x0041 => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::List => 0x0011,
            Self::TransferStart => 0x0021,
            Self::Launch => 0x0031,
            Self::Stop => 0x0041,
        }
    }

    /// The acknowledgment code paired with this request.
    pub fn ack_code(self) -> u32 {
        self.code() + 1
    }

    /// Name passed to the provisioning script.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::TransferStart => "transfer",
            Self::Launch => "launch",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for ProvisionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of VM image described by a [`VmRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmType {
    #[serde(rename = "baseVM")]
    BaseVm,
    #[serde(rename = "overlay")]
    Overlay,
}

/// One VM entry of a provisioning payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub vm_type: VmType,
    pub uuid: String,
    #[serde(default)]
    pub diskimg_path: String,
    #[serde(default)]
    pub diskimg_size: u64,
    #[serde(default)]
    pub memorysnapshot_path: String,
    #[serde(default)]
    pub memorysnapshot_size: u64,
    #[serde(default)]
    pub version: String,
}

/// JSON body of every provisioning frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    #[serde(rename = "Protocol-version")]
    pub protocol_version: String,
    #[serde(rename = "VM", default, skip_serializing_if = "Vec::is_empty")]
    pub vms: Vec<VmRecord>,
}

impl ProvisionRequest {
    pub fn new(vms: Vec<VmRecord>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            vms,
        }
    }

    /// Whether the request carries `expected`, ignoring ASCII case.
    pub fn version_matches(&self, expected: &str) -> bool {
        self.protocol_version.eq_ignore_ascii_case(expected)
    }
}

/// Discovery protocol request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DiscoveryCommand {
    SendMeta = 0x11,
    SendOverlay = 0x12,
    Finish = 0x13,
    GetResourceInfo = 0x14,
    SessionCreate = 0x15,
    SessionClose = 0x16,
}

impl DiscoveryCommand {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Discovery protocol response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseCode {
    Success = 0x01,
    Failed = 0x02,
    OnDemand = 0x03,
}

impl ResponseCode {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(Self::Success),
            0x02 => Some(Self::Failed),
            0x03 => Some(Self::OnDemand),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// MessagePack body of a discovery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub command: i32,
}

/// MessagePack body of a discovery response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub command: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResourcePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resource fields a cloudlet may report. Any subset may be present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourcePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_cpu_num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_cpu_clock_speed_mhz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_mem_total_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_total_cpu_usage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_total_free_memory_mb: Option<u64>,
}

/// Last known resource state of a cloudlet.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceSnapshot {
    pub cpu_num: u32,
    pub cpu_clock_mhz: f64,
    pub mem_total_mb: u64,
    pub free_mem_mb: u64,
    pub cpu_usage_percent: f64,
}

impl ResourceSnapshot {
    /// Merges the fields present in `payload`.
    ///
    /// CPU usage and free memory are decoded but never recorded; both stay at
    /// whatever value the snapshot already had.
    pub fn merge(&mut self, payload: &ResourcePayload) {
        if let Some(n) = payload.machine_cpu_num {
            self.cpu_num = n;
        }
        if let Some(mhz) = payload.machine_cpu_clock_speed_mhz {
            self.cpu_clock_mhz = mhz;
        }
        if let Some(mb) = payload.machine_mem_total_mb {
            self.mem_total_mb = mb;
        }
    }
}
