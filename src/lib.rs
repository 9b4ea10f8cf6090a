//! Cloudlet control plane.
//!
//! A length-framed provisioning server that accepts VM records from clients
//! and hands them to an external provisioner, plus a discovery client that
//! finds nearby cloudlets over DNS and asks them for their resource state.

pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod provision;
pub mod registry;
pub mod server;
pub mod transfer;

pub use config::Config;
pub use discovery::{Cloudlet, DiscoveryClient, DnsResolver, NameResolver};
pub use error::{CodecError, DiscoveryError, FrameError, ProtocolError, RegistryFull};
pub use provision::{LogProvisioner, Provisioner, ScriptProvisioner};
pub use registry::Registry;
pub use server::Server;
