//! Cloudlet discovery client.
//!
//! Discovery is two independent steps. [`DiscoveryClient::find_nearby_cloudlets`]
//! turns a well-known DNS name into candidate cloudlets without contacting
//! any of them. [`DiscoveryClient::get_cloudlet_info`] then opens a fresh TCP
//! connection to one candidate, sends a single `GET_RESOURCE_INFO` request
//! and merges the answer into the candidate's resource snapshot.
//!
//! Connections are never reused and failed queries are not retried.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::codec::{recv_message, send_message, MessageError, MsgPackCodec};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, FrameError};
use crate::framing::FrameReader;
use crate::protocol::{
    DiscoveryCommand, DiscoveryRequest, DiscoveryResponse, ResourceSnapshot, ResponseCode,
};

impl From<MessageError> for DiscoveryError {
    fn from(e: MessageError) -> Self {
        match e {
            MessageError::Frame(e) => DiscoveryError::Frame(e),
            MessageError::Codec(e) => DiscoveryError::Codec(e),
        }
    }
}

/// Turns a host name into addresses.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Address records for `name`, in the order the resolver returned them.
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, DiscoveryError>;
}

/// [`NameResolver`] backed by hickory.
pub struct DnsResolver {
    inner: TokioAsyncResolver,
}

impl DnsResolver {
    /// Uses the host's resolver configuration (`/etc/resolv.conf`).
    pub fn from_system_conf() -> Result<Self, DiscoveryError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            DiscoveryError::Resolve {
                name: "<system resolver>".into(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { inner })
    }

    /// Sends every query to `nameserver` over plain UDP/TCP.
    pub fn with_nameserver(nameserver: SocketAddr) -> Self {
        let servers =
            NameServerConfigGroup::from_ips_clear(&[nameserver.ip()], nameserver.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), servers);
        Self {
            inner: TokioAsyncResolver::tokio(config, ResolverOpts::default()),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        match config.nameserver {
            Some(addr) => Ok(Self::with_nameserver(addr)),
            None => Self::from_system_conf(),
        }
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn lookup(&self, name: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        match self.inner.lookup_ip(name).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => {
                debug!("No address records for {}", name);
                Ok(Vec::new())
            }
            Err(e) => Err(DiscoveryError::Resolve {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// A candidate cloudlet and the last resource state it reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Cloudlet {
    pub address: IpAddr,
    pub port: u16,
    pub resources: ResourceSnapshot,
}

impl Cloudlet {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            resources: ResourceSnapshot::default(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

pub struct DiscoveryClient<R = DnsResolver> {
    resolver: R,
    dns_name: String,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_payload: usize,
}

impl DiscoveryClient<DnsResolver> {
    /// Builds a client using the resolver described by `config`.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        Ok(Self::new(DnsResolver::from_config(config)?, config))
    }
}

impl<R: NameResolver> DiscoveryClient<R> {
    pub fn new(resolver: R, config: &DiscoveryConfig) -> Self {
        Self {
            resolver,
            dns_name: config.dns_name.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            max_payload: config.max_payload_bytes,
        }
    }

    /// Resolves the discovery name into one candidate per address record.
    ///
    /// This is a name lookup only; no candidate is contacted.
    pub async fn find_nearby_cloudlets(&self) -> Result<Vec<Cloudlet>, DiscoveryError> {
        let addresses = self.resolver.lookup(&self.dns_name).await?;
        info!(
            "Resolved {} to {} candidate(s)",
            self.dns_name,
            addresses.len()
        );
        Ok(addresses
            .into_iter()
            .map(|address| Cloudlet::new(address, self.port))
            .collect())
    }

    /// Queries one candidate for its resource state.
    ///
    /// On success the reported fields are merged into `cloudlet.resources`.
    /// On failure the snapshot is left as it was.
    pub async fn get_cloudlet_info(&self, cloudlet: &mut Cloudlet) -> Result<(), DiscoveryError> {
        let addr = cloudlet.socket_addr();
        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(DiscoveryError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DiscoveryError::Connect {
                    addr: addr.to_string(),
                    reason: "timed out".into(),
                })
            }
        };

        let (reader, mut writer) = stream.into_split();
        let command = DiscoveryCommand::GetResourceInfo;
        let request = DiscoveryRequest {
            command: command.code() as i32,
        };
        send_message::<MsgPackCodec, _, _>(&mut writer, command.code(), &request).await?;

        let mut frames = FrameReader::new(reader, self.max_payload);
        let response = timeout(
            self.read_timeout,
            recv_message::<MsgPackCodec, _, DiscoveryResponse>(&mut frames),
        )
        .await
        .map_err(|_| DiscoveryError::Frame(FrameError::Timeout))??;

        let Some((_, response)) = response else {
            return Err(DiscoveryError::Closed);
        };

        if let Some(message) = response.error {
            warn!("{} reported error: {}", addr, message);
            return Err(DiscoveryError::Remote(message));
        }
        if ResponseCode::from_code(response.command) != Some(ResponseCode::Success) {
            return Err(DiscoveryError::Failed(response.command));
        }
        if let Some(payload) = response.payload {
            cloudlet.resources.merge(&payload);
        }

        debug!("{} resources: {:?}", addr, cloudlet.resources);
        Ok(())
    }
}
