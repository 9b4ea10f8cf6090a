use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::Header;
use hickory_server::proto::rr::rdata::A;
use hickory_server::proto::rr::{RData, Record, RecordType};
use hickory_server::server::{
    Request, RequestHandler, ResponseHandler, ResponseInfo, ServerFuture,
};
use tokio::net::{TcpListener, UdpSocket};

use cloudlet::codec::{send_message, MsgPackCodec, PayloadCodec};
use cloudlet::config::DiscoveryConfig;
use cloudlet::framing::FrameReader;
use cloudlet::protocol::{DiscoveryResponse, ResourcePayload, ResourceSnapshot};
use cloudlet::{Cloudlet, DiscoveryClient, DiscoveryError, NameResolver};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct FixedResolver(Vec<IpAddr>);

#[async_trait]
impl NameResolver for FixedResolver {
    async fn lookup(&self, _name: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        Ok(self.0.clone())
    }
}

/// Answers every A query with the same address records.
struct StubDns {
    records: Vec<Ipv4Addr>,
}

#[async_trait]
impl RequestHandler for StubDns {
    async fn handle_request<R>(&self, request: &Request, mut response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);

        let records: Vec<Record> = if query.query_type() == RecordType::A {
            self.records
                .iter()
                .map(|ip| Record::from_rdata(query.name().clone().into(), 60, RData::A(A(*ip))))
                .collect()
        } else {
            Vec::new()
        };

        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            records.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );
        response_handle.send_response(response).await.unwrap()
    }
}

async fn start_dns(records: Vec<Ipv4Addr>) -> SocketAddr {
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = udp.local_addr().unwrap();
    let mut server = ServerFuture::new(StubDns { records });
    server.register_socket(udp);
    tokio::spawn(async move {
        let _ = server.block_until_done().await;
    });
    addr
}

/// Serves `responses` in order, one per accepted connection, and returns the
/// raw request payloads it saw.
async fn start_responder(
    responses: Vec<Option<DiscoveryResponse>>,
) -> (u16, tokio::task::JoinHandle<Vec<(u32, Vec<u8>)>>, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);

            let (command, payload) = {
                let mut frames = FrameReader::new(&mut stream, 1024);
                let (command, payload) = frames.read_frame().await.unwrap().unwrap();
                (command, payload.to_vec())
            };
            seen.push((command, payload));

            // `None` means hang up without answering.
            if let Some(response) = response {
                send_message::<MsgPackCodec, _, _>(&mut stream, 0x01, &response)
                    .await
                    .unwrap();
            }
        }
        seen
    });

    (port, handle, accepted)
}

fn config_for(port: u16) -> DiscoveryConfig {
    DiscoveryConfig {
        port,
        connect_timeout_ms: 2_000,
        read_timeout_ms: 2_000,
        ..DiscoveryConfig::default()
    }
}

fn success(payload: ResourcePayload) -> DiscoveryResponse {
    DiscoveryResponse {
        command: 0x01,
        payload: Some(payload),
        error: None,
    }
}

#[tokio::test]
async fn finds_cloudlets_in_resolution_order() {
    let first = IpAddr::V4(Ipv4Addr::new(192, 168, 10, 20));
    let second = IpAddr::V4(Ipv4Addr::new(192, 168, 10, 5));
    let client = DiscoveryClient::new(
        FixedResolver(vec![first, second]),
        &DiscoveryConfig::default(),
    );

    let cloudlets = client.find_nearby_cloudlets().await.unwrap();
    let addresses: Vec<IpAddr> = cloudlets.iter().map(|c| c.address).collect();
    assert_eq!(addresses, vec![first, second]);
}

#[tokio::test]
async fn finds_cloudlets_through_dns() {
    let records = vec![Ipv4Addr::new(10, 1, 0, 1), Ipv4Addr::new(10, 1, 0, 2)];
    let nameserver = start_dns(records.clone()).await;

    let config = DiscoveryConfig {
        dns_name: "cloudlets.test.".into(),
        nameserver: Some(nameserver),
        ..DiscoveryConfig::default()
    };
    let client = DiscoveryClient::from_config(&config).unwrap();

    let cloudlets = client.find_nearby_cloudlets().await.unwrap();
    let addresses: Vec<IpAddr> = cloudlets.iter().map(|c| c.address).collect();
    let expected: Vec<IpAddr> = records.into_iter().map(IpAddr::V4).collect();
    assert_eq!(addresses, expected);
    assert!(cloudlets.iter().all(|c| c.port == 8021));
}

#[tokio::test]
async fn resource_query_updates_snapshot() {
    let (port, responder, _) = start_responder(vec![Some(success(ResourcePayload {
        machine_cpu_num: Some(4),
        ..Default::default()
    }))])
    .await;

    let client = DiscoveryClient::new(FixedResolver(vec![]), &config_for(port));
    let mut cloudlet = Cloudlet::new(LOCALHOST, port);
    client.get_cloudlet_info(&mut cloudlet).await.unwrap();
    assert_eq!(cloudlet.resources.cpu_num, 4);

    let seen = responder.await.unwrap();
    assert_eq!(seen.len(), 1);
    let (command, payload) = &seen[0];
    assert_eq!(*command, 0x14);

    // The request body is exactly the map {"command": 20}.
    let body: BTreeMap<String, i32> = MsgPackCodec::decode(payload).unwrap();
    assert_eq!(body, BTreeMap::from([("command".to_string(), 20)]));
}

#[tokio::test]
async fn usage_and_free_memory_stay_zero() {
    let (port, responder, _) = start_responder(vec![Some(success(ResourcePayload {
        machine_cpu_num: Some(16),
        machine_cpu_clock_speed_mhz: Some(3200.0),
        machine_mem_total_mb: Some(65536),
        machine_total_cpu_usage_percent: Some(12.5),
        machine_total_free_memory_mb: Some(40000),
    }))])
    .await;

    let client = DiscoveryClient::new(FixedResolver(vec![]), &config_for(port));
    let mut cloudlet = Cloudlet::new(LOCALHOST, port);
    client.get_cloudlet_info(&mut cloudlet).await.unwrap();
    responder.await.unwrap();

    assert_eq!(
        cloudlet.resources,
        ResourceSnapshot {
            cpu_num: 16,
            cpu_clock_mhz: 3200.0,
            mem_total_mb: 65536,
            free_mem_mb: 0,
            cpu_usage_percent: 0.0,
        }
    );
}

#[tokio::test]
async fn error_string_is_reported() {
    let (port, responder, _) = start_responder(vec![Some(DiscoveryResponse {
        command: 0x02,
        payload: None,
        error: Some("resource monitor offline".into()),
    })])
    .await;

    let client = DiscoveryClient::new(FixedResolver(vec![]), &config_for(port));
    let mut cloudlet = Cloudlet::new(LOCALHOST, port);
    let err = client.get_cloudlet_info(&mut cloudlet).await.unwrap_err();
    responder.await.unwrap();

    match err {
        DiscoveryError::Remote(message) => assert_eq!(message, "resource monitor offline"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cloudlet.resources, ResourceSnapshot::default());
}

#[tokio::test]
async fn failure_code_without_message() {
    let (port, responder, _) = start_responder(vec![Some(DiscoveryResponse {
        command: 0x02,
        payload: None,
        error: None,
    })])
    .await;

    let client = DiscoveryClient::new(FixedResolver(vec![]), &config_for(port));
    let mut cloudlet = Cloudlet::new(LOCALHOST, port);
    let err = client.get_cloudlet_info(&mut cloudlet).await.unwrap_err();
    responder.await.unwrap();
    assert!(matches!(err, DiscoveryError::Failed(0x02)));
}

#[tokio::test]
async fn hang_up_without_reply() {
    let (port, responder, _) = start_responder(vec![None]).await;

    let client = DiscoveryClient::new(FixedResolver(vec![]), &config_for(port));
    let mut cloudlet = Cloudlet::new(LOCALHOST, port);
    let err = client.get_cloudlet_info(&mut cloudlet).await.unwrap_err();
    responder.await.unwrap();
    assert!(matches!(err, DiscoveryError::Closed));
}

#[tokio::test]
async fn every_query_opens_a_new_connection() {
    let (port, responder, accepted) = start_responder(vec![
        Some(success(ResourcePayload {
            machine_cpu_num: Some(2),
            ..Default::default()
        })),
        Some(success(ResourcePayload {
            machine_cpu_num: Some(6),
            ..Default::default()
        })),
    ])
    .await;

    let client = DiscoveryClient::new(FixedResolver(vec![]), &config_for(port));
    let mut cloudlet = Cloudlet::new(LOCALHOST, port);

    client.get_cloudlet_info(&mut cloudlet).await.unwrap();
    assert_eq!(cloudlet.resources.cpu_num, 2);
    client.get_cloudlet_info(&mut cloudlet).await.unwrap();
    assert_eq!(cloudlet.resources.cpu_num, 6);

    responder.await.unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}
