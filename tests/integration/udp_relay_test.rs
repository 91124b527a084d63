//! End-to-end relay over loopback UDP
//!
//! A client allocates on a running server, a peer socket exchanges data with
//! it through the relay address using Send/Data indications and channels.

use bytes::Bytes;
use rand::{Rng, RngCore};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use turn_codec::{
    check_integrity, decode, Attribute, ChannelData, Class, Credential, IntegrityKind, Method,
    Payload, StunMessage, Transport,
};
use turn_config::InterfaceConfig;
use turn_core::{
    AllocationOptions, ChannelLookup, EventNotifier, PasswordLookup, Service, ServiceOptions,
    StaticCredentials,
};
use turn_server::RelayServer;

const REALM: &str = "example.org";
const WAIT: Duration = Duration::from_secs(2);

async fn start_server() -> (Service, SocketAddr) {
    let mut users = HashMap::new();
    users.insert("alice".to_string(), "secret".to_string());
    start_server_with(Arc::new(StaticCredentials::new(users)), Duration::from_secs(5)).await
}

async fn start_server_with(lookup: Arc<dyn PasswordLookup>, auth_timeout: Duration) -> (Service, SocketAddr) {
    // random window to avoid colliding with other test runs
    let start = rand::thread_rng().gen_range(20000..40000u16);
    let options = ServiceOptions {
        realm: REALM.to_string(),
        allocation: AllocationOptions::default(),
        relay_addresses: vec!["127.0.0.1".parse().unwrap()],
        port_range: start..=start + 200,
        auth_timeout,
        ..Default::default()
    };

    let (events, receiver) = EventNotifier::channel(64);
    let service = Service::new(options, lookup, events);
    let interface = InterfaceConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        external: "127.0.0.1:0".parse().unwrap(),
    };
    let server = RelayServer::bind(service.clone(), receiver, &[interface])
        .await
        .expect("Failed to bind server");
    let addr = server.local_addrs()[0];
    tokio::spawn(server.run());
    (service, addr)
}

struct TestClient {
    socket: UdpSocket,
    server: SocketAddr,
    credential: Credential,
    nonce: Option<String>,
}

impl TestClient {
    async fn connect(server: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            server,
            credential: Credential::new("alice", REALM, "secret"),
            nonce: None,
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn recv(&self) -> Payload {
        let mut buf = vec![0u8; 2048];
        let (len, from) = timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .expect("Timed out waiting for the server")
            .unwrap();
        assert_eq!(from, self.server);
        decode(&buf[..len]).unwrap()
    }

    async fn recv_message(&self) -> StunMessage {
        match self.recv().await {
            Payload::Message(message) => message,
            other => panic!("expected a STUN message, got {:?}", other),
        }
    }

    async fn send_raw(&self, bytes: &[u8]) {
        self.socket.send_to(bytes, self.server).await.unwrap();
    }

    /// Send a signed request without waiting for the answer; the first call
    /// picks up the nonce from a 401. Returns the bytes sent.
    async fn send_signed(&mut self, method: Method, attributes: Vec<Attribute>) -> Bytes {
        if self.nonce.is_none() {
            let mut unsigned = StunMessage::new(method, Class::Request, tid());
            unsigned.attributes = attributes.clone();
            self.send_raw(&unsigned.encode(None, true).unwrap()).await;
            let challenge = self.recv_message().await;
            assert_eq!(challenge.error_code().map(|e| e.code), Some(401));
            self.nonce = challenge.nonce().map(str::to_string);
        }

        let mut message = StunMessage::new(method, Class::Request, tid());
        message.attributes = attributes;
        let bytes = message
            .with(Attribute::UserName(self.credential.username.clone()))
            .with(Attribute::Realm(self.credential.realm.clone()))
            .with(Attribute::Nonce(self.nonce.clone().unwrap_or_default()))
            .encode(Some(&self.credential.key(IntegrityKind::Sha1)), true)
            .unwrap();
        self.send_raw(&bytes).await;
        bytes
    }

    /// Signed request and its response
    async fn request(&mut self, method: Method, attributes: Vec<Attribute>) -> StunMessage {
        let bytes = self.send_signed(method, attributes).await;
        let response = self.recv_message().await;
        assert_eq!(response.transaction_id, message_tid(&bytes));
        response
    }
}

fn tid() -> [u8; 12] {
    let mut tid = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut tid);
    tid
}

fn message_tid(bytes: &[u8]) -> [u8; 12] {
    let mut tid = [0u8; 12];
    tid.copy_from_slice(&bytes[8..20]);
    tid
}

async fn recv_at_peer(peer: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 2048];
    let (len, from) = timeout(WAIT, peer.recv_from(&mut buf))
        .await
        .expect("Timed out waiting for relayed data")
        .unwrap();
    buf.truncate(len);
    (buf, from)
}

#[tokio::test]
async fn test_binding_over_udp() {
    let (_service, server) = start_server().await;
    let client = TestClient::connect(server).await;

    let request = StunMessage::new(Method::Binding, Class::Request, tid());
    client.send_raw(&request.encode(None, true).unwrap()).await;

    let response = client.recv_message().await;
    assert_eq!(response.class, Class::SuccessResponse);
    assert_eq!(response.transaction_id, request.transaction_id);
    assert_eq!(response.xor_mapped_address(), Some(client.local_addr()));
}

#[tokio::test]
async fn test_relay_round_trip() {
    let (service, server) = start_server().await;
    let mut client = TestClient::connect(server).await;
    let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let peer_addr = peer.local_addr().unwrap();

    let allocated = client
        .request(Method::Allocate, vec![Attribute::RequestedTransport(Transport::Udp)])
        .await;
    assert_eq!(allocated.class, Class::SuccessResponse);
    assert_eq!(check_integrity(&allocated, &client.credential), Ok(IntegrityKind::Sha1));
    let relay = allocated.xor_relayed_address().unwrap();
    assert_eq!(allocated.xor_mapped_address(), Some(client.local_addr()));

    let permitted = client
        .request(Method::CreatePermission, vec![Attribute::XorPeerAddress(peer_addr)])
        .await;
    assert_eq!(permitted.class, Class::SuccessResponse);

    // client -> peer through a Send indication
    let send = StunMessage::new(Method::Send, Class::Indication, tid())
        .with(Attribute::XorPeerAddress(peer_addr))
        .with(Attribute::Data(Bytes::from_static(b"ping")))
        .encode(None, false)
        .unwrap();
    client.send_raw(&send).await;
    let (data, from) = recv_at_peer(&peer).await;
    assert_eq!(data, b"ping");
    assert_eq!(from, relay);

    // peer -> client as a Data indication
    peer.send_to(b"pong", relay).await.unwrap();
    let indication = client.recv_message().await;
    assert_eq!((indication.method, indication.class), (Method::Data, Class::Indication));
    assert_eq!(indication.peer_addresses(), vec![peer_addr]);
    assert_eq!(indication.data().map(|data| &data[..]), Some(&b"pong"[..]));

    let bound = client
        .request(
            Method::ChannelBind,
            vec![Attribute::ChannelNumber(0x4000), Attribute::XorPeerAddress(peer_addr)],
        )
        .await;
    assert_eq!(bound.class, Class::SuccessResponse);

    // client -> peer over the channel
    let frame = ChannelData::new(0x4000, Bytes::from_static(b"media")).encode().unwrap();
    client.send_raw(&frame).await;
    let (data, from) = recv_at_peer(&peer).await;
    assert_eq!(data, b"media");
    assert_eq!(from, relay);

    // peer -> client now arrives as ChannelData
    peer.send_to(b"reply", relay).await.unwrap();
    match client.recv().await {
        Payload::ChannelData(frame) => {
            assert_eq!(frame.number, 0x4000);
            assert_eq!(&frame.data[..], b"reply");
        }
        other => panic!("expected channel data, got {:?}", other),
    }

    let released = client.request(Method::Refresh, vec![Attribute::Lifetime(0)]).await;
    assert_eq!(released.class, Class::SuccessResponse);
    assert_eq!(released.lifetime(), Some(0));
    assert!(service.table().is_empty());
}

#[tokio::test]
async fn test_unpermitted_peer_is_dropped() {
    let (_service, server) = start_server().await;
    let mut client = TestClient::connect(server).await;
    let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let allocated = client
        .request(Method::Allocate, vec![Attribute::RequestedTransport(Transport::Udp)])
        .await;
    let relay = allocated.xor_relayed_address().unwrap();

    // relay socket is bound on the Allocated event; give it a moment
    tokio::time::sleep(Duration::from_millis(100)).await;
    stranger.send_to(b"spam", relay).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let received = timeout(Duration::from_millis(300), client.socket.recv_from(&mut buf)).await;
    assert!(received.is_err(), "unpermitted peer data was delivered");
}

#[tokio::test]
async fn test_garbage_gets_no_reply() {
    let (_service, server) = start_server().await;
    let client = TestClient::connect(server).await;
    client.send_raw(&[0xff; 32]).await;

    let mut buf = vec![0u8; 2048];
    let received = timeout(Duration::from_millis(300), client.socket.recv_from(&mut buf)).await;
    assert!(received.is_err());

    // the server is still serving
    let request = StunMessage::new(Method::Binding, Class::Request, tid());
    client.send_raw(&request.encode(None, true).unwrap()).await;
    assert_eq!(client.recv_message().await.class, Class::SuccessResponse);
}

#[tokio::test]
async fn test_pending_lookup_does_not_block_interface() {
    let (lookup, mut requests) = ChannelLookup::new(8);
    let (service, server) = start_server_with(Arc::new(lookup), Duration::from_secs(3)).await;

    // the password store takes the request and sits on it
    let mut stalled = TestClient::connect(server).await;
    stalled
        .send_signed(Method::Allocate, vec![Attribute::RequestedTransport(Transport::Udp)])
        .await;
    let pending = timeout(WAIT, requests.recv())
        .await
        .expect("Password lookup never started")
        .unwrap();
    assert_eq!(pending.username, "alice");

    let other = TestClient::connect(server).await;
    let request = StunMessage::new(Method::Binding, Class::Request, tid());
    other.send_raw(&request.encode(None, true).unwrap()).await;
    let response = timeout(Duration::from_millis(500), other.recv_message())
        .await
        .expect("Binding waited behind the password lookup");
    assert_eq!(response.class, Class::SuccessResponse);
    assert_eq!(response.transaction_id, request.transaction_id);

    pending.respond(Some("secret".to_string()));
    let allocated = stalled.recv_message().await;
    assert_eq!(allocated.class, Class::SuccessResponse);
    assert_eq!(service.table().len(), 1);
}
