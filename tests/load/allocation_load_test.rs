//! Concurrent allocation load
//!
//! Many clients allocate and release at once against a shared service; the
//! table must never hand out a relay address twice or exceed its pool.

use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use turn_codec::{
    decode, Attribute, Class, Credential, IntegrityKind, Method, Payload, StunMessage, Transport,
};
use turn_core::{EventNotifier, Processor, Service, ServiceOptions, StaticCredentials};

const REALM: &str = "example.org";
const CLIENTS: u16 = 200;

fn service() -> Service {
    let mut users = HashMap::new();
    users.insert("alice".to_string(), "secret".to_string());
    let options = ServiceOptions {
        realm: REALM.to_string(),
        relay_addresses: vec!["192.0.2.10".parse().unwrap()],
        port_range: 50000..=50000 + CLIENTS - 1,
        ..Default::default()
    };
    Service::new(options, Arc::new(StaticCredentials::new(users)), EventNotifier::disabled())
}

fn tid() -> [u8; 12] {
    let mut tid = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut tid);
    tid
}

fn message(bytes: &[u8]) -> StunMessage {
    match decode(bytes).unwrap() {
        Payload::Message(message) => message,
        other => panic!("expected a STUN message, got {:?}", other),
    }
}

async fn exchange(processor: &Processor, bytes: &[u8], addr: SocketAddr) -> StunMessage {
    let response = processor.process(bytes, addr).await.unwrap().unwrap();
    message(&response.data)
}

async fn signed(
    processor: &Processor,
    addr: SocketAddr,
    method: Method,
    attributes: Vec<Attribute>,
) -> StunMessage {
    let challenge = exchange(
        processor,
        &StunMessage::new(method, Class::Request, tid()).encode(None, true).unwrap(),
        addr,
    )
    .await;
    let nonce = challenge.nonce().unwrap().to_string();

    let credential = Credential::new("alice", REALM, "secret");
    let mut request = StunMessage::new(method, Class::Request, tid());
    request.attributes = attributes;
    let bytes = request
        .with(Attribute::UserName("alice".into()))
        .with(Attribute::Realm(REALM.into()))
        .with(Attribute::Nonce(nonce))
        .encode(Some(&credential.key(IntegrityKind::Sha1)), true)
        .unwrap();
    exchange(processor, &bytes, addr).await
}

fn client(index: u16) -> SocketAddr {
    SocketAddr::new("203.0.113.5".parse().unwrap(), 10000 + index)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocations_get_distinct_relays() {
    let service = service();
    let processor = service.processor("127.0.0.1:3478".parse().unwrap(), "192.0.2.10:3478".parse().unwrap());
    let started = Instant::now();

    let mut handles = Vec::new();
    for index in 0..CLIENTS {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            let response = signed(
                &processor,
                client(index),
                Method::Allocate,
                vec![Attribute::RequestedTransport(Transport::Udp)],
            )
            .await;
            assert_eq!(response.class, Class::SuccessResponse);
            response.xor_relayed_address().unwrap()
        }));
    }

    let mut relays = HashSet::new();
    for handle in handles {
        assert!(relays.insert(handle.await.unwrap()), "relay address handed out twice");
    }
    println!("{} allocations in {:?}", CLIENTS, started.elapsed());

    assert_eq!(service.table().len(), CLIENTS as usize);
    assert_eq!(service.table().users()["alice"].len(), CLIENTS as usize);

    // pool is exhausted
    let overflow = signed(
        &processor,
        client(CLIENTS),
        Method::Allocate,
        vec![Attribute::RequestedTransport(Transport::Udp)],
    )
    .await;
    assert_eq!(overflow.error_code().map(|e| e.code), Some(508));

    let mut handles = Vec::new();
    for index in 0..CLIENTS {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move {
            let response =
                signed(&processor, client(index), Method::Refresh, vec![Attribute::Lifetime(0)]).await;
            assert_eq!(response.class, Class::SuccessResponse);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert!(service.table().is_empty());

    // released addresses are reusable
    let again = signed(
        &processor,
        client(CLIENTS),
        Method::Allocate,
        vec![Attribute::RequestedTransport(Transport::Udp)],
    )
    .await;
    assert_eq!(again.class, Class::SuccessResponse);
}
