//! Exercises the transport layer the way a transaction layer would: bind
//! two endpoints, push a request through, push a response back.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;

use uasip_sip_types::{CSeq, HeaderName, Message, Method, NameAddr, Request, Response, StatusCode, TypedHeader, Uri, Via};

use crate::factory::TransportType;
use crate::manager::TransportManager;
use crate::transport::{Transport, TransportEvent};

struct Endpoint {
    transport: Arc<TransportManager>,
    event_rx: mpsc::Receiver<ReceivedEvent>,
}

#[derive(Debug)]
enum ReceivedEvent {
    Request { request: Request, source: SocketAddr },
    Response { response: Response, source: SocketAddr },
    Error { error: String },
}

impl Endpoint {
    async fn new() -> Self {
        let (manager, transport_rx) = TransportManager::with_defaults().await.unwrap();
        let transport = Arc::new(manager);

        let (event_tx, event_rx) = mpsc::channel(100);
        spawn_bridge(transport_rx, event_tx);

        Endpoint { transport, event_rx }
    }

    async fn bind_udp(&self) -> SocketAddr {
        self.transport
            .create_transport(TransportType::Udp, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    async fn bind_tcp(&self) -> SocketAddr {
        self.transport
            .create_transport(TransportType::Tcp, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    async fn send(&self, message: Message, destination: SocketAddr) {
        self.transport.send_message(message, destination).await.unwrap();
    }

    async fn wait(&mut self, timeout: Duration) -> Option<ReceivedEvent> {
        tokio::time::timeout(timeout, self.event_rx.recv()).await.ok().flatten()
    }

    async fn shutdown(self) {
        self.transport.close_all().await.unwrap();
    }
}

fn spawn_bridge(mut transport_rx: mpsc::Receiver<TransportEvent>, event_tx: mpsc::Sender<ReceivedEvent>) {
    tokio::spawn(async move {
        while let Some(event) = transport_rx.recv().await {
            let mapped = match event {
                TransportEvent::MessageReceived { message, source, .. } => match message {
                    Message::Request(request) => ReceivedEvent::Request { request, source },
                    Message::Response(response) => ReceivedEvent::Response { response, source },
                },
                TransportEvent::Error { error } => ReceivedEvent::Error { error },
                TransportEvent::ConnectionOpened { .. } | TransportEvent::ConnectionClosed { .. } => continue,
                TransportEvent::Closed => break,
            };
            if event_tx.send(mapped).await.is_err() {
                break;
            }
        }
    });
}

fn register_request(call_id: &str) -> Request {
    let mut req = Request::new(Method::Register, Uri::parse("sip:example.com").unwrap());
    req.push_header(TypedHeader::Via(Via::new("UDP", "127.0.0.1:0", "z9hG4bK-test1")));
    req.push_header(TypedHeader::From(NameAddr {
        display_name: Some("alice".to_string()),
        uri: Uri::parse("sip:alice@example.com").unwrap(),
        params: vec![("tag".to_string(), Some("tag1".to_string()))],
    }));
    req.push_header(TypedHeader::To(NameAddr::new(Uri::parse("sip:bob@example.com").unwrap())));
    req.push_header(TypedHeader::CallId(call_id.to_string()));
    req.push_header(TypedHeader::CSeq(CSeq {
        sequence: 1,
        method: Method::Register,
    }));
    req.push_header(TypedHeader::MaxForwards(70));
    req
}

fn ok_for(request: &Request) -> Response {
    let mut resp = Response::new(StatusCode::OK, "OK");
    if let Some(via) = request.header(HeaderName::Via) {
        resp.push_header(via.clone());
    }
    if let Some(from) = request.header(HeaderName::From) {
        resp.push_header(from.clone());
    }
    if let Some(to) = request.header(HeaderName::To) {
        resp.push_header(to.clone());
    }
    if let Some(call_id) = request.call_id() {
        resp.push_header(TypedHeader::CallId(call_id.to_string()));
    }
    if let Some(cseq) = request.cseq() {
        resp.push_header(TypedHeader::CSeq(*cseq));
    }
    resp
}

#[tokio::test]
async fn udp_round_trip_request_and_response() {
    let mut client = Endpoint::new().await;
    let client_addr = client.bind_udp().await;

    let mut server = Endpoint::new().await;
    let server_addr = server.bind_udp().await;

    let request = register_request("call1@example.com");
    client.send(Message::Request(request.clone()), server_addr).await;

    let server_event = server.wait(Duration::from_secs(5)).await;
    let (request, source) = match server_event {
        Some(ReceivedEvent::Request { request, source }) => (request, source),
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(request.method, Method::Register);
    assert_eq!(request.call_id(), Some("call1@example.com"));
    assert_eq!(source.ip(), client_addr.ip());

    let response = ok_for(&request);
    server.send(Message::Response(response), source).await;

    let client_event = client.wait(Duration::from_secs(5)).await;
    match client_event {
        Some(ReceivedEvent::Response { response, .. }) => {
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.call_id(), Some("call1@example.com"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn tcp_round_trip_request_and_response() {
    let mut client = Endpoint::new().await;
    client.bind_tcp().await;

    let mut server = Endpoint::new().await;
    let server_addr = server.bind_tcp().await;

    let request = register_request("call2@example.com");
    client.send(Message::Request(request.clone()), server_addr).await;

    let server_event = server.wait(Duration::from_secs(5)).await;
    let (request, source) = match server_event {
        Some(ReceivedEvent::Request { request, source }) => (request, source),
        other => panic!("unexpected event: {other:?}"),
    };
    assert_eq!(request.method, Method::Register);

    let response = ok_for(&request);
    server.send(Message::Response(response), source).await;

    let client_event = client.wait(Duration::from_secs(5)).await;
    match client_event {
        Some(ReceivedEvent::Response { response, .. }) => {
            assert_eq!(response.status, StatusCode::OK);
            assert_eq!(response.call_id(), Some("call2@example.com"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_datagram_is_reported_and_does_not_crash_the_loop() {
    let mut server = Endpoint::new().await;
    let server_addr = server.bind_udp().await;

    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(b"not a sip message at all", server_addr).await.unwrap();

    let event = server.wait(Duration::from_secs(5)).await;
    assert!(matches!(event, Some(ReceivedEvent::Error { .. })));

    // The loop must still be alive for a well-formed message afterward.
    let request = register_request("call3@example.com");
    let bytes = Message::Request(request).to_bytes();
    socket.send_to(&bytes, server_addr).await.unwrap();
    let event = server.wait(Duration::from_secs(5)).await;
    assert!(matches!(event, Some(ReceivedEvent::Request { .. })));

    server.shutdown().await;
}
