//! End-to-end collector tests using the real agent session.

use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use fleetwire_client::{ClientError, Session};
use fleetwire_config::{BehaviorConfig, ConnConfig};
use fleetwire_server::{
    Collector, Inventory, MemoryStore, NodeRecord, NodeSession, NodeStore, Point, SampleSink,
    TracingSink,
};
use fleetwire_types::{HumanDuration, MemSample, NodeId, Timestamp};
use fleetwire_wire::{
    ACK, Envelope, Frame, FrameKind, FrameReader, IdGenerator, Kind, write_frame,
};

struct RecordingSink(Mutex<Vec<Point>>);

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    fn points(&self) -> Vec<Point> {
        self.0.lock().expect("lock").clone()
    }
}

impl SampleSink for RecordingSink {
    fn write(&self, point: Point) {
        self.0.lock().expect("lock").push(point);
    }
}

fn start_collector(sink: Arc<dyn SampleSink>) -> (std::net::SocketAddr, Arc<Collector>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let collector = Arc::new(
        Collector::new(1, BehaviorConfig::default(), Box::new(MemoryStore::new()), sink)
            .expect("collector"),
    );
    let serving = Arc::clone(&collector);
    thread::spawn(move || {
        let _ = serving.serve(listener);
    });
    (addr, collector)
}

fn conn_to(addr: std::net::SocketAddr) -> ConnConfig {
    let mut conn = ConnConfig::default();
    conn.server_address = addr.ip().to_string();
    conn.server_port = addr.port();
    conn.connect_interval = HumanDuration::from_millis(10);
    conn.connect_period = HumanDuration::from_millis(500);
    conn
}

#[test]
fn first_contact_assigns_a_persistent_identity() {
    let (addr, collector) = start_collector(Arc::new(TracingSink));
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fleetwire.json");

    let assigned = {
        let mut conn = conn_to(addr);
        conn.set_path(&path);
        let session = Session::new(conn);
        session.connect().expect("connect");
        let id = session.node_id();
        assert!(!id.is_unassigned());
        assert!(collector.inventory().lookup(&id).is_some());
        session.terminate();
        id
    };

    // A restarted agent presents the saved identity and keeps it.
    let mut conn = ConnConfig::load(&path).expect("saved config");
    conn.server_address = addr.ip().to_string();
    conn.server_port = addr.port();
    conn.set_path(&path);
    assert_eq!(conn.id, assigned);

    let session = Session::new(conn);
    // The collector releases the old connection's claim when it
    // notices the disconnect; retry until it has.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match session.connect() {
            Ok(()) => break,
            Err(e) => {
                assert!(Instant::now() < deadline, "reconnect kept failing: {e}");
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
    assert_eq!(session.node_id(), assigned);
    session.terminate();
}

#[test]
fn samples_reach_the_sink_as_points() {
    let sink = RecordingSink::new();
    let (addr, _collector) = start_collector(Arc::clone(&sink) as Arc<dyn SampleSink>);
    let dir = tempfile::tempdir().expect("tempdir");

    let mut conn = conn_to(addr);
    conn.set_path(dir.path().join("fleetwire.json"));
    let session = Session::new(conn);
    session.connect().expect("connect");

    let writer = thread::spawn({
        let session = Arc::clone(&session);
        move || session.run_writer()
    });

    let sample = MemSample {
        timestamp: Timestamp::new(1_000),
        mem_total: 64,
        mem_used: 32,
        mem_free: 32,
        mem_shared: 0,
        mem_buffers: 0,
        cache_used: 8,
        cache_free: 8,
        swap_total: 0,
        swap_used: 0,
        swap_free: 0,
    };
    let payload = postcard::to_allocvec(&sample).expect("encode");
    let message = session
        .new_message(Kind::MemInfo, payload)
        .expect("message");
    session.enqueue(Frame::binary(message));

    let deadline = Instant::now() + Duration::from_secs(5);
    let point = loop {
        if let Some(point) = sink.points().into_iter().next() {
            break point;
        }
        assert!(Instant::now() < deadline, "no point arrived");
        thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(point.measurement, "memory");
    assert_eq!(point.timestamp, Timestamp::new(1_000));
    assert!(
        point
            .fields
            .contains(&("mem_total", 64.0))
    );
    let node_tag = point
        .tags
        .iter()
        .find(|(name, _)| *name == "node")
        .expect("node tag");
    assert_eq!(node_tag.1, session.node_id().to_string());

    session.terminate();
    writer.join().expect("writer");
}

#[test]
fn duplicate_connection_is_refused() {
    let (addr, _collector) = start_collector(Arc::new(TracingSink));
    let dir = tempfile::tempdir().expect("tempdir");

    let mut conn = conn_to(addr);
    conn.set_path(dir.path().join("fleetwire.json"));
    let first = Session::new(conn);
    first.connect().expect("first connect");
    let id = first.node_id();

    // Same identity, second socket: the collector hangs up during the
    // handshake instead of sending EOT.
    let mut conn = conn_to(addr);
    conn.id = id;
    let second = Session::new(conn);
    let err = second.connect().expect_err("must be refused");
    assert!(
        matches!(
            err,
            ClientError::HandshakeViolation(_) | ClientError::Wire(_)
        ),
        "{err}"
    );

    first.terminate();
}

#[test]
fn claim_is_released_when_the_handshake_dies_after_admission() {
    let behavior = BehaviorConfig::default();
    let known = NodeId::from(0x0F0F_u32);
    let store = MemoryStore::new();
    store
        .save(&NodeRecord::new(known.clone(), behavior.clone()))
        .expect("seed");
    let inventory = Arc::new(Inventory::new(Box::new(store)));
    inventory.hydrate().expect("hydrate");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).expect("connect");
    let (stream, peer) = listener.accept().expect("accept");
    // Kill the write half so the config/EOT replies fail after the
    // identity has already been admitted.
    stream.shutdown(Shutdown::Write).expect("shutdown");

    write_frame(&mut &client, &Frame::text(Bytes::from(known.clone()))).expect("identity");

    let session = NodeSession::new(
        stream,
        peer,
        Arc::clone(&inventory),
        Arc::new(TracingSink),
        behavior.clone(),
        Arc::new(IdGenerator::new(&NodeId::from(9_u32))),
    );
    session.run();

    // The dead session must not leave the identity locked out.
    inventory
        .admit(&known, &behavior)
        .expect("identity reconnects after the failed handshake");
}

#[test]
fn pings_echo_and_unknown_kinds_never_reach_the_sink() {
    let sink = RecordingSink::new();
    let (addr, _collector) = start_collector(Arc::clone(&sink) as Arc<dyn SampleSink>);

    let stream = TcpStream::connect(addr).expect("connect");
    let mut reader = FrameReader::new(stream.try_clone().expect("clone"));
    write_frame(&mut &stream, &Frame::text(Bytes::new())).expect("identity");
    loop {
        let frame = reader.next_frame().expect("handshake frame");
        let envelope = Envelope::decode(&frame.payload).expect("envelope");
        if envelope.kind == Kind::Eot {
            break;
        }
    }

    write_frame(
        &mut &stream,
        &Frame::new(FrameKind::Ping, Bytes::from_static(b"hb")),
    )
    .expect("ping");
    let pong = reader.next_frame().expect("pong");
    assert_eq!(pong.kind, FrameKind::Pong);
    assert_eq!(pong.payload.as_ref(), b"hb");

    // An unknown kind is acknowledged like any sample but produces no
    // point.
    let envelope = Envelope::new(1, Kind::Unknown(42), vec![1, 2, 3]);
    write_frame(&mut &stream, &Frame::binary(envelope.encode())).expect("send unknown");
    let ack = reader.next_frame().expect("ack");
    assert_eq!(ack.kind, FrameKind::Text);
    assert_eq!(ack.payload.as_ref(), ACK);

    // A second ping fences the dispatch of the unknown envelope.
    write_frame(&mut &stream, &Frame::new(FrameKind::Ping, Bytes::new())).expect("ping");
    let fence = reader.next_frame().expect("pong");
    assert_eq!(fence.kind, FrameKind::Pong);
    assert!(sink.points().is_empty());
}

#[test]
fn unknown_identity_is_reassigned() {
    let (addr, collector) = start_collector(Arc::new(TracingSink));
    let dir = tempfile::tempdir().expect("tempdir");

    let mut conn = conn_to(addr);
    conn.id = NodeId::from(0xDEAD_BEEF_u32);
    conn.set_path(dir.path().join("fleetwire.json"));

    let session = Session::new(conn);
    session.connect().expect("connect");
    let assigned = session.node_id();
    assert_ne!(assigned, NodeId::from(0xDEAD_BEEF_u32));
    assert!(collector.inventory().lookup(&assigned).is_some());
    session.terminate();
}
