//! Integration tests for proclink.
//!
//! These exercise the codec and transport planes together: packed
//! buffers travelling through the framing state machines, and the full
//! server/client stack over a real Unix socket.

use std::sync::{Arc, Mutex};

use proclink::buffer::{Buffer, BufferKind};
use proclink::client::{Client, ClientConfig};
use proclink::codec::{ids, Codec, InfoPair, ProcId, Value};
use proclink::error::ProclinkError;
use proclink::mux::Multiplexer;
use proclink::protocol::{Header, MessageReader, HEADER_SIZE, TAG_DYNAMIC};
use proclink::server::{Server, ServerConfig};

fn my_ids() -> (u32, u32) {
    unsafe { (libc::getuid(), libc::getgid()) }
}

/// The end-to-end codec/transport property: a self-describing
/// {key:"foo", value: u32 42} record, framed with {pindex=3, tag=77},
/// reassembled across a simulated mid-body EAGAIN split, dispatched to
/// the tag-77 posted receive, and unpacked intact.
#[test]
fn test_record_reassembled_across_split_reads() {
    let codec = Codec::with_builtins();

    // client side: pack and frame
    let mut buf = Buffer::new(BufferKind::FullyDescribed);
    let record = Value::Info(InfoPair::new("foo", Value::Uint32(42)));
    codec.pack(&mut buf, &[record.clone()], ids::INFO).unwrap();
    let payload = buf.unload();
    let header = Header::new(3, 77, payload.len() as u32);
    let mut wire = header.encode().to_vec();
    wire.extend_from_slice(&payload);

    // server side: posted receive on tag 77
    let got: Arc<Mutex<Vec<(Header, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = got.clone();
    let codec_for_handler = codec.clone();
    let mut mux = Multiplexer::new(BufferKind::FullyDescribed);
    mux.post(
        77,
        Box::new(move |event| {
            let mut buf = event.payload.expect("delivered payload");
            let value = codec_for_handler.unpack_one(&mut buf, ids::INFO).unwrap();
            sink.lock().unwrap().push((event.header, value));
        }),
    );

    // two reads split inside the body, as a short socket read would
    let mut reader = MessageReader::new();
    let cut = HEADER_SIZE + payload.len() / 2;
    assert!(reader.push(&wire[..cut]).unwrap().is_empty());
    let msgs = reader.push(&wire[cut..]).unwrap();
    assert_eq!(msgs.len(), 1);
    for msg in msgs {
        mux.deliver(msg).unwrap();
    }

    let got = got.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].0.pindex, 3);
    assert_eq!(got[0].0.tag, 77);
    assert_eq!(got[0].1, record);
}

/// Packed bytes are identical no matter how the wire stream is
/// chunked.
#[test]
fn test_reassembly_chunking_invariance() {
    let codec = Codec::with_builtins();
    let mut buf = Buffer::new(BufferKind::FullyDescribed);
    let values: Vec<Value> = (0..100u32).map(Value::Uint32).collect();
    codec.pack(&mut buf, &values, ids::UINT32).unwrap();
    let payload = buf.unload();
    let mut wire = Header::new(1, 50, payload.len() as u32).encode().to_vec();
    wire.extend_from_slice(&payload);

    for chunk in [1usize, 3, 7, HEADER_SIZE, wire.len()] {
        let mut reader = MessageReader::new();
        let mut msgs = Vec::new();
        for piece in wire.chunks(chunk) {
            msgs.extend(reader.push(piece).unwrap());
        }
        assert_eq!(msgs.len(), 1, "chunk size {}", chunk);
        assert_eq!(msgs[0].payload, payload, "chunk size {}", chunk);
    }
}

async fn started_pair(nspace: &str) -> (Server, Client) {
    let server = Server::start(ServerConfig::default()).await.unwrap();
    let (uid, gid) = my_ids();
    let id = ProcId::new(nspace, 0);
    server
        .handle()
        .register_client(id.clone(), uid, gid)
        .await
        .unwrap();
    let client = Client::connect(ClientConfig::for_endpoint(server.endpoint().clone(), id))
        .await
        .unwrap();
    (server, client)
}

/// Full stack: a mixed-type payload request/reply over a real Unix
/// socket, echoed by the server.
#[tokio::test]
async fn test_full_stack_request_reply() {
    let (server, client) = started_pair("itest-1").await;

    let handle = server.handle();
    server
        .handle()
        .post_recv(
            proclink::protocol::TAG_WILDCARD,
            Box::new(move |event| {
                let payload = event
                    .payload
                    .map(|b| b.as_slice().to_vec())
                    .unwrap_or_default();
                let reply = Buffer::load(payload, BufferKind::FullyDescribed);
                let _ = handle.send(event.header.pindex, event.header.tag, reply);
            }),
        )
        .unwrap();

    let codec = Codec::with_builtins();
    let mut buf = Buffer::new(BufferKind::FullyDescribed);
    let request = vec![
        Value::Info(InfoPair::new("foo", Value::Uint32(42))),
        Value::Info(InfoPair::new("host", Value::String("node-7".into()))),
    ];
    for v in &request {
        codec.pack(&mut buf, &[v.clone()], ids::INFO).unwrap();
    }

    let (header, mut reply) = client.send_recv(buf).await.unwrap();
    assert!(header.tag >= TAG_DYNAMIC);

    let got = codec.unpack(&mut reply, 2, ids::INFO).unwrap();
    assert_eq!(got, request);

    client.finalize().await.unwrap();
    server.finalize().await.unwrap();
}

/// Concurrent outstanding requests each get a distinct dynamic tag and
/// each reply routes to its own caller.
#[tokio::test]
async fn test_concurrent_requests_distinct_tags() {
    let (server, client) = started_pair("itest-2").await;

    let handle = server.handle();
    server
        .handle()
        .post_recv(
            proclink::protocol::TAG_WILDCARD,
            Box::new(move |event| {
                let payload = event
                    .payload
                    .map(|b| b.as_slice().to_vec())
                    .unwrap_or_default();
                let reply = Buffer::load(payload, BufferKind::FullyDescribed);
                let _ = handle.send(event.header.pindex, event.header.tag, reply);
            }),
        )
        .unwrap();

    let codec = Codec::with_builtins();
    let client = Arc::new(client);
    let mut joins = Vec::new();
    for i in 0..16u32 {
        let client = client.clone();
        let codec = codec.clone();
        joins.push(tokio::spawn(async move {
            let mut buf = Buffer::new(BufferKind::FullyDescribed);
            codec.pack(&mut buf, &[Value::Uint32(i)], ids::UINT32).unwrap();
            let (header, mut reply) = client.send_recv(buf).await.unwrap();
            let vals = codec.unpack(&mut reply, 1, ids::UINT32).unwrap();
            assert_eq!(vals, vec![Value::Uint32(i)]);
            header.tag
        }));
    }

    let mut tags = Vec::new();
    for join in joins {
        tags.push(join.await.unwrap());
    }
    tags.sort_unstable();
    tags.dedup();
    assert_eq!(tags.len(), 16, "every outstanding request got its own tag");

    Arc::try_unwrap(client)
        .ok()
        .expect("all clones joined")
        .finalize()
        .await
        .unwrap();
    server.finalize().await.unwrap();
}

/// A credential failing validation leaves no records and closes the
/// socket: the client observes only a generic rejection.
#[tokio::test]
async fn test_credential_rejection_leaves_no_state() {
    let server = Server::start(ServerConfig::default()).await.unwrap();
    let (uid, gid) = my_ids();
    let id = ProcId::new("itest-3", 0);
    // registration disagrees with who will actually connect
    server
        .handle()
        .register_client(id.clone(), uid.wrapping_add(1), gid)
        .await
        .unwrap();

    let err = Client::connect(ClientConfig::for_endpoint(server.endpoint().clone(), id))
        .await
        .unwrap_err();
    assert!(matches!(err, ProclinkError::InvalidCredential));

    let stats = server.handle().stats().await.unwrap();
    assert_eq!(stats.peers, 0, "no connection record allocated");
    server.finalize().await.unwrap();
}

/// Self-describing payloads can be introspected by the receiver
/// without prior schema knowledge.
#[tokio::test]
async fn test_received_buffer_introspection() {
    let (server, client) = started_pair("itest-4").await;

    let seen: Arc<Mutex<Vec<u16>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let codec = Codec::with_builtins();
    let codec_for_handler = codec.clone();
    server
        .handle()
        .post_recv(
            42,
            Box::new(move |event| {
                let mut buf = event.payload.expect("payload");
                while buf.remaining() > 0 {
                    let (ty, _value) = codec_for_handler.peek_unpack(&mut buf).unwrap();
                    sink.lock().unwrap().push(ty);
                }
            }),
        )
        .unwrap();

    let mut buf = Buffer::new(BufferKind::FullyDescribed);
    codec.pack(&mut buf, &[Value::Bool(true)], ids::BOOL).unwrap();
    codec
        .pack(&mut buf, &[Value::String("x".into())], ids::STRING)
        .unwrap();
    codec
        .pack(&mut buf, &[Value::Double(2.5)], ids::DOUBLE)
        .unwrap();
    client.send(42, buf).unwrap();

    for _ in 0..100 {
        if seen.lock().unwrap().len() == 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(*seen.lock().unwrap(), vec![ids::BOOL, ids::STRING, ids::DOUBLE]);

    client.finalize().await.unwrap();
    server.finalize().await.unwrap();
}
