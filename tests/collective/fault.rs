use super::helpers::{client, start_coordinator};
use spanreduce::ReduceOp;
use spanreduce::transport::WireStream;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Register as `node` of `total` and report `port` as this node's listener.
/// Returns the parent's address, if any.
async fn register_by_hand(
    coordinator: SocketAddr,
    session: u64,
    total: u64,
    node: u64,
    port: u16,
) -> Option<SocketAddr> {
    let stream = TcpStream::connect(coordinator).await.unwrap();
    let mut wire = WireStream::new(stream, "coordinator");
    wire.send_u64(session, "session").await.unwrap();
    wire.send_u64(total, "total").await.unwrap();
    wire.send_u64(node, "node").await.unwrap();
    assert_eq!(wire.recv_i32("ok").await.unwrap(), 1);
    wire.recv_u16("children").await.unwrap();
    wire.send_u16(port, "port").await.unwrap();
    let ip = wire.recv_ipv4("parent address").await.unwrap();
    let parent_port = wire.recv_u16("parent port").await.unwrap();
    ip.map(|ip| SocketAddr::V4(SocketAddrV4::new(ip, parent_port)))
}

#[tokio::test]
async fn test_child_closing_mid_reduce_is_fatal() {
    let addr = start_coordinator().await;

    let child = tokio::spawn(async move {
        let parent = register_by_hand(addr, 1, 2, 1, 0).await.unwrap();
        let mut stream = TcpStream::connect(parent).await.unwrap();
        // Three bytes of a sixteen byte buffer, then gone.
        stream.write_all(&[1, 2, 3]).await.unwrap();
    });

    let mut root = client(addr, 1, 2, 0);
    let mut buf = vec![1.0f32; 4];
    let err = root
        .all_reduce(&mut buf, ReduceOp::Sum.combiner())
        .await
        .unwrap_err();
    child.await.unwrap();

    assert!(err.is_peer_closed(), "{err}");
    assert!(root.connections().is_none());
}

#[tokio::test]
async fn test_parent_closing_mid_broadcast_is_fatal() {
    let addr = start_coordinator().await;

    let parent = tokio::spawn(async move {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(register_by_hand(addr, 2, 2, 0, port).await.is_none());

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut reduced = [0u8; 32];
        stream.read_exact(&mut reduced).await.unwrap();
        // Half of the result, then gone.
        stream.write_all(&reduced[..16]).await.unwrap();
    });

    let mut leaf = client(addr, 2, 2, 1);
    let mut buf = vec![7u64; 4];
    let err = leaf
        .all_reduce(&mut buf, ReduceOp::Sum.combiner())
        .await
        .unwrap_err();
    parent.await.unwrap();

    assert!(err.is_peer_closed(), "{err}");
    assert!(leaf.connections().is_none());
}
