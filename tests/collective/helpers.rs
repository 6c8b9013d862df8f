use bytemuck::Pod;
use spanreduce::cluster::topology;
use spanreduce::collective::{stream_broadcast, stream_reduce};
use spanreduce::{
    AllReduce, ConnectionSet, CoordinatorEndpoint, NodeIdentity, SpanConfig, SpanServer,
    ThreadAllReduce, TreeClient,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{DuplexStream, duplex};

/// Config for loopback clusters: children listeners on ephemeral ports.
pub fn loopback_config() -> SpanConfig {
    SpanConfig {
        listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        base_port: 0,
        connect_retries: 20,
        connect_retry_delay: Duration::from_millis(50),
        ..SpanConfig::default()
    }
}

/// Start a coordinator that serves forever on the current runtime.
pub async fn start_coordinator() -> SocketAddr {
    let server = SpanServer::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move { server.serve().await });
    addr
}

/// Start a coordinator on its own thread and runtime, for tests whose
/// nodes block.
pub fn start_coordinator_thread() -> SocketAddr {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let server = SpanServer::bind("127.0.0.1:0".parse().unwrap())
                .await
                .unwrap();
            tx.send(server.local_addr()).unwrap();
            server.serve().await
        })
    });
    rx.recv().unwrap()
}

pub fn client(addr: SocketAddr, session: u64, total: usize, node: usize) -> TreeClient {
    client_with_config(addr, session, total, node, loopback_config())
}

pub fn client_with_config(
    addr: SocketAddr,
    session: u64,
    total: usize,
    node: usize,
    config: SpanConfig,
) -> TreeClient {
    let identity = NodeIdentity::new(total as u64, node as u64, true).unwrap();
    let endpoint = CoordinatorEndpoint::new("127.0.0.1", addr.port(), session);
    TreeClient::with_config(identity, endpoint, config)
}

/// All-reduce `inputs` (one buffer per node) over TCP, every node a task
/// on the current runtime. Returns each node's client and final buffer.
pub async fn run_socket_cluster<T, F>(
    inputs: Vec<Vec<T>>,
    op: F,
    config: SpanConfig,
) -> Vec<(TreeClient, Vec<T>)>
where
    T: Pod + Send + 'static,
    F: Fn(T, T) -> T + Clone + Send + 'static,
{
    let addr = start_coordinator().await;
    let total = inputs.len();

    let handles: Vec<_> = inputs
        .into_iter()
        .enumerate()
        .map(|(node, mut buf)| {
            let op = op.clone();
            let mut client = client_with_config(addr, 1, total, node, config.clone());
            tokio::spawn(async move {
                client.all_reduce(&mut buf, op).await.unwrap();
                (client, buf)
            })
        })
        .collect();

    let mut out = Vec::with_capacity(total);
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

/// Same as [`run_socket_cluster`] but returns only the buffers.
pub async fn socket_all_reduce<T, F>(inputs: Vec<Vec<T>>, op: F) -> Vec<Vec<T>>
where
    T: Pod + Send + 'static,
    F: Fn(T, T) -> T + Clone + Send + 'static,
{
    run_socket_cluster(inputs, op, loopback_config())
        .await
        .into_iter()
        .map(|(_, buf)| buf)
        .collect()
}

/// All-reduce `inputs` with the shared-memory backend, one OS thread per node.
pub fn run_thread_group<T, F>(inputs: Vec<Vec<T>>, op: F) -> Vec<Vec<T>>
where
    T: Pod + Send + 'static,
    F: Fn(T, T) -> T + Clone + Send + 'static,
{
    let group = ThreadAllReduce::group(inputs.len() as u64, true).unwrap();
    let handles: Vec<_> = group
        .into_iter()
        .zip(inputs)
        .map(|(mut node, mut buf)| {
            let op = op.clone();
            std::thread::spawn(move || {
                node.all_reduce(&mut buf, op).unwrap();
                buf
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// Wire `total` nodes into the heap tree over in-memory pipes of
/// `capacity` bytes each.
pub fn duplex_tree(total: usize, capacity: usize) -> Vec<ConnectionSet<DuplexStream>> {
    let mut sets: Vec<ConnectionSet<DuplexStream>> =
        (0..total).map(|_| ConnectionSet::lonely()).collect();
    for child in 1..total as u64 {
        let parent = topology::parent_of(child).unwrap();
        let slot = (child - (2 * parent + 1)) as usize;
        let (up, down) = duplex(capacity);
        sets[child as usize].parent = Some(up);
        sets[parent as usize].children[slot] = Some(down);
    }
    sets
}

/// Run reduce then broadcast on every node of an in-memory tree.
pub async fn duplex_all_reduce<T, F>(
    inputs: Vec<Vec<T>>,
    op: F,
    chunk_size: usize,
    capacity: usize,
) -> Vec<Vec<T>>
where
    T: Pod + Send + 'static,
    F: Fn(T, T) -> T + Clone + Send + 'static,
{
    let sets = duplex_tree(inputs.len(), capacity);
    let handles: Vec<_> = sets
        .into_iter()
        .zip(inputs)
        .map(|(mut set, mut buf)| {
            let op = op.clone();
            tokio::spawn(async move {
                stream_reduce(&mut buf, &mut set, op, chunk_size)
                    .await
                    .unwrap();
                stream_broadcast(&mut buf, &mut set, chunk_size)
                    .await
                    .unwrap();
                buf
            })
        })
        .collect();

    let mut out = Vec::new();
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

/// Per-node inputs whose sum is exact in `f32`.
pub fn ramp_inputs(total: usize, n: usize) -> Vec<Vec<f32>> {
    (0..total)
        .map(|node| {
            (0..n)
                .map(|i| ((i % 1000) as f32) + (node as f32) * 0.5)
                .collect()
        })
        .collect()
}

pub fn elementwise_sum(inputs: &[Vec<f32>]) -> Vec<f32> {
    let n = inputs.first().map_or(0, Vec::len);
    (0..n).map(|i| inputs.iter().map(|v| v[i]).sum()).collect()
}
