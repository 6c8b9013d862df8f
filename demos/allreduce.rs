//! Four nodes summing a vector, once over TCP and once through shared memory.
//!
//! A local coordinator arranges the socket nodes into a tree. Each node is
//! an OS thread making blocking calls, the same as separate processes would.
//!
//! ```bash
//! cargo run --example allreduce
//! ```

use spanreduce::{
    AllReduce, CoordinatorEndpoint, NodeIdentity, ReduceOp, Result, SocketAllReduce, SpanConfig,
    SpanError, SpanServer, ThreadAllReduce,
};
use std::thread::JoinHandle;

const NODES: u64 = 4;
const LEN: usize = 100_000;

fn input(node: u64) -> Vec<f32> {
    (0..LEN).map(|i| (i % 10) as f32 * (node + 1) as f32).collect()
}

fn join_all(handles: Vec<JoinHandle<Result<Vec<f32>>>>) -> Result<Vec<Vec<f32>>> {
    handles
        .into_iter()
        .map(|h| h.join().expect("node thread panicked"))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let server = SpanServer::bind("127.0.0.1:0".parse().unwrap()).await?;
    let port = server.local_addr().port();
    tokio::spawn(async move { server.serve().await });

    let config = SpanConfig {
        listen_addr: "127.0.0.1".parse().unwrap(),
        ..SpanConfig::from_env()
    };

    let handles: Vec<_> = (0..NODES)
        .map(|node| {
            let config = config.clone();
            std::thread::spawn(move || {
                let identity = NodeIdentity::new(NODES, node, true)?;
                let endpoint = CoordinatorEndpoint::new("127.0.0.1", port, 1);
                let mut sock = SocketAllReduce::with_config(identity, endpoint, config)?;
                let mut buf = input(node);
                sock.all_reduce(&mut buf, ReduceOp::Sum.combiner())?;
                Ok::<_, SpanError>(buf)
            })
        })
        .collect();
    let socket = tokio::task::spawn_blocking(move || join_all(handles))
        .await
        .expect("join task panicked")?;

    let handles: Vec<_> = ThreadAllReduce::group(NODES, true)?
        .into_iter()
        .map(|mut node| {
            std::thread::spawn(move || {
                let mut buf = input(node.identity().node());
                node.all_reduce(&mut buf, ReduceOp::Sum.combiner())?;
                Ok::<_, SpanError>(buf)
            })
        })
        .collect();
    let threaded = join_all(handles)?;

    // Each element is (i % 10) * (1 + 2 + 3 + 4).
    println!("socket:   {:?}", &socket[0][..10]);
    println!("threaded: {:?}", &threaded[0][..10]);
    // Output: [0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0]
    assert_eq!(socket, threaded);

    Ok(())
}
