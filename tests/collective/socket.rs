use super::helpers::{
    client, elementwise_sum, loopback_config, ramp_inputs, run_socket_cluster,
    socket_all_reduce, start_coordinator, start_coordinator_thread,
};
use spanreduce::types::CoordinatorEndpoint;
use spanreduce::{AllReduce, NodeIdentity, ReduceOp, SocketAllReduce};

#[tokio::test]
async fn test_sum_across_cluster_sizes() {
    for total in [1usize, 2, 3, 4, 8] {
        for n in [0usize, 1, 3, 65537] {
            let inputs = ramp_inputs(total, n);
            let expected = elementwise_sum(&inputs);
            let outputs = socket_all_reduce(inputs, ReduceOp::Sum.combiner()).await;
            assert_eq!(outputs.len(), total);
            for (node, out) in outputs.iter().enumerate() {
                assert_eq!(out, &expected, "total={total} n={n} node={node}");
            }
        }
    }
}

#[tokio::test]
async fn test_max_of_integers() {
    let inputs: Vec<Vec<i32>> = (0..5)
        .map(|node| (0..100).map(|i| (i * 7 + node * 13) % 50 - 25).collect())
        .collect();
    let expected: Vec<i32> = (0..100)
        .map(|i| inputs.iter().map(|v| v[i]).max().unwrap())
        .collect();

    let outputs = socket_all_reduce(inputs, ReduceOp::Max.combiner()).await;
    for out in outputs {
        assert_eq!(out, expected);
    }
}

#[tokio::test]
async fn test_custom_operator() {
    let inputs: Vec<Vec<u64>> = (0..4).map(|node| vec![1 << node; 9]).collect();
    let outputs = socket_all_reduce(inputs, |a: u64, b: u64| a | b).await;
    for out in outputs {
        assert_eq!(out, vec![0b1111; 9]);
    }
}

#[tokio::test]
async fn test_single_node_is_lonely_root() {
    let mut results = run_socket_cluster(
        vec![vec![4.0f64, 5.0]],
        ReduceOp::Sum.combiner(),
        loopback_config(),
    )
    .await;
    let (client, buf) = results.pop().unwrap();
    assert_eq!(buf, vec![4.0, 5.0]);

    let set = client.connections().unwrap();
    assert!(set.is_root());
    assert_eq!(set.child_count(), 0);
}

#[tokio::test]
async fn test_two_nodes_form_root_and_leaf() {
    let results = run_socket_cluster(
        vec![vec![1i64, 2, 3], vec![10, 20, 30]],
        ReduceOp::Sum.combiner(),
        loopback_config(),
    )
    .await;

    let root = results[0].0.connections().unwrap();
    assert!(root.is_root());
    assert_eq!(root.child_count(), 1);
    assert!(root.children[0].is_some());
    assert!(root.children[1].is_none());

    let leaf = results[1].0.connections().unwrap();
    assert!(!leaf.is_root());
    assert_eq!(leaf.child_count(), 0);

    for (_, buf) in &results {
        assert_eq!(buf, &vec![11, 22, 33]);
    }
}

#[tokio::test]
async fn test_seven_nodes_fill_three_levels() {
    let results = run_socket_cluster(
        (0..7).map(|node| vec![node as u32; 4]).collect(),
        ReduceOp::Sum.combiner(),
        loopback_config(),
    )
    .await;

    let children: Vec<usize> = results
        .iter()
        .map(|(client, _)| client.connections().unwrap().child_count())
        .collect();
    assert_eq!(children, vec![2, 2, 2, 0, 0, 0, 0]);
    for (_, buf) in &results {
        assert_eq!(buf, &vec![21u32; 4]);
    }
}

#[tokio::test]
async fn test_connections_reused_across_calls() {
    let addr = start_coordinator().await;
    let handles: Vec<_> = (0..3)
        .map(|node| {
            let mut client = client(addr, 9, 3, node);
            tokio::spawn(async move {
                let mut sums = Vec::new();
                for round in 0..5i64 {
                    let mut buf = vec![round + node as i64; 16];
                    client
                        .all_reduce(&mut buf, ReduceOp::Sum.combiner())
                        .await
                        .unwrap();
                    sums.push(buf[15]);
                }
                sums
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.await.unwrap(), vec![3, 6, 9, 12, 15]);
    }
}

#[test]
fn test_blocking_nodes_on_threads() {
    let addr = start_coordinator_thread();
    let total = 4u64;

    let handles: Vec<_> = (0..total)
        .map(|node| {
            std::thread::spawn(move || {
                let identity = NodeIdentity::new(total, node, true).unwrap();
                let endpoint = CoordinatorEndpoint::new("127.0.0.1", addr.port(), 3);
                let mut sock =
                    SocketAllReduce::with_config(identity, endpoint, loopback_config()).unwrap();
                let mut buf = vec![node as f32 + 1.0; 1000];
                sock.all_reduce(&mut buf, ReduceOp::Sum.combiner()).unwrap();
                sock.all_reduce(&mut buf, ReduceOp::Max.combiner()).unwrap();
                buf
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), vec![10.0f32; 1000]);
    }
}
