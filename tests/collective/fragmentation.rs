use super::helpers::{
    duplex_all_reduce, elementwise_sum, loopback_config, ramp_inputs, run_socket_cluster,
};
use spanreduce::{ReduceOp, SpanConfig};

#[tokio::test]
async fn test_chunk_sizes_agree_over_pipes() {
    let total = 6;
    let inputs = ramp_inputs(total, 4099);
    let expected = elementwise_sum(&inputs);

    for chunk in [1usize, 7, 65536] {
        let outputs =
            duplex_all_reduce(inputs.clone(), ReduceOp::Sum.combiner(), chunk, 4096).await;
        for (node, out) in outputs.iter().enumerate() {
            assert_eq!(out, &expected, "chunk={chunk} node={node}");
        }
    }
}

#[tokio::test]
async fn test_tiny_pipes_split_elements() {
    // A 3-byte pipe never holds a whole f64, so every element arrives in
    // pieces.
    let inputs: Vec<Vec<f64>> = (0..5)
        .map(|node| (0..257).map(|i| (i * (node + 1)) as f64).collect())
        .collect();
    let expected: Vec<f64> = (0..257).map(|i| (i * 15) as f64).collect();

    for chunk in [1usize, 7, 65536] {
        let outputs =
            duplex_all_reduce(inputs.clone(), ReduceOp::Sum.combiner(), chunk, 3).await;
        for out in outputs {
            assert_eq!(out, expected, "chunk={chunk}");
        }
    }
}

#[tokio::test]
async fn test_chunk_sizes_agree_over_tcp() {
    let inputs: Vec<Vec<u16>> = (0..4)
        .map(|node| (0..999u16).map(|i| i.wrapping_mul(node + 3)).collect())
        .collect();
    let expected: Vec<u16> = (0..999)
        .map(|i| inputs.iter().fold(0u16, |acc, v| acc.wrapping_add(v[i])))
        .collect();

    for chunk_size in [1usize, 7, 65536] {
        let config = SpanConfig {
            chunk_size,
            ..loopback_config()
        };
        let results = run_socket_cluster(inputs.clone(), ReduceOp::Sum.combiner(), config).await;
        for (_, out) in results {
            assert_eq!(out, expected, "chunk={chunk_size}");
        }
    }
}
