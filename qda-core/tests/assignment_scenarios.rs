use std::collections::{BTreeMap, BTreeSet};

use qda_core::{
    BlobVersionParameters, ChunkAssigner, EncodingParameterResolver, OperatorId, OperatorInfo,
    OperatorState,
};

fn operator(byte: u8) -> OperatorId {
    OperatorId([byte; 32])
}

fn three_operator_state() -> OperatorState {
    let operators = [(operator(1), 60u128), (operator(2), 30), (operator(3), 10)]
        .into_iter()
        .map(|(id, stake)| {
            (
                id,
                OperatorInfo {
                    stake,
                    socket: format!("{id}:32005"),
                },
            )
        })
        .collect();
    OperatorState {
        operators: BTreeMap::from([(0, operators)]),
        block_number: 100,
    }
}

#[test]
fn large_blob_with_three_operators() {
    let resolver = EncodingParameterResolver::new(
        BTreeMap::from([(
            0,
            BlobVersionParameters {
                coding_rate: 8,
                max_num_operators: 3537,
                num_chunks: 8192,
            },
        )]),
        512,
    );
    let params = resolver.resolve((1 << 16) * 32, 0).unwrap();
    assert_eq!(params.num_chunks, 8192);

    let state = three_operator_state();
    let assignments = ChunkAssigner::new(55)
        .assignments(&state, &params, 0)
        .unwrap();

    let largest = assignments[&operator(1)];
    assert!(largest.num_chunks >= 4916);

    let covered: BTreeSet<u32> = [operator(1), operator(2)]
        .iter()
        .flat_map(|id| assignments[id].indices(params.num_chunks))
        .collect();
    assert_eq!(covered.len(), 8192);

    // 60 + 10 is above the threshold as well
    let covered: BTreeSet<u32> = [operator(1), operator(3)]
        .iter()
        .flat_map(|id| assignments[id].indices(params.num_chunks))
        .collect();
    assert_eq!(covered.len(), 8192);

    for (id, stake) in [(operator(2), 30u32), (operator(3), 10)] {
        assert!(assignments[&id].num_chunks >= (8192 * stake).div_ceil(100));
    }
}

#[test]
fn independent_computations_agree() {
    let state = three_operator_state();
    let params = qda_core::EncodingParams {
        num_chunks: 8192,
        chunk_length: 64,
    };
    let first = ChunkAssigner::new(55).assignments(&state, &params, 0).unwrap();
    let second = ChunkAssigner::new(55)
        .assignments(&state.clone(), &params, 0)
        .unwrap();
    assert_eq!(first, second);
}
