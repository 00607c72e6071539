use std::collections::BTreeMap;

use qda_core::{BlobVersionParameters, EncodingParameterResolver, Frame};
use qda_encoding::testutils::{random_blob, TEST_SRS};
use qda_encoding::{ErasureCoder, ProofBackendKind};
use qda_kzg::{verify_chunk_proof, ChunkDomain, ChunkOpening, Commitment};

fn verifies(commitment: &Commitment, index: usize, frame: &Frame, domain: &ChunkDomain) -> bool {
    let opening = ChunkOpening {
        index,
        evaluations: &frame.evaluations,
        proof: &frame.proof,
    };
    verify_chunk_proof(commitment, opening, domain, &TEST_SRS).unwrap_or(false)
}

#[test]
fn flipping_a_byte_only_breaks_that_chunk() {
    let resolver = EncodingParameterResolver::new(
        BTreeMap::from([(
            0,
            BlobVersionParameters {
                coding_rate: 8,
                max_num_operators: 16,
                num_chunks: 32,
            },
        )]),
        64,
    );
    for backend in [ProofBackendKind::Fk20, ProofBackendKind::Reference] {
        let coder = ErasureCoder::new(TEST_SRS.clone(), backend.build(TEST_SRS.clone()));
        let data = random_blob(13, 13);
        let params = resolver.resolve(data.len(), 0).unwrap();
        let commitment = coder.commit(&data).unwrap().commitment;
        let encoded = coder.encode(&data, params).unwrap();
        let domain =
            ChunkDomain::new(params.num_chunks as usize, params.chunk_length as usize).unwrap();

        for (index, frame) in encoded.frames.iter().enumerate() {
            assert!(verifies(&commitment, index, frame, &domain));
        }

        for target in 0..encoded.frames.len() {
            let mut bytes = encoded.frames[target].to_bytes();
            // last byte of the first symbol, the value stays canonical
            bytes[48 + 31] ^= 0x01;
            let tampered = Frame::from_bytes(&bytes).unwrap();
            assert_ne!(tampered, encoded.frames[target]);
            assert!(
                !verifies(&commitment, target, &tampered, &domain),
                "tampered chunk {target} verified"
            );

            for (index, frame) in encoded.frames.iter().enumerate() {
                assert!(verifies(&commitment, index, frame, &domain));
            }
        }

        // a chunk does not verify at another index
        assert!(!verifies(&commitment, 6, &encoded.frames[5], &domain));
    }
}
