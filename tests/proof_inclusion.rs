use daisy_chain::dag::MemoryDagStore;
use daisy_chain::errors::ChainError;
use daisy_chain::prover;
use daisy_chain::storage::Storage;

#[tokio::test]
async fn proof_of_a_written_value_verifies() {
    let storage = Storage::new(MemoryDagStore::shared());
    let root = storage.new_root().await.unwrap();
    let root = storage
        .put(&root, "football/players/id42", b"name:johnny")
        .await
        .unwrap();
    let proof = storage.proof(&root, "football/players/id42").await.unwrap();
    prover::verify(&root, "football/players/id42", b"name:johnny", &proof).unwrap();
}

#[tokio::test]
async fn every_written_path_proves_against_its_root() {
    let storage = Storage::new(MemoryDagStore::shared());
    let mut root = storage.new_root().await.unwrap();
    let writes = [
        ("a", b"1".as_slice()),
        ("b/c", b"2".as_slice()),
        ("b/d/e", b"3".as_slice()),
        ("f/g/h/i", b"4".as_slice()),
    ];
    for (path, value) in writes {
        root = storage.put(&root, path, value).await.unwrap();
    }
    for (path, value) in writes {
        let proof = storage.proof(&root, path).await.unwrap();
        prover::verify(&root, path, value, &proof).unwrap();
    }
}

#[tokio::test]
async fn swapped_path_segment_names_the_offender() {
    let storage = Storage::new(MemoryDagStore::shared());
    let root = storage.new_root().await.unwrap();
    let root = storage
        .put(&root, "football/players/id42", b"name:johnny")
        .await
        .unwrap();
    let proof = storage.proof(&root, "football/players/id42").await.unwrap();

    let err = prover::verify(&root, "football/coaches/id42", b"name:johnny", &proof).unwrap_err();
    match err {
        ChainError::InvalidProof { segment } => assert_eq!(segment, "coaches"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn swapped_value_is_a_data_proof_failure() {
    let storage = Storage::new(MemoryDagStore::shared());
    let root = storage.new_root().await.unwrap();
    let root = storage
        .put(&root, "football/players/id42", b"name:johnny")
        .await
        .unwrap();
    let proof = storage.proof(&root, "football/players/id42").await.unwrap();

    let err = prover::verify(&root, "football/players/id42", b"name:jimmy", &proof).unwrap_err();
    assert!(matches!(err, ChainError::InvalidDataProof));
}

#[tokio::test]
async fn any_single_byte_mutation_falsifies_the_proof() {
    let storage = Storage::new(MemoryDagStore::shared());
    let root = storage.new_root().await.unwrap();
    let root = storage.put(&root, "a/b/c", b"value").await.unwrap();
    let proof = storage.proof(&root, "a/b/c").await.unwrap();

    for entry in 0..proof.len() {
        for offset in 0..proof[entry].len() {
            let mut tampered = proof.clone();
            tampered[entry][offset] ^= 0x01;
            assert!(
                prover::verify(&root, "a/b/c", b"value", &tampered).is_err(),
                "mutation at entry {entry} offset {offset} was accepted"
            );
        }
    }
}

#[tokio::test]
async fn proof_against_a_different_root_fails() {
    let storage = Storage::new(MemoryDagStore::shared());
    let root = storage.new_root().await.unwrap();
    let root = storage.put(&root, "a/b", b"value").await.unwrap();
    let other = storage.put(&root, "a/c", b"decoy").await.unwrap();
    let proof = storage.proof(&root, "a/b").await.unwrap();

    assert!(prover::verify(&other, "a/b", b"value", &proof).is_err());
}

#[tokio::test]
async fn proof_of_a_missing_path_is_not_found() {
    let storage = Storage::new(MemoryDagStore::shared());
    let root = storage.new_root().await.unwrap();
    let root = storage.put(&root, "a/b", b"value").await.unwrap();
    assert!(matches!(
        storage.proof(&root, "a/missing").await,
        Err(ChainError::NotFound)
    ));
}
