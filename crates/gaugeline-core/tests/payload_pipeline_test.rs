// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use gaugeline_core::codec::{decode_json, encode_batch, gunzip, BatchBuffers};
use gaugeline_core::crypto::{Decryptor, Encryptor};
use gaugeline_core::metric::Metric;
use gaugeline_core::pool::Pool;
use gaugeline_core::signing::Signer;
use gaugeline_core::store::MetricStore;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;

/// Agent side: gzip, sign the compressed bytes, encrypt. Server side: decrypt,
/// verify over the decrypted-but-compressed bytes, gunzip, decode, apply.
#[test]
fn signed_encrypted_batch_reaches_the_store_intact() {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let encryptor =
        Encryptor::from_pem(&private.to_public_key().to_public_key_pem(LineEnding::LF).unwrap())
            .unwrap();
    let decryptor = Decryptor::from_pem(&private.to_pkcs1_pem(LineEnding::LF).unwrap()).unwrap();
    let signer = Signer::new("shared-key").unwrap();

    let agent_store = MetricStore::new();
    for i in 0..40 {
        agent_store.set_gauge(&format!("CPUutilization{i}"), f64::from(i) * 1.25);
    }
    agent_store.add_counter("PollCount", 5);
    let batch = agent_store.get_all();

    let pool = Pool::new(1, BatchBuffers::default);
    let mut buffers = pool.get();
    let compressed = encode_batch(&batch, &mut buffers).unwrap().to_vec();
    drop(buffers);
    let signature = signer.sign(&compressed);
    let wire = encryptor.encrypt(&compressed).unwrap();
    assert_ne!(wire, compressed);

    let decrypted = decryptor.decrypt(&wire).unwrap();
    assert!(signer.verify(&decrypted, &signature));
    let received: Vec<Metric> = decode_json(&gunzip(&decrypted).unwrap()).unwrap();

    let server_store = MetricStore::new();
    for metric in &received {
        server_store.apply(&metric.to_update().unwrap());
    }
    assert_eq!(server_store.len(), 41);
    assert_eq!(server_store.get_gauge("CPUutilization8"), Some(10.0));
    assert_eq!(server_store.get_counter("PollCount"), Some(5));
}

#[test]
fn tampered_payload_fails_verification() {
    let signer = Signer::new("shared-key").unwrap();
    let pool = Pool::new(1, BatchBuffers::default);
    let mut buffers = pool.get();
    let compressed = encode_batch(&[Metric::gauge("Alloc", 1.0)], &mut buffers)
        .unwrap()
        .to_vec();
    let signature = signer.sign(&compressed);

    let mut tampered = compressed.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;
    assert!(!signer.verify(&tampered, &signature));
}
