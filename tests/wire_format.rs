//! Stored objects must be readable by anything that speaks the same
//! envelope: hex RSA-OAEP(SHA-1) wrapped key, AES-128-CTR with the key as IV.

use lockbox_client::{
    Config, EncryptionConfig, KeyWrapper, MemoryTransport, RequestContext, StorageClient,
    ENCRYPTION_KEY_HEADER,
};
use lockbox_crypto::{decrypt_chunked, symmetric};
use rsa::RsaPrivateKey;
use std::sync::Arc;

#[test_log::test(tokio::test)]
async fn stored_object_decrypts_with_primitives() {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let keys = KeyWrapper::new(None, Some(private));

    let transport = MemoryTransport::new();
    let config = Config::new("http://localhost:9000", "vault")
        .with_encryption(EncryptionConfig::new(keys.clone()).with_chunk_size(8));
    let client = StorageClient::with_transport(config, Arc::new(transport.clone())).unwrap();

    let plaintext = b"twenty bytes of text".to_vec();
    client
        .put_object(&RequestContext::background(), "note", plaintext.clone())
        .await
        .unwrap();

    let metadata = transport.object_metadata("vault", "note").unwrap();
    let wrapped = metadata.get(ENCRYPTION_KEY_HEADER).unwrap();
    assert_eq!(wrapped.len(), 256);
    assert!(wrapped.chars().all(|c| c.is_ascii_hexdigit()));

    let psk = keys.unwrap(wrapped).unwrap();
    let ciphertext = transport.object("vault", "note").unwrap();
    assert_eq!(ciphertext.len(), plaintext.len());
    assert_eq!(decrypt_chunked(&psk, &ciphertext, 8).unwrap(), plaintext);

    // The first block is the keystream from the start
    let head = symmetric::decrypt(&psk, &ciphertext[..8]).unwrap();
    assert_eq!(head, &plaintext[..8]);
}
