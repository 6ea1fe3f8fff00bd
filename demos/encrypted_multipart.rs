//! Encrypted multipart upload example
//!
//! This example demonstrates:
//! - Configuring envelope encryption with an RSA key pair
//! - Uploading an object one part at a time
//! - Polling for a part with `check_part_uploaded`
//! - Reading the finished object back, decrypted as it streams
//!
//! Runs against an in-memory store. Set `LOCKBOX__ENDPOINT` and
//! `LOCKBOX__BUCKET` to use a real S3-compatible service instead.
//!
//! Run with: cargo run --example encrypted_multipart

use bytes::Bytes;
use lockbox_client::{
    Config, EncryptionConfig, KeyWrapper, MemoryTransport, RequestContext, Settings,
    StorageClient, UploadPartRequest, DEFAULT_PART_SIZE,
};
use lockbox_crypto::RsaPrivateKey;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    println!("Lockbox - Encrypted Multipart Upload Example\n");

    // ==================== Key Generation ====================

    println!("Generating a 2048-bit RSA key pair...");
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)?;
    let encryption = EncryptionConfig::new(KeyWrapper::new(None, Some(private_key)));

    // ==================== Client ====================

    let client = match std::env::var("LOCKBOX__BUCKET") {
        Ok(_) => {
            let config = Settings::load(None)?.into_config()?.with_encryption(encryption);
            println!("Using {} bucket {}", config.endpoint, config.bucket);
            StorageClient::new(config)?
        }
        Err(_) => {
            println!("Using in-memory storage");
            let config = Config::new("memory://", "demo").with_encryption(encryption);
            StorageClient::with_transport(config, Arc::new(MemoryTransport::new()))?
        }
    };

    // ==================== Upload Parts ====================

    let mut data = vec![0u8; 2 * DEFAULT_PART_SIZE + 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut data);
    let parts: Vec<Bytes> = Bytes::from(data.clone())
        .chunks(DEFAULT_PART_SIZE)
        .map(Bytes::copy_from_slice)
        .collect();
    let total = parts.len() as u32;

    let ctx = RequestContext::with_timeout(Duration::from_secs(60));
    let key = "videos/holiday.mp4";

    for (i, part) in parts.into_iter().enumerate() {
        let request = UploadPartRequest::new(key, i as u32 + 1, total)
            .with_content_type("video/mp4")
            .with_file_name("holiday.mp4");
        let outcome = client.upload_part(&ctx, &request, part).await?;
        println!(
            "  part {}/{} etag={} complete={}",
            request.chunk_number, total, outcome.etag, outcome.all_parts_uploaded
        );

        if !outcome.all_parts_uploaded {
            let uploaded = client.check_part_uploaded(&ctx, &request).await?;
            println!("  check part {}: uploaded={}", request.chunk_number, uploaded);
        }
    }

    // ==================== Download ====================

    println!("\nDownloading...");
    let mut object = client.get_object(&ctx, key).await?;
    let mut plaintext = Vec::with_capacity(object.content_length as usize);
    object.body.read_to_end(&mut plaintext).await?;

    println!("  {} bytes, content type {:?}", plaintext.len(), object.content_type);
    anyhow::ensure!(plaintext == data, "downloaded content does not match");
    println!("  content matches");

    Ok(())
}
