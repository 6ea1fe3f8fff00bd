//! Caller-supplied PSK example
//!
//! With `user_defined_psk` the application owns every object key. Nothing is
//! generated, wrapped or stored next to the object.
//!
//! Run with: cargo run --example user_psk

use lockbox_client::{
    ClientError, Config, EncryptionConfig, MemoryTransport, RequestContext, StorageClient,
    UploadPartRequest, PSK_SIZE,
};
use rand::RngCore;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let transport = MemoryTransport::new();
    let config = Config::new("memory://", "vault").with_encryption(EncryptionConfig::user_defined_psk());
    let client = StorageClient::with_transport(config, Arc::new(transport.clone()))?;
    let ctx = RequestContext::background();

    let mut psk = [0u8; PSK_SIZE];
    rand::thread_rng().fill_bytes(&mut psk);

    // Single-shot object
    client
        .put_object_with_psk(&ctx, "notes.txt", b"meet at noon".to_vec(), &psk)
        .await?;
    let stored = transport.object("vault", "notes.txt").unwrap_or_default();
    println!("stored ciphertext: {}", hex_preview(&stored));

    let mut object = client.get_object_with_psk(&ctx, "notes.txt", &psk).await?;
    let mut plaintext = String::new();
    object.body.read_to_string(&mut plaintext).await?;
    println!("decrypted: {}", plaintext);

    // Without the PSK the client refuses before touching storage
    match client.get_object(&ctx, "notes.txt").await {
        Err(ClientError::MissingPsk) => println!("get without PSK: refused (MissingPsk)"),
        Err(e) => println!("get without PSK: {}", e),
        Ok(_) => println!("get without PSK: unexpectedly succeeded"),
    }

    // Single-part multipart upload
    let request = UploadPartRequest::new("report.pdf", 1, 1).with_content_type("application/pdf");
    let outcome = client
        .upload_part_with_psk(&ctx, &request, b"%PDF-1.7 ...".to_vec(), &psk)
        .await?;
    println!("report.pdf complete={}", outcome.all_parts_uploaded);

    Ok(())
}

fn hex_preview(data: &[u8]) -> String {
    data.iter().take(12).map(|b| format!("{:02x}", b)).collect()
}
