//! Object storage for over-threshold content (spec §4.F), grounded on the
//! teacher's `sync::cloud::CloudStorage` S3 client setup and its
//! AES-256-GCM envelope, generalized from "one fixed bucket/key pair" to
//! arbitrary per-memory object keys.

use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::error::{MemoryError, Result};

pub struct ObjectStore {
    client: S3Client,
    bucket: String,
    encryption_key: Option<Vec<u8>>,
}

impl ObjectStore {
    pub async fn from_env(bucket: impl Into<String>, encryption_key: Option<Vec<u8>>) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = S3Client::new(&config);
        Ok(Self { client, bucket: bucket.into(), encryption_key })
    }

    /// Builds from [`crate::config::EngineConfig`]'s `CLOUD_OBJECT_BUCKET`
    /// and `CLOUD_ENCRYPT_OBJECTS`, generating a fresh encryption key when
    /// encryption is requested. Callers that need a stable key across
    /// restarts should persist and pass one in via [`Self::from_env`] instead.
    pub async fn from_config(config: &crate::config::EngineConfig) -> Result<Self> {
        let key = config.cloud_encrypt_objects.then(generate_encryption_key);
        Self::from_env(config.cloud_object_bucket.clone(), key).await
    }

    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let body = match &self.encryption_key {
            Some(k) => ByteStream::from(encrypt(k, data)?),
            None => ByteStream::from(data.to_vec()),
        };
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| MemoryError::CloudStorage(e.to_string()))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| MemoryError::CloudStorage(e.to_string()))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| MemoryError::CloudStorage(e.to_string()))?
            .into_bytes();

        match &self.encryption_key {
            Some(k) => decrypt(k, &data),
            None => Ok(data.to_vec()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| MemoryError::CloudStorage(e.to_string()))?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(MemoryError::CloudStorage(service_error.to_string()))
                }
            }
        }
    }
}

/// Prefix stored in `memories.content` in place of the literal text, once
/// content is offloaded to the object store.
pub const OBJECT_KEY_PREFIX: &str = "cloud-object:";

pub fn object_key_for(content_hash: &str) -> String {
    format!("content/{content_hash}")
}

fn encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::{
        aead::{Aead, KeyInit},
        Aes256Gcm, Nonce,
    };
    use rand::RngCore;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| MemoryError::Encryption(e.to_string()))?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, data).map_err(|e| MemoryError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::{
        aead::{Aead, KeyInit},
        Aes256Gcm, Nonce,
    };

    if data.len() < 12 {
        return Err(MemoryError::Encryption("ciphertext too short".to_string()));
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| MemoryError::Encryption(e.to_string()))?;
    let nonce = Nonce::from_slice(&data[..12]);
    cipher.decrypt(nonce, &data[12..]).map_err(|e| MemoryError::Encryption(e.to_string()))
}

/// Generate a random 256-bit object-store encryption key.
pub fn generate_encryption_key() -> Vec<u8> {
    use rand::RngCore;
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = generate_encryption_key();
        let plaintext = b"over-threshold memory content".to_vec();
        let ciphertext = encrypt(&key, &plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let decrypted = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_fails_with_wrong_key() {
        let key_a = generate_encryption_key();
        let key_b = generate_encryption_key();
        let ciphertext = encrypt(&key_a, b"secret").unwrap();
        assert!(decrypt(&key_b, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_rejects_truncated_ciphertext() {
        let key = generate_encryption_key();
        assert!(decrypt(&key, &[1, 2, 3]).is_err());
    }

    #[test]
    fn generated_keys_are_32_bytes_and_not_all_equal() {
        let key_a = generate_encryption_key();
        let key_b = generate_encryption_key();
        assert_eq!(key_a.len(), 32);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn object_key_for_is_namespaced_under_content() {
        assert_eq!(object_key_for("abc123"), "content/abc123");
    }
}
