use std::collections::HashMap;

use aws_sdk_kms::{primitives::Blob, Client as KmsClient};
use base64::{prelude::BASE64_STANDARD, Engine};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("KMS encrypt with key {key_id} failed: {source}")]
    Encrypt {
        key_id: String,
        #[source]
        source: aws_sdk_kms::Error,
    },
    #[error("KMS decrypt failed: {0}")]
    Decrypt(#[source] aws_sdk_kms::Error),
    #[error("Ciphertext is not valid base64: {0}")]
    InvalidCiphertext(#[from] base64::DecodeError),
    #[error("Decrypted plaintext is not valid UTF-8: {0}")]
    InvalidPlaintext(#[from] std::string::FromUtf8Error),
    #[error("KMS returned no {0}")]
    EmptyResponse(&'static str),
}

/// Encrypt `plaintext` and return the ciphertext blob as base64.
pub async fn encrypt(
    client: &KmsClient,
    key_id: &str,
    plaintext: &str,
    encryption_context: Option<&HashMap<String, String>>,
) -> Result<String, KmsError> {
    tracing::debug!("Encrypting {} byte(s) with KMS key {}", plaintext.len(), key_id);

    let output = client
        .encrypt()
        .key_id(key_id)
        .plaintext(Blob::new(plaintext.as_bytes()))
        .set_encryption_context(encryption_context.cloned())
        .send()
        .await
        .map_err(|e| KmsError::Encrypt {
            key_id: key_id.to_string(),
            source: e.into(),
        })?;

    let ciphertext = output
        .ciphertext_blob()
        .ok_or(KmsError::EmptyResponse("ciphertext"))?;
    Ok(BASE64_STANDARD.encode(ciphertext.as_ref()))
}

/// Decrypt a base64 ciphertext produced by [`encrypt`].
pub async fn decrypt(
    client: &KmsClient,
    ciphertext_base64: &str,
    encryption_context: Option<&HashMap<String, String>>,
) -> Result<String, KmsError> {
    let ciphertext = BASE64_STANDARD.decode(ciphertext_base64.trim())?;

    let output = client
        .decrypt()
        .ciphertext_blob(Blob::new(ciphertext))
        .set_encryption_context(encryption_context.cloned())
        .send()
        .await
        .map_err(|e| KmsError::Decrypt(e.into()))?;

    let plaintext = output
        .plaintext()
        .ok_or(KmsError::EmptyResponse("plaintext"))?;
    Ok(String::from_utf8(plaintext.as_ref().to_vec())?)
}
