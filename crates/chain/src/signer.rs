//! Transaction signing with a locally held key.
//!
//! Nonces are tracked locally with an atomic counter so signing never needs a
//! round-trip to the ledger.

use alloy::primitives::{Address, Bytes, PrimitiveSignature};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::types::{SignedTransaction, UnsignedTransaction};

/// Signs liquidation transactions on behalf of the liquidator authority.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Authority (fee payer) address.
    fn authority(&self) -> Address;

    /// Reserve the next transaction nonce.
    fn next_nonce(&self) -> u64;

    async fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, GatewayError>;
}

/// Local nonce counter.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Move forward to a ledger-observed nonce. Never moves backwards.
    pub fn sync(&self, observed: u64) {
        self.current.fetch_max(observed, Ordering::SeqCst);
    }
}

/// Signer backed by an in-process secp256k1 key.
pub struct LocalSigner {
    key: PrivateKeySigner,
    nonces: NonceManager,
}

impl LocalSigner {
    /// Parse a hex private key, with or without `0x` prefix.
    pub fn from_private_key(private_key: &str) -> Result<Self, GatewayError> {
        let key_str = private_key.trim().trim_start_matches("0x");
        let key: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| GatewayError::Signing(format!("invalid private key: {}", e)))?;

        info!(authority = %key.address(), "Local signer initialized");
        Ok(Self::with_key(key))
    }

    /// Throwaway key, for paper trading and tests.
    pub fn random() -> Self {
        Self::with_key(PrivateKeySigner::random())
    }

    fn with_key(key: PrivateKeySigner) -> Self {
        Self {
            key,
            nonces: NonceManager::new(0),
        }
    }

    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("authority", &self.key.address())
            .field("nonce", &self.nonces.current())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn authority(&self) -> Address {
        self.key.address()
    }

    fn next_nonce(&self) -> u64 {
        self.nonces.next()
    }

    async fn sign(&self, tx: UnsignedTransaction) -> Result<SignedTransaction, GatewayError> {
        if tx.authority != self.key.address() {
            return Err(GatewayError::Signing(format!(
                "transaction authority {} is not the signer {}",
                tx.authority,
                self.key.address()
            )));
        }

        let digest = tx.digest()?;
        let signature = self
            .key
            .sign_hash_sync(&digest)
            .map_err(|e| GatewayError::Signing(e.to_string()))?;

        debug!(nonce = tx.nonce, digest = %digest, "Transaction signed");

        Ok(SignedTransaction {
            tx,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
        })
    }
}

/// Recover the address that produced a transaction's signature.
pub fn recover_authority(tx: &SignedTransaction) -> Result<Address, GatewayError> {
    let signature = PrimitiveSignature::from_raw(&tx.signature)
        .map_err(|e| GatewayError::Rejected(format!("malformed signature: {}", e)))?;
    let digest = tx.tx.digest()?;
    signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| GatewayError::Rejected(format!("unrecoverable signature: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known development key (DO NOT USE IN PRODUCTION)
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_nonce_manager() {
        let manager = NonceManager::new(10);

        assert_eq!(manager.next(), 10);
        assert_eq!(manager.next(), 11);
        assert_eq!(manager.current(), 12);

        manager.sync(15);
        assert_eq!(manager.current(), 15);

        // Sync never goes backwards
        manager.sync(3);
        assert_eq!(manager.current(), 15);
    }

    #[test]
    fn test_parse_private_key() {
        let signer = LocalSigner::from_private_key(DEV_KEY).unwrap();
        assert_eq!(
            format!("{:?}", signer.authority()).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(LocalSigner::from_private_key("0xnothex").is_err());
    }

    #[tokio::test]
    async fn test_sign_and_recover() {
        let signer = LocalSigner::random();
        let tx = UnsignedTransaction {
            authority: signer.authority(),
            nonce: signer.next_nonce(),
            instructions: vec![],
        };

        let signed = signer.sign(tx).await.unwrap();
        assert_eq!(signed.signature.len(), 65);
        assert_eq!(recover_authority(&signed).unwrap(), signer.authority());

        // Tampering with the message changes the recovered address
        let mut tampered = signed.clone();
        tampered.tx.nonce += 1;
        assert_ne!(recover_authority(&tampered).ok(), Some(signer.authority()));
    }

    #[tokio::test]
    async fn test_refuses_foreign_authority() {
        let signer = LocalSigner::random();
        let tx = UnsignedTransaction {
            authority: Address::repeat_byte(0x42),
            nonce: 0,
            instructions: vec![],
        };
        assert!(matches!(
            signer.sign(tx).await,
            Err(GatewayError::Signing(_))
        ));
    }
}
