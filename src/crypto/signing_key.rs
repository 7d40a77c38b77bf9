use hmac::{Hmac, Mac};

use sha2::Sha256;

use secrecy::Secret;

#[derive(Clone)]
pub struct SigningKey(Hmac<Sha256>);

impl SigningKey {
    pub fn new(key: &Secret<String>) -> anyhow::Result<Self> {
        use secrecy::ExposeSecret;

        let hmac = Hmac::new_from_slice(key.expose_secret().as_bytes())?;

        Ok(Self(hmac))
    }

    /// HMAC-SHA256 of `msg`
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let key = self.0.clone();
        key.chain_update(msg).finalize().into_bytes().to_vec()
    }
}

impl AsRef<Hmac<Sha256>> for SigningKey {
    fn as_ref(&self) -> &Hmac<Sha256> {
        &self.0
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}
