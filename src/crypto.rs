use aead::generic_array::typenum::Unsigned;
use aead::AeadCore;
use chacha20poly1305::ChaCha20Poly1305;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::constants::{PACKET_ID_LONG_SIZE, PACKET_ID_SIZE};

const CHACHA20_TAG_SIZE: usize = <<ChaCha20Poly1305 as AeadCore>::TagSize as Unsigned>::USIZE;
const CHACHA20_NONCE_SIZE: usize = <<ChaCha20Poly1305 as AeadCore>::NonceSize as Unsigned>::USIZE;

const AES_BLOCK_SIZE: usize = 16;
const GCM_TAG_SIZE: usize = 16;
const GCM_IV_SIZE: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Cbc,
    Cfb,
    Ofb,
    Aead,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherKind {
    pub name: String,
    pub mode: CipherMode,
    /// 1 for the stream-like modes, like the crypto libraries report it.
    pub block_size: usize,
    pub iv_size: usize,
    /// AEAD only.
    pub tag_size: usize,
}

impl CipherKind {
    /// Look up a cipher by name. `None` for unknown names, including
    /// BF-CBC which the crypto backend does not provide.
    pub fn lookup(name: &str) -> Option<CipherKind> {
        let upper = name.to_ascii_uppercase();
        let (mode, block_size, iv_size, tag_size) = match upper.as_str() {
            "AES-128-CBC" | "AES-192-CBC" | "AES-256-CBC" => (CipherMode::Cbc, AES_BLOCK_SIZE, AES_BLOCK_SIZE, 0),
            "AES-128-CFB" | "AES-192-CFB" | "AES-256-CFB" => (CipherMode::Cfb, 1, AES_BLOCK_SIZE, 0),
            "AES-128-OFB" | "AES-192-OFB" | "AES-256-OFB" => (CipherMode::Ofb, 1, AES_BLOCK_SIZE, 0),
            "AES-128-GCM" | "AES-192-GCM" | "AES-256-GCM" => (CipherMode::Aead, 1, GCM_IV_SIZE, GCM_TAG_SIZE),
            "CHACHA20-POLY1305" => (CipherMode::Aead, 1, CHACHA20_NONCE_SIZE, CHACHA20_TAG_SIZE),
            _ => return None,
        };
        Some(CipherKind { name: upper, mode, block_size, iv_size, tag_size })
    }

    pub fn is_aead(&self) -> bool {
        self.mode == CipherMode::Aead
    }

    pub fn is_ofb_cfb(&self) -> bool {
        matches!(self.mode, CipherMode::Ofb | CipherMode::Cfb)
    }
}

/// HMAC output length for a digest name, `None` if unknown.
pub fn digest_size(name: &str) -> Option<usize> {
    let size = match name.to_ascii_uppercase().as_str() {
        "NONE" => 0,
        "MD5" => 16,
        "SHA1" => 20,
        "SHA224" => Sha224::output_size(),
        "SHA256" => Sha256::output_size(),
        "SHA384" => Sha384::output_size(),
        "SHA512" => Sha512::output_size(),
        _ => return None,
    };
    Some(size)
}

/// Resolved cipher + auth pair of a data channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyType {
    /// None for cipher "none".
    pub cipher: Option<CipherKind>,
    pub hmac_length: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyTypeError {
    #[error("Cipher algorithm '{0}' not found")]
    UnknownCipher(String),
    #[error("Message hash algorithm '{0}' not found")]
    UnknownDigest(String),
}

impl KeyType {
    pub fn new(ciphername: &str, authname: &str) -> Result<KeyType, KeyTypeError> {
        let cipher = if ciphername.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(CipherKind::lookup(ciphername)
                 .ok_or_else(|| KeyTypeError::UnknownCipher(ciphername.to_string()))?)
        };

        // AEAD ciphers authenticate themselves, --auth is ignored
        let hmac_length = match &cipher {
            Some(c) if c.is_aead() => 0,
            _ => digest_size(authname)
                .ok_or_else(|| KeyTypeError::UnknownDigest(authname.to_string()))?,
        };

        Ok(KeyType { cipher, hmac_length })
    }

    pub fn is_ofb_cfb(&self) -> bool {
        self.cipher.as_ref().map_or(false, CipherKind::is_ofb_cfb)
    }
}

pub fn packet_id_size(long_form: bool) -> usize {
    if long_form { PACKET_ID_LONG_SIZE } else { PACKET_ID_SIZE }
}

/// Bytes a data channel packet of `payload_size` plaintext bytes grows by.
///
/// With `occ` set the result is the size-independent worst case used for
/// option string advertisement, so CBC always gets a full padding block.
pub fn calculate_crypto_overhead(kt: &KeyType,
                                 packet_id: bool,
                                 packet_id_long_form: bool,
                                 payload_size: usize,
                                 occ: bool) -> usize {
    let pid_size = if packet_id { packet_id_size(packet_id_long_form) } else { 0 };
    let mut overhead = pid_size;

    match &kt.cipher {
        Some(cipher) if cipher.is_aead() => {
            overhead += cipher.tag_size;
        }
        Some(cipher) => {
            overhead += cipher.iv_size;
            if cipher.mode == CipherMode::Cbc && !occ {
                // PKCS#7 always pads, between 1 and block_size bytes. The
                // packet id is encrypted along with the payload.
                overhead += cipher.block_size - (payload_size + pid_size) % cipher.block_size;
            } else if occ {
                overhead += cipher.block_size;
            }
        }
        None => {}
    }

    overhead + kt.hmac_length
}

#[cfg(test)]
mod tests {
    use aead::{AeadInPlace, KeyInit};
    use anyhow::Result;
    use bytes::BytesMut;
    use hkdf::Hkdf;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::none_none("none", "none", 0)]
    #[case::none_sha1("none", "SHA1", 20)]
    #[case::cbc_sha256("AES-256-CBC", "SHA256", 32)]
    #[case::gcm_ignores_auth("AES-256-GCM", "SHA512", 0)]
    #[case::chacha("CHACHA20-POLY1305", "SHA1", 0)]
    #[case::lowercase("aes-128-cbc", "sha512", 64)]
    fn test_key_type(#[case] cipher: &str, #[case] auth: &str, #[case] hmac_length: usize) {
        let kt = KeyType::new(cipher, auth).unwrap();
        assert_eq!(kt.hmac_length, hmac_length);
        assert_eq!(kt.cipher.is_none(), cipher == "none");
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(KeyType::new("BF-CBC", "SHA1"), Err(KeyTypeError::UnknownCipher("BF-CBC".into())));
        assert_eq!(KeyType::new("AES-128-CBC", "WHIRLPOOL"), Err(KeyTypeError::UnknownDigest("WHIRLPOOL".into())));
    }

    #[rstest]
    // pid 8 + iv 16 + block 16 + hmac 20
    #[case::cbc_occ("AES-256-CBC", "SHA1", true, true, 0, true, 60)]
    // 4 + 1000 = 1004 -> padded to 1008, pad 4
    #[case::cbc_sized("AES-256-CBC", "SHA1", true, false, 1000, false, 4 + 16 + 4 + 20)]
    // exact multiple of the block still adds a full block
    #[case::cbc_full_pad("AES-128-CBC", "none", false, false, 32, false, 16 + 16)]
    #[case::gcm("AES-256-GCM", "SHA1", true, false, 1000, false, 4 + 16)]
    #[case::cfb_occ("AES-256-CFB", "SHA256", true, true, 0, true, 8 + 16 + 1 + 32)]
    #[case::ofb_sized("AES-256-OFB", "SHA256", true, true, 999, false, 8 + 16 + 32)]
    #[case::none("none", "SHA1", true, true, 1000, false, 8 + 20)]
    #[case::none_no_replay("none", "none", false, true, 1000, true, 0)]
    fn test_crypto_overhead(#[case] cipher: &str, #[case] auth: &str, #[case] packet_id: bool,
                            #[case] long_form: bool, #[case] payload: usize, #[case] occ: bool,
                            #[case] expected: usize) {
        let kt = KeyType::new(cipher, auth).unwrap();
        assert_eq!(calculate_crypto_overhead(&kt, packet_id, long_form, payload, occ), expected);
    }

    #[test]
    fn test_cbc_padding_bounded_by_occ() {
        let kt = KeyType::new("AES-256-CBC", "SHA256").unwrap();
        let worst = calculate_crypto_overhead(&kt, true, false, 0, true);
        for payload in 0..=1500 {
            assert!(calculate_crypto_overhead(&kt, true, false, payload, false) <= worst);
        }
    }

    fn chacha_from_passphrase(passphrase: &str) -> ChaCha20Poly1305 {
        let hkdf = Hkdf::<Sha256>::new(None, passphrase.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(&[], &mut key).unwrap();
        ChaCha20Poly1305::new_from_slice(&key).unwrap()
    }

    #[test]
    fn test_aead_overhead_matches_real_cipher() -> Result<()> {
        let cipher = chacha_from_passphrase("key0");
        let kt = KeyType::new("CHACHA20-POLY1305", "none")?;
        let mut rng = rand::thread_rng();

        for plaintext_len in (1..=1500).step_by(7) {
            let nonce = ChaCha20Poly1305::generate_nonce(&mut rng);
            let mut buf = BytesMut::zeroed(plaintext_len);
            cipher.encrypt_in_place(&nonce, &[], &mut buf)?;

            let expected = calculate_crypto_overhead(&kt, false, false, plaintext_len, false);
            assert_eq!(buf.len() - plaintext_len, expected);
        }
        Ok(())
    }
}
