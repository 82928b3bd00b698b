use ecb::cipher::{BlockEncryptMut, KeyInit};

use super::constants::AES_KEY;

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;

/// `AES_ECB_encrypt(c, fixed_key)`. The key is fixed and
/// embedded; this authenticates the host to the sensor, not the other way
/// around, and is faithful to the protocol rather than a security measure
///. A single 16-byte block, so ECB chaining never comes into
/// play, but the mode is named in the protocol and kept explicit here.
pub fn encrypt_challenge(challenge: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128EcbEnc::new_from_slice(&AES_KEY).expect("AES-128 key is always 16 bytes");
    let mut buf = *challenge;
    let out = cipher
        .encrypt_padded_mut::<ecb::cipher::block_padding::NoPadding>(&mut buf, 16)
        .expect("single full block never needs padding");
    let mut result = [0u8; 16];
    result.copy_from_slice(out);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypts_deterministically() {
        let challenge = [0u8; 16];
        let a = encrypt_challenge(&challenge);
        let b = encrypt_challenge(&challenge);
        assert_eq!(a, b);
        assert_ne!(a, challenge);
    }

    #[test]
    fn differing_challenges_differ() {
        let c1 = [0u8; 16];
        let mut c2 = [0u8; 16];
        c2[0] = 1;
        assert_ne!(encrypt_challenge(&c1), encrypt_challenge(&c2));
    }
}
