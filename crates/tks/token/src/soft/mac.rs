//! MAC operations backing the software token

use aes::{Aes128, Aes192, Aes256};
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::{KeyAlgorithm, Result, TokenError};

/// HMAC-SHA-256 of `data` under `key`
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| {
        TokenError::InvalidKeyLength {
            algorithm: KeyAlgorithm::GenericSecret(key.len()),
            actual: key.len(),
        }
    })?;
    Ok(finish(mac, data))
}

/// AES-CMAC of `data` under `key`
pub(crate) fn cmac_aes(
    algorithm: KeyAlgorithm,
    key: &[u8],
    data: &[u8],
) -> Result<Zeroizing<[u8; 16]>> {
    let invalid = |_| TokenError::InvalidKeyLength {
        algorithm,
        actual: key.len(),
    };

    match algorithm {
        KeyAlgorithm::Aes128 => Ok(finish(
            <Cmac<Aes128> as Mac>::new_from_slice(key).map_err(invalid)?,
            data,
        )),
        KeyAlgorithm::Aes192 => Ok(finish(
            <Cmac<Aes192> as Mac>::new_from_slice(key).map_err(invalid)?,
            data,
        )),
        KeyAlgorithm::Aes256 => Ok(finish(
            <Cmac<Aes256> as Mac>::new_from_slice(key).map_err(invalid)?,
            data,
        )),
        other => Err(TokenError::IncompatibleKey {
            operation: "AES-CMAC",
            actual: other,
        }),
    }
}

fn finish<M: Mac, const N: usize>(mut mac: M, data: &[u8]) -> Zeroizing<[u8; N]> {
    mac.update(data);
    let mut tag = mac.finalize().into_bytes();
    let mut result = Zeroizing::new([0u8; N]);
    result.copy_from_slice(&tag);
    tag.as_mut_slice().zeroize();
    result
}
