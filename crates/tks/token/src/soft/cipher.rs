//! Block cipher operations backing the software token

use aes::{Aes128, Aes192, Aes256};
use cipher::{
    BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, BlockSizeUser,
    KeyInit, KeyIvInit, generic_array::GenericArray,
};
use des::TdesEde3;
use zeroize::Zeroizing;

use crate::{CipherMode, KeyAlgorithm, Result, TokenError};

/// Encrypt `data` in place
pub(crate) fn encrypt(
    mode: CipherMode,
    algorithm: KeyAlgorithm,
    key: &[u8],
    data: &mut [u8],
) -> Result<()> {
    check_block_multiple(mode, data.len())?;

    let result = match mode {
        CipherMode::Des3Ecb => ecb_encrypt::<TdesEde3>(&des3_key(algorithm, key)?[..], data),
        CipherMode::Des3Cbc { iv } => cbc_encrypt::<TdesEde3>(&des3_key(algorithm, key)?[..], &iv, data),
        CipherMode::AesEcb => match algorithm {
            KeyAlgorithm::Aes128 => ecb_encrypt::<Aes128>(key, data),
            KeyAlgorithm::Aes192 => ecb_encrypt::<Aes192>(key, data),
            KeyAlgorithm::Aes256 => ecb_encrypt::<Aes256>(key, data),
            other => Err(incompatible(other)),
        },
        CipherMode::AesCbc { iv } => match algorithm {
            KeyAlgorithm::Aes128 => cbc_encrypt::<Aes128>(key, &iv, data),
            KeyAlgorithm::Aes192 => cbc_encrypt::<Aes192>(key, &iv, data),
            KeyAlgorithm::Aes256 => cbc_encrypt::<Aes256>(key, &iv, data),
            other => Err(incompatible(other)),
        },
    };
    result.map_err(|err| with_algorithm(err, algorithm, key.len()))
}

/// Decrypt `data` in place
pub(crate) fn decrypt(
    mode: CipherMode,
    algorithm: KeyAlgorithm,
    key: &[u8],
    data: &mut [u8],
) -> Result<()> {
    check_block_multiple(mode, data.len())?;

    let result = match mode {
        CipherMode::Des3Ecb => ecb_decrypt::<TdesEde3>(&des3_key(algorithm, key)?[..], data),
        CipherMode::Des3Cbc { iv } => cbc_decrypt::<TdesEde3>(&des3_key(algorithm, key)?[..], &iv, data),
        CipherMode::AesEcb => match algorithm {
            KeyAlgorithm::Aes128 => ecb_decrypt::<Aes128>(key, data),
            KeyAlgorithm::Aes192 => ecb_decrypt::<Aes192>(key, data),
            KeyAlgorithm::Aes256 => ecb_decrypt::<Aes256>(key, data),
            other => Err(incompatible(other)),
        },
        CipherMode::AesCbc { iv } => match algorithm {
            KeyAlgorithm::Aes128 => cbc_decrypt::<Aes128>(key, &iv, data),
            KeyAlgorithm::Aes192 => cbc_decrypt::<Aes192>(key, &iv, data),
            KeyAlgorithm::Aes256 => cbc_decrypt::<Aes256>(key, &iv, data),
            other => Err(incompatible(other)),
        },
    };
    result.map_err(|err| with_algorithm(err, algorithm, key.len()))
}

/// Expand a DES key to the 24 bytes expected by three-key triple DES
///
/// A two-key DES key K1||K2 becomes K1||K2||K1.
fn des3_key(algorithm: KeyAlgorithm, key: &[u8]) -> Result<Zeroizing<[u8; 24]>> {
    let mut result = Zeroizing::new([0u8; 24]);
    match (algorithm, key.len()) {
        (KeyAlgorithm::Des2, 16) => {
            result[..16].copy_from_slice(key);
            result[16..].copy_from_slice(&key[..8]);
        }
        (KeyAlgorithm::Des3, 24) => result.copy_from_slice(key),
        (KeyAlgorithm::Des2 | KeyAlgorithm::Des3, actual) => {
            return Err(TokenError::InvalidKeyLength { algorithm, actual });
        }
        (other, _) => return Err(incompatible(other)),
    }
    Ok(result)
}

const fn check_block_multiple(mode: CipherMode, len: usize) -> Result<()> {
    let block_size = mode.block_size();
    if len == 0 || len % block_size != 0 {
        return Err(TokenError::InvalidDataLength {
            block_size,
            actual: len,
        });
    }
    Ok(())
}

const fn incompatible(actual: KeyAlgorithm) -> TokenError {
    TokenError::IncompatibleKey {
        operation: "cipher",
        actual,
    }
}

// Key length errors raised by the generic helpers do not know the algorithm.
fn with_algorithm(err: TokenError, algorithm: KeyAlgorithm, actual: usize) -> TokenError {
    match err {
        TokenError::InvalidKeyLength { .. } => TokenError::InvalidKeyLength { algorithm, actual },
        other => other,
    }
}

const fn key_length_error(actual: usize) -> TokenError {
    TokenError::InvalidKeyLength {
        algorithm: KeyAlgorithm::GenericSecret(actual),
        actual,
    }
}

fn ecb_encrypt<C: BlockEncrypt + KeyInit>(key: &[u8], data: &mut [u8]) -> Result<()> {
    let cipher = C::new_from_slice(key).map_err(|_| key_length_error(key.len()))?;
    for block in data.chunks_exact_mut(C::block_size()) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn ecb_decrypt<C: BlockDecrypt + KeyInit>(key: &[u8], data: &mut [u8]) -> Result<()> {
    let cipher = C::new_from_slice(key).map_err(|_| key_length_error(key.len()))?;
    for block in data.chunks_exact_mut(C::block_size()) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn cbc_encrypt<C>(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<()>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let mut encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| key_length_error(key.len()))?;
    for block in data.chunks_exact_mut(<C as BlockSizeUser>::block_size()) {
        encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(())
}

fn cbc_decrypt<C>(key: &[u8], iv: &[u8], data: &mut [u8]) -> Result<()>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let mut decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| key_length_error(key.len()))?;
    for block in data.chunks_exact_mut(<C as BlockSizeUser>::block_size()) {
        decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
    Ok(())
}
