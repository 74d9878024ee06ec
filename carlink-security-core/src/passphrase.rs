//! Decoding of the obfuscated token that unlocks an application key bundle.
//!
//! Certificate bundles ship with a base64 token instead of their passphrase.
//! The passphrase is recovered by walking the token in 4-byte groups, each
//! selecting a character of the bundle's package name as part of the key
//! stream.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use zeroize::Zeroizing;

const MIN_TOKEN_LEN: usize = 5;
const GROUP_LEN: usize = 4;
const KEY_STREAM_CONSTANT: u8 = 0x17;

/// Errors decoding a bundle token.
#[derive(Debug, Clone, PartialEq, Eq, Error, uniffi::Error)]
pub enum PassphraseError {
    /// The token is not base64.
    #[error("token is not valid base64: {reason}")]
    InvalidEncoding {
        /// Decoder message.
        reason: String,
    },
    /// The decoded token is shorter than its fixed header.
    #[error("token is too small ({len} bytes)")]
    TooShort {
        /// Decoded length.
        len: u64,
    },
    /// A byte that must be zero is set.
    #[error("high byte found at {offset}")]
    HighByte {
        /// Offset into the decoded token.
        offset: u64,
    },
    /// The token points outside the package name, usually because the wrong
    /// package name was supplied.
    #[error("out of bounds {index} when decoding token at {offset}")]
    IndexOutOfBounds {
        /// Signed index the token selected.
        index: i32,
        /// Offset of the 4-byte group into the decoded token.
        offset: u64,
    },
}

fn offset(position: usize) -> u64 {
    u64::try_from(position).unwrap_or(u64::MAX)
}

/// Bytes above 0x7f come out sign-extended, as the bundle tooling produced them.
fn widen(byte: u8) -> char {
    let code = if byte < 0x80 {
        u32::from(byte)
    } else {
        0xFF00 | u32::from(byte)
    };
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Recovers the bundle passphrase from `token` for `package_name`.
///
/// # Errors
///
/// Returns a [`PassphraseError`] if the token is not base64, is too short,
/// has a non-zero high byte, or does not belong to `package_name`.
pub fn decode_passphrase(token: &str, package_name: &str) -> Result<SecretString, PassphraseError> {
    let bytes = Zeroizing::new(STANDARD.decode(token.trim()).map_err(|err| {
        PassphraseError::InvalidEncoding {
            reason: err.to_string(),
        }
    })?);
    if bytes.len() < MIN_TOKEN_LEN {
        return Err(PassphraseError::TooShort {
            len: offset(bytes.len()),
        });
    }

    let package = package_name.as_bytes();
    let mut current = bytes[0];
    let mut decoded = String::with_capacity(bytes.len() / GROUP_LEN);
    for (position, group) in bytes.chunks_exact(GROUP_LEN).enumerate().skip(1) {
        let start = position * GROUP_LEN;
        let [selector, high_a, stream, high_b] = [group[0], group[1], group[2], group[3]];
        if high_a != 0 {
            return Err(PassphraseError::HighByte {
                offset: offset(start + 1),
            });
        }
        if high_b != 0 {
            return Err(PassphraseError::HighByte {
                offset: offset(start + 3),
            });
        }

        let index = current ^ bytes[2] ^ selector;
        let name_byte = if index < 0x80 {
            package.get(usize::from(index)).copied()
        } else {
            None
        }
        .ok_or_else(|| PassphraseError::IndexOutOfBounds {
            index: i32::from(i8::from_ne_bytes([index])),
            offset: offset(start),
        })?;

        current = current ^ stream ^ KEY_STREAM_CONSTANT ^ name_byte;
        decoded.push(widen(current));
    }

    Ok(SecretString::from(decoded))
}

/// Recovers the bundle passphrase from `token` for `package_name`.
///
/// # Errors
///
/// See [`decode_passphrase`].
#[uniffi::export]
#[allow(clippy::needless_pass_by_value)]
pub fn decode_bundle_passphrase(
    token: String,
    package_name: String,
) -> Result<String, PassphraseError> {
    decode_passphrase(&token, &package_name).map(|secret| secret.expose_secret().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = concat!(
        "AAABAAsASgB+AF4AeQAmADEAJAAgAGoAaQByAGwAJAArAAcAUQAkAEcAEAA3AG8A",
        "JwAFAFoAVgBpAGIAZgBhAGYAbQBlAHoALABNAEQAMAA/ACYAbgBGAFQASABfAEAA",
        "RgAKADAAdAApAHAAOgBWAF8AfwB5AGkAcAAEAFAAYwBaAGAARgBFAGMAbwArAE0A",
        "OgBeAEcAAgA0ACIAKwBeAEAAYgA="
    );

    #[test]
    fn test_decodes_reference_token() {
        let passphrase = decode_passphrase(TOKEN, "de.bmw.a4a.BMWAppKit").expect("decode");
        let passphrase = passphrase.expose_secret();
        assert_eq!(passphrase.chars().count(), 40);
        assert!(passphrase.starts_with("sw6+xm:ZG"));
        assert_eq!(passphrase, "sw6+xm:ZG%)Kzfuf%K-hXPF>-=Rwy^ZHj&1V3(O{");
    }

    #[test]
    fn test_wrong_package_name_is_out_of_bounds() {
        match decode_passphrase(TOKEN, "de.bmw.a4a") {
            Err(PassphraseError::IndexOutOfBounds { index, offset }) => {
                assert_eq!(index, 10);
                assert_eq!(offset, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_short_and_malformed_tokens() {
        assert_eq!(
            decode_passphrase("AAAA", "pkg").map(|_| ()),
            Err(PassphraseError::TooShort { len: 3 })
        );
        assert!(matches!(
            decode_passphrase("not base64!", "pkg"),
            Err(PassphraseError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_rejects_high_bytes() {
        let token = STANDARD.encode([0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(
            decode_passphrase(&token, "pkg").map(|_| ()),
            Err(PassphraseError::HighByte { offset: 5 })
        );
        let token = STANDARD.encode([0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(
            decode_passphrase(&token, "pkg").map(|_| ()),
            Err(PassphraseError::HighByte { offset: 7 })
        );
    }

    #[test]
    fn test_negative_index_is_out_of_bounds() {
        let token = STANDARD.encode([0x80, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            decode_passphrase(&token, "pkg").map(|_| ()),
            Err(PassphraseError::IndexOutOfBounds {
                index: -128,
                offset: 4
            })
        );
    }

    #[test]
    fn test_exported_wrapper_exposes_passphrase() {
        let passphrase =
            decode_bundle_passphrase(TOKEN.to_string(), "de.bmw.a4a.BMWAppKit".to_string())
                .expect("decode");
        assert_eq!(passphrase.len(), 40);
    }
}
