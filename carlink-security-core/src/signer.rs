//! Challenge signing.

use std::borrow::Cow;
use std::sync::Arc;

use crate::certificate::{Certificate, CertificateKind};
use crate::error::{ModuleError, ModuleResult};
use crate::primitive::{KeyMaterial, SigningPrimitive};

/// Primitive returned a signature of unexpected length.
pub const SIGNATURE_LENGTH_MISMATCH: i32 = 100;

/// `MD5(02 00 00 00)`, XOR-ed over challenges for `APP_AUTH` certificates.
const APP_AUTH_CHALLENGE_MASK: [u8; 16] = [
    0xf2, 0xdd, 0x0d, 0xed, 0xb2, 0xc2, 0x60, 0x41, 0x9e, 0xce, 0x4a, 0x9e, 0x03, 0xb2, 0xe8, 0x28,
];

/// Produces responses to car challenges.
pub struct Signer {
    primitive: Arc<dyn SigningPrimitive>,
}

impl Signer {
    pub(crate) const fn new(primitive: Arc<dyn SigningPrimitive>) -> Self {
        Self { primitive }
    }

    pub(crate) fn signature_len(&self) -> usize {
        self.primitive.signature_len()
    }

    /// Signs `challenge` with `key`, encoding it for the certificate kind.
    ///
    /// # Errors
    ///
    /// [`ModuleError::PrimitiveFailure`] if the primitive fails or returns a
    /// signature of the wrong length.
    pub(crate) fn sign(
        &self,
        certificate: &Certificate,
        key: &KeyMaterial,
        challenge: &[u8],
    ) -> ModuleResult<Vec<u8>> {
        let message = encode_challenge(certificate.kind(), challenge);
        let signature = self.primitive.sign(key, &message)?;

        let expected = self.primitive.signature_len();
        if signature.len() != expected {
            return Err(ModuleError::PrimitiveFailure {
                code: SIGNATURE_LENGTH_MISMATCH,
                message: format!(
                    "signature is {} bytes, expected {expected}",
                    signature.len()
                ),
            });
        }
        Ok(signature)
    }
}

fn encode_challenge(kind: CertificateKind, challenge: &[u8]) -> Cow<'_, [u8]> {
    match kind {
        CertificateKind::Legacy => Cow::Borrowed(challenge),
        CertificateKind::AppAuth => Cow::Owned(
            challenge
                .iter()
                .zip(APP_AUTH_CHALLENGE_MASK.iter().cycle())
                .map(|(byte, mask)| byte ^ mask)
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brand::Brand;
    use crate::context::ApplicationIdentity;
    use crate::error::PrimitiveError;
    use crate::primitive::Ed25519Primitive;

    struct ShortSignaturePrimitive;

    impl SigningPrimitive for ShortSignaturePrimitive {
        fn derive(
            &self,
            _brand: Brand,
            _identity: &ApplicationIdentity,
            _certificate: &[u8],
        ) -> Result<KeyMaterial, PrimitiveError> {
            Ok(KeyMaterial::from_bytes(vec![1; 32]))
        }

        fn sign(&self, _key: &KeyMaterial, _message: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
            Ok(vec![0; 10])
        }

        fn signature_len(&self) -> usize {
            64
        }
    }

    fn reference_key() -> KeyMaterial {
        Ed25519Primitive
            .derive(
                Brand::Test,
                &ApplicationIdentity::new("me.hufman", "test"),
                Certificate::bundled(Brand::Test).as_bytes(),
            )
            .expect("derive")
    }

    #[test]
    fn test_mask_is_md5_of_fixed_prefix() {
        assert_eq!(
            hex::encode(APP_AUTH_CHALLENGE_MASK),
            "f2dd0dedb2c260419ece4a9e03b2e828"
        );
    }

    #[test]
    fn test_legacy_challenge_is_signed_verbatim() {
        let encoded = encode_challenge(CertificateKind::Legacy, &[1, 2, 3]);
        assert!(matches!(encoded, Cow::Borrowed(_)));
        assert_eq!(&*encoded, &[1, 2, 3]);
    }

    #[test]
    fn test_app_auth_mask_repeats() {
        let challenge = [0u8; 20];
        let encoded = encode_challenge(CertificateKind::AppAuth, &challenge);
        assert_eq!(&encoded[..16], &APP_AUTH_CHALLENGE_MASK);
        assert_eq!(&encoded[16..], &APP_AUTH_CHALLENGE_MASK[..4]);
        assert!(encode_challenge(CertificateKind::AppAuth, &[]).is_empty());
    }

    #[test]
    fn test_app_auth_signature_equals_legacy_signature_of_masked_challenge() {
        let signer = Signer::new(Arc::new(Ed25519Primitive));
        let key = reference_key();
        let app_auth = Certificate::parse(vec![
            0x30, 0x0a, 0x0c, 0x08, b'A', b'P', b'P', b'_', b'A', b'U', b'T', b'H',
        ])
        .expect("parse");
        let legacy = Certificate::bundled(Brand::Test);

        let masked = signer.sign(&app_auth, &key, &[0u8; 16]).expect("sign");
        let manual = signer
            .sign(&legacy, &key, &APP_AUTH_CHALLENGE_MASK)
            .expect("sign");
        assert_eq!(masked, manual);
        assert_eq!(
            hex::encode_upper(&masked),
            "630C7159277FCA7380F16B85431D044FAA37F0B54C54493A5C0FDF0B96EB9D3B\
             2906CB7041F503DB5E552BBFC928AA0F86CEE1316849809EE6645ED158F32F0C"
        );
    }

    #[test]
    fn test_signing_does_not_mutate_key() {
        let signer = Signer::new(Arc::new(Ed25519Primitive));
        let key = reference_key();
        let before = key.expose().to_vec();
        signer
            .sign(&Certificate::bundled(Brand::Test), &key, &[0xff; 64])
            .expect("sign");
        assert_eq!(key.expose(), before.as_slice());
    }

    #[test]
    fn test_wrong_length_signature_is_rejected() {
        let signer = Signer::new(Arc::new(ShortSignaturePrimitive));
        match signer.sign(
            &Certificate::bundled(Brand::Bmw),
            &KeyMaterial::from_bytes(vec![1; 32]),
            b"challenge",
        ) {
            Err(ModuleError::PrimitiveFailure { code, .. }) => {
                assert_eq!(code, SIGNATURE_LENGTH_MISMATCH);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(signer.signature_len(), 64);
    }
}
