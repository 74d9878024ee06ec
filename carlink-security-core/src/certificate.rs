//! Structural parsing of application certificates.
//!
//! Certificates arrive either as raw DER or PEM armoured (`CERTIFICATE` or
//! `PKCS7` blocks, as produced for p7b chains). Only the outer TLV framing is
//! checked; whether the car trusts the chain is not decided here.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use crate::brand::Brand;
use crate::error::{ModuleError, ModuleResult};

const TAG_SEQUENCE: u8 = 0x30;
const TAG_UTF8_STRING: u8 = 0x0c;
const MAX_LENGTH_OCTETS: usize = 4;

const PEM_BEGIN: &str = "-----BEGIN ";
const PEM_END: &str = "-----END ";
const PEM_DASHES: &str = "-----";
const PEM_LINE_WIDTH: usize = 64;

/// Marker carried by certificates whose challenges must be masked.
const APP_AUTH_MARKER: &[u8] = b"APP_AUTH";

/// How the certificate bytes were presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateEncoding {
    /// Binary DER, one or more concatenated `SEQUENCE`s.
    Der,
    /// PEM armour around base64 DER.
    Pem,
}

/// Certificate generation, which selects the challenge encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateKind {
    /// Challenges are signed verbatim.
    Legacy,
    /// `SAS.CertificateType=APP_AUTH`; challenges are masked before signing.
    AppAuth,
}

/// Armour label of a PEM block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PemLabel {
    Certificate,
    Pkcs7,
}

impl PemLabel {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "CERTIFICATE" => Some(Self::Certificate),
            "PKCS7" => Some(Self::Pkcs7),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Certificate => "CERTIFICATE",
            Self::Pkcs7 => "PKCS7",
        }
    }
}

/// One armoured unit of the DER content: `len` bytes under `label`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    label: PemLabel,
    len: usize,
}

/// A structurally valid certificate blob.
///
/// The supplied bytes are kept verbatim so retrieval returns exactly what was
/// loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    raw: Vec<u8>,
    der: Vec<u8>,
    encoding: CertificateEncoding,
    kind: CertificateKind,
    blocks: Vec<Block>,
}

impl Certificate {
    /// Validates and wraps certificate bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidCertificate`] when the input is empty,
    /// is not complete DER, or is PEM with unsupported labels or bad base64.
    pub fn parse(raw: Vec<u8>) -> ModuleResult<Self> {
        if raw.is_empty() {
            return Err(ModuleError::invalid_certificate("certificate is empty"));
        }

        let (der, encoding, blocks) = if looks_like_pem(&raw) {
            let text = std::str::from_utf8(&raw)
                .map_err(|_| ModuleError::invalid_certificate("PEM is not valid UTF-8"))?;
            let (der, blocks) = parse_pem(text)?;
            (der, CertificateEncoding::Pem, blocks)
        } else {
            let blocks = der_elements(&raw)?
                .into_iter()
                .map(|len| Block {
                    label: PemLabel::Certificate,
                    len,
                })
                .collect();
            (raw.clone(), CertificateEncoding::Der, blocks)
        };

        let kind = if der
            .windows(APP_AUTH_MARKER.len())
            .any(|window| window == APP_AUTH_MARKER)
        {
            CertificateKind::AppAuth
        } else {
            CertificateKind::Legacy
        };

        Ok(Self {
            raw,
            der,
            encoding,
            kind,
            blocks,
        })
    }

    /// The brand's built-in connection certificate.
    #[must_use]
    pub fn bundled(brand: Brand) -> Self {
        let common_name = der_tlv(TAG_UTF8_STRING, brand.connection_common_name().as_bytes());
        let der = der_tlv(TAG_SEQUENCE, &common_name);
        Self {
            raw: der.clone(),
            blocks: vec![Block {
                label: PemLabel::Certificate,
                len: der.len(),
            }],
            der,
            encoding: CertificateEncoding::Der,
            kind: CertificateKind::Legacy,
        }
    }

    /// The certificate exactly as it was supplied.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the certificate, returning the supplied bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }

    /// DER content; for PEM input, all blocks decoded and concatenated.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// How the certificate was presented.
    #[must_use]
    pub const fn encoding(&self) -> CertificateEncoding {
        self.encoding
    }

    /// Certificate generation.
    #[must_use]
    pub const fn kind(&self) -> CertificateKind {
        self.kind
    }

    /// Hex SHA-256 of the supplied bytes, for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.raw))
    }

    /// PEM armour around the DER content.
    ///
    /// PEM input keeps its blocks and labels (`PKCS7` chains stay `PKCS7`);
    /// DER input gets one `CERTIFICATE` block per top-level element.
    #[must_use]
    pub fn to_pem(&self) -> String {
        let mut pem = String::new();
        let mut rest = self.der.as_slice();
        for block in &self.blocks {
            let Some((content, tail)) = rest.split_at_checked(block.len) else {
                break;
            };
            rest = tail;
            push_pem_block(&mut pem, block.label, content);
        }
        pem
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("encoding", &self.encoding)
            .field("kind", &self.kind)
            .field("len", &self.raw.len())
            .field("sha256", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

fn looks_like_pem(raw: &[u8]) -> bool {
    raw.trim_ascii_start().starts_with(PEM_BEGIN.as_bytes())
}

fn push_pem_block(pem: &mut String, label: PemLabel, der: &[u8]) {
    let body = STANDARD.encode(der);
    let label = label.as_str();
    pem.reserve(body.len() + body.len() / PEM_LINE_WIDTH + 2 * label.len() + 32);
    for part in [PEM_BEGIN, label, PEM_DASHES, "\n"] {
        pem.push_str(part);
    }
    for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    for part in [PEM_END, label, PEM_DASHES, "\n"] {
        pem.push_str(part);
    }
}

/// Decodes every block, returning the concatenated DER and the block layout.
fn parse_pem(text: &str) -> ModuleResult<(Vec<u8>, Vec<Block>)> {
    let mut der = Vec::new();
    let mut blocks = Vec::new();
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    while let Some(line) = lines.next() {
        let label = line
            .strip_prefix(PEM_BEGIN)
            .and_then(|rest| rest.strip_suffix(PEM_DASHES))
            .ok_or_else(|| ModuleError::invalid_certificate("expected PEM BEGIN line"))?;
        let pem_label = PemLabel::from_label(label).ok_or_else(|| {
            ModuleError::invalid_certificate(format!("unsupported PEM label {label:?}"))
        })?;

        let end = format!("{PEM_END}{label}{PEM_DASHES}");
        let mut body = String::new();
        loop {
            let line = lines.next().ok_or_else(|| {
                ModuleError::invalid_certificate(format!("missing END line for {label}"))
            })?;
            if line == end {
                break;
            }
            if line.starts_with(PEM_DASHES) {
                return Err(ModuleError::invalid_certificate(format!(
                    "unexpected boundary inside {label} block"
                )));
            }
            body.extend(line.chars().filter(|c| !c.is_ascii_whitespace()));
        }

        let decoded = STANDARD
            .decode(body.as_bytes())
            .map_err(|err| ModuleError::invalid_certificate(format!("PEM base64: {err}")))?;
        der_elements(&decoded)?;
        blocks.push(Block {
            label: pem_label,
            len: decoded.len(),
        });
        der.extend_from_slice(&decoded);
    }

    if der.is_empty() {
        return Err(ModuleError::invalid_certificate("PEM contains no blocks"));
    }
    Ok((der, blocks))
}

/// Checks that `bytes` is a run of complete top-level `SEQUENCE` TLVs and
/// returns the encoded size of each.
fn der_elements(bytes: &[u8]) -> ModuleResult<Vec<usize>> {
    if bytes.is_empty() {
        return Err(ModuleError::invalid_certificate("DER content is empty"));
    }
    let mut elements = Vec::new();
    let mut rest = bytes;
    while let Some(&tag) = rest.first() {
        if tag != TAG_SEQUENCE {
            return Err(ModuleError::invalid_certificate(format!(
                "expected SEQUENCE at offset {}, found tag 0x{tag:02x}",
                bytes.len() - rest.len()
            )));
        }
        let total = tlv_len(rest)?;
        elements.push(total);
        rest = &rest[total..];
    }
    Ok(elements)
}

/// Total encoded size (header and content) of the TLV at the start of `input`.
fn tlv_len(input: &[u8]) -> ModuleResult<usize> {
    let (&first_len, after_len) = input
        .get(1..)
        .and_then(<[u8]>::split_first)
        .ok_or_else(|| ModuleError::invalid_certificate("truncated DER length"))?;

    let (content_len, header_len) = if first_len & 0x80 == 0 {
        (usize::from(first_len), 2)
    } else {
        let count = usize::from(first_len & 0x7f);
        if count == 0 {
            return Err(ModuleError::invalid_certificate(
                "indefinite DER length is not allowed",
            ));
        }
        if count > MAX_LENGTH_OCTETS {
            return Err(ModuleError::invalid_certificate(format!(
                "DER length uses {count} octets"
            )));
        }
        let octets = after_len
            .get(..count)
            .ok_or_else(|| ModuleError::invalid_certificate("truncated DER length"))?;
        let len = octets
            .iter()
            .fold(0usize, |acc, octet| (acc << 8) | usize::from(*octet));
        (len, 2 + count)
    };

    let total = header_len
        .checked_add(content_len)
        .filter(|total| *total <= input.len())
        .ok_or_else(|| {
            ModuleError::invalid_certificate(format!(
                "truncated DER: element needs {content_len} content bytes, {} available",
                input.len().saturating_sub(header_len)
            ))
        })?;
    Ok(total)
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(u8::try_from(len).unwrap_or_default());
    } else {
        let octets = len.to_be_bytes();
        let skip = octets.iter().take_while(|octet| **octet == 0).count();
        let significant = &octets[skip..];
        out.push(0x80 | u8::try_from(significant.len()).unwrap_or_default());
        out.extend_from_slice(significant);
    }
    out.extend_from_slice(content);
    out
}
