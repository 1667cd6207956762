//! Embedded reference tokens (`nostr:note1...`, `nostr:npub1...`, ...) and
//! their NIP-19 decoding

use std::ops::Range;

use bech32::Hrp;
use serde::Serialize;
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};

use crate::{AuthorId, RecordId};

pub const URI_PREFIX: &str = "nostr:";

const HRP_NOTE: &str = "note";
const HRP_NEVENT: &str = "nevent";
const HRP_NPUB: &str = "npub";
const HRP_NPROFILE: &str = "nprofile";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;

/// What a token points at, judged by its prefix alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTarget {
    Record,
    Author,
}

/// A reference token found in record content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceToken<'s> {
    /// Full token text, including the `nostr:` prefix
    pub token: &'s str,
    /// Byte range of `token` in the scanned content
    pub span: Range<usize>,
    pub target: ReferenceTarget,
}

fn target_for_bech32(body: &str) -> Option<ReferenceTarget> {
    let (hrp, data) = body.split_once('1')?;
    if data.is_empty() {
        return None;
    }
    match hrp {
        HRP_NOTE | HRP_NEVENT => Some(ReferenceTarget::Record),
        HRP_NPUB | HRP_NPROFILE => Some(ReferenceTarget::Author),
        _ => None,
    }
}

/// Scan `content` for reference tokens, in order of appearance
///
/// Only syntax is checked here. A token that looks right but fails to decode
/// is still returned; decoding happens later, in one batch.
pub fn find_reference_tokens(content: &str) -> Vec<ReferenceToken<'_>> {
    let mut tokens = vec![];
    let mut offset = 0;

    while let Some(found) = content[offset..].find(URI_PREFIX) {
        let start = offset + found;
        let body_start = start + URI_PREFIX.len();
        let body_len = content[body_start..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(content.len() - body_start);
        let end = body_start + body_len;

        if let Some(target) = target_for_bech32(&content[body_start..end]) {
            tokens.push(ReferenceToken {
                token: &content[start..end],
                span: start..end,
                target,
            });
        }

        offset = end;
    }

    tokens
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedReference {
    Record {
        id: RecordId,
        #[serde(skip_serializing_if = "Option::is_none")]
        author: Option<AuthorId>,
        relay_hints: Vec<String>,
    },
    Author {
        author: AuthorId,
        relay_hints: Vec<String>,
    },
}

impl DecodedReference {
    pub fn relay_hints(&self) -> &[String] {
        match self {
            DecodedReference::Record { relay_hints, .. }
            | DecodedReference::Author { relay_hints, .. } => relay_hints,
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            DecodedReference::Record { id, .. } => Some(*id),
            DecodedReference::Author { .. } => None,
        }
    }

    pub fn author_id(&self) -> Option<AuthorId> {
        match self {
            DecodedReference::Record { author, .. } => *author,
            DecodedReference::Author { author, .. } => Some(*author),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReferenceDecodeError {
    #[snafu(display("Invalid bech32"))]
    Bech32 { source: bech32::DecodeError },
    #[snafu(display("Unsupported prefix: {prefix}"))]
    UnsupportedPrefix { prefix: String },
    #[snafu(display("Invalid length: expected {expected} bytes, got {got}"))]
    InvalidLength { expected: usize, got: usize },
    #[snafu(display("Truncated TLV data at offset {offset}"))]
    TruncatedTlv { offset: usize },
    #[snafu(display("Missing required TLV entry (type 0)"))]
    MissingSpecial,
}

pub type ReferenceDecodeResult<T> = std::result::Result<T, ReferenceDecodeError>;

/// Decode a reference token, with or without the `nostr:` prefix
pub fn decode_reference(token: &str) -> ReferenceDecodeResult<DecodedReference> {
    let body = token.strip_prefix(URI_PREFIX).unwrap_or(token);
    let (hrp, bytes) = bech32::decode(body).context(Bech32Snafu)?;

    match hrp.as_str() {
        HRP_NOTE => Ok(DecodedReference::Record {
            id: RecordId::from_bytes(to_32_bytes(&bytes)?),
            author: None,
            relay_hints: vec![],
        }),
        HRP_NPUB => Ok(DecodedReference::Author {
            author: AuthorId::from_bytes(to_32_bytes(&bytes)?),
            relay_hints: vec![],
        }),
        HRP_NEVENT => {
            let tlv = Tlv::parse(&bytes, true)?;
            Ok(DecodedReference::Record {
                id: RecordId::from_bytes(tlv.special),
                author: tlv.author.map(AuthorId::from_bytes),
                relay_hints: tlv.relays,
            })
        }
        HRP_NPROFILE => {
            let tlv = Tlv::parse(&bytes, false)?;
            Ok(DecodedReference::Author {
                author: AuthorId::from_bytes(tlv.special),
                relay_hints: tlv.relays,
            })
        }
        other => UnsupportedPrefixSnafu {
            prefix: other.to_owned(),
        }
        .fail(),
    }
}

/// Encode a bare record id as a `note` token (without the URI prefix)
pub fn encode_note(id: RecordId) -> String {
    encode(HRP_NOTE, id.as_slice())
}

/// Encode a bare author id as an `npub` token (without the URI prefix)
pub fn encode_npub(author: AuthorId) -> String {
    encode(HRP_NPUB, author.as_slice())
}

/// Encode an `nevent` token (without the URI prefix)
pub fn encode_nevent(id: RecordId, relays: &[&str], author: Option<AuthorId>) -> String {
    let mut data = tlv_entry(TLV_SPECIAL, id.as_slice());
    for relay in relays {
        data.extend(tlv_entry(TLV_RELAY, relay.as_bytes()));
    }
    if let Some(author) = author {
        data.extend(tlv_entry(TLV_AUTHOR, author.as_slice()));
    }
    encode(HRP_NEVENT, &data)
}

/// Encode an `nprofile` token (without the URI prefix)
pub fn encode_nprofile(author: AuthorId, relays: &[&str]) -> String {
    let mut data = tlv_entry(TLV_SPECIAL, author.as_slice());
    for relay in relays {
        data.extend(tlv_entry(TLV_RELAY, relay.as_bytes()));
    }
    encode(HRP_NPROFILE, &data)
}

fn encode(hrp: &str, data: &[u8]) -> String {
    let hrp = Hrp::parse(hrp).expect("Static hrp must be valid");
    bech32::encode::<bech32::Bech32>(hrp, data).expect("Fits in bech32 code length")
}

fn tlv_entry(ty: u8, value: &[u8]) -> Vec<u8> {
    let len = u8::try_from(value.len()).expect("TLV values are under 256 bytes");
    let mut out = Vec::with_capacity(value.len() + 2);
    out.push(ty);
    out.push(len);
    out.extend_from_slice(value);
    out
}

fn to_32_bytes(bytes: &[u8]) -> ReferenceDecodeResult<[u8; 32]> {
    bytes.try_into().ok().context(InvalidLengthSnafu {
        expected: 32usize,
        got: bytes.len(),
    })
}

struct Tlv {
    special: [u8; 32],
    relays: Vec<String>,
    author: Option<[u8; 32]>,
}

impl Tlv {
    fn parse(bytes: &[u8], with_author: bool) -> ReferenceDecodeResult<Self> {
        let mut special = None;
        let mut relays = vec![];
        let mut author = None;

        let mut pos = 0;
        while pos < bytes.len() {
            ensure!(pos + 2 <= bytes.len(), TruncatedTlvSnafu { offset: pos });
            let ty = bytes[pos];
            let len = usize::from(bytes[pos + 1]);
            pos += 2;
            ensure!(pos + len <= bytes.len(), TruncatedTlvSnafu { offset: pos });
            let value = &bytes[pos..pos + len];
            pos += len;

            match ty {
                TLV_SPECIAL => special = Some(to_32_bytes(value)?),
                TLV_RELAY => {
                    // invalid utf8 hints are dropped, the reference stays usable
                    if let Ok(url) = std::str::from_utf8(value) {
                        relays.push(url.to_owned());
                    }
                }
                TLV_AUTHOR if with_author => {
                    if let Ok(a) = value.try_into() {
                        author = Some(a);
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            special: special.context(MissingSpecialSnafu)?,
            relays,
            author,
        })
    }
}
