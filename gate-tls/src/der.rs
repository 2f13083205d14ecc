//! Minimal DER encoding and decoding
//!
//! Just enough ASN.1 for OCSP requests and responses and the Authority
//! Information Access extension of locally issued certificates.

use thiserror::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;

/// Context specific tag `[n]`, constructed
pub const fn context(n: u8) -> u8 {
    0xa0 | n
}

/// Context specific tag `[n]`, primitive
pub const fn context_primitive(n: u8) -> u8 {
    0x80 | n
}

/// 1.3.14.3.2.26
pub const OID_SHA1: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
/// 1.3.6.1.5.5.7.48.1
pub const OID_OCSP: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];
/// 1.3.6.1.5.5.7.48.1.1
pub const OID_OCSP_BASIC: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed DER: {0}")]
pub struct DerError(pub &'static str);

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(length(value.len()));
    out.extend_from_slice(value);
    out
}

pub fn constructed(tag: u8, items: &[&[u8]]) -> Vec<u8> {
    tlv(tag, &items.concat())
}

pub fn sequence(items: &[&[u8]]) -> Vec<u8> {
    constructed(TAG_SEQUENCE, items)
}

pub fn oid(oid: &[u8]) -> Vec<u8> {
    tlv(TAG_OID, oid)
}

pub fn null() -> Vec<u8> {
    vec![TAG_NULL, 0x00]
}

pub fn octet_string(data: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, data)
}

pub fn enumerated(value: u8) -> Vec<u8> {
    tlv(TAG_ENUMERATED, &[value])
}

/// Positive INTEGER from big-endian magnitude bytes
pub fn integer(data: &[u8]) -> Vec<u8> {
    let data = match data.iter().position(|&b| b != 0) {
        Some(pos) => &data[pos..],
        None => &[0],
    };

    if data[0] & 0x80 != 0 {
        let mut padded = vec![0x00];
        padded.extend_from_slice(data);
        tlv(TAG_INTEGER, &padded)
    } else {
        tlv(TAG_INTEGER, data)
    }
}

fn length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }

    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut out = vec![0x80 | (bytes.len() - skip) as u8];
    out.extend_from_slice(&bytes[skip..]);
    out
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// One decoded element
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Sequential reader over the contents of a constructed element
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { rest: input }
    }

    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.rest.first().copied()
    }

    pub fn next(&mut self) -> Result<Tlv<'a>, DerError> {
        let (&tag, rest) = self.rest.split_first().ok_or(DerError("unexpected end of input"))?;
        let (&first, mut rest) = rest.split_first().ok_or(DerError("missing length"))?;

        let len = if first < 0x80 {
            first as usize
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 {
                return Err(DerError("unsupported length encoding"));
            }
            let (bytes, tail) = rest.split_at_checked(count).ok_or(DerError("truncated length"))?;
            rest = tail;
            bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
        };

        let (value, rest) = rest.split_at_checked(len).ok_or(DerError("truncated value"))?;
        self.rest = rest;
        Ok(Tlv { tag, value })
    }

    /// Read the next element, requiring `tag`
    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], DerError> {
        let tlv = self.next()?;
        if tlv.tag != tag {
            return Err(DerError("unexpected tag"));
        }
        Ok(tlv.value)
    }

    /// Skip the next element when it carries `tag`
    pub fn skip_if(&mut self, tag: u8) -> Result<bool, DerError> {
        if self.peek_tag() == Some(tag) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Strip the sign padding from an INTEGER's content bytes
pub fn integer_magnitude(value: &[u8]) -> &[u8] {
    match value.iter().position(|&b| b != 0) {
        Some(pos) => &value[pos..],
        None => &value[value.len().saturating_sub(1)..],
    }
}
