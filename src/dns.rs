//! Minimal DNS wire-format helpers.
//!
//! The proxy forwards packets verbatim in both directions, so there is no
//! general codec here. This module decodes exactly what the data path needs:
//! the question fingerprint of an incoming query, the answer TTLs of an
//! upstream response, and the one-off bootstrap A query at startup.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Fixed size of the DNS message header.
pub const HEADER_LEN: usize = 12;
/// QTYPE for IPv4 host addresses.
pub const QTYPE_A: u16 = 1;
/// QCLASS for the Internet.
pub const QCLASS_IN: u16 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("packet truncated")]
    Truncated,
    #[error("packet has no question")]
    NoQuestion,
    #[error("invalid label in name")]
    InvalidLabel,
    #[error("transaction id mismatch")]
    IdMismatch,
    #[error("no usable answer record")]
    NoAnswer,
}

/// Identity of a DNS question: lowercased QNAME plus QTYPE and QCLASS.
///
/// Two packets with different transaction ids but the same question map to
/// the same key. The hash is precomputed once since every datagram probes
/// the cache map with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionKey {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    hash: u64,
}

impl Hash for QuestionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl QuestionKey {
    pub fn new(name: String, qtype: u16, qclass: u16) -> Self {
        let name = name.to_ascii_lowercase();

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        qtype.hash(&mut hasher);
        qclass.hash(&mut hasher);
        let hash = hasher.finish();

        Self {
            name,
            qtype,
            qclass,
            hash,
        }
    }
}

/// Decode just enough of an incoming packet to identify it: the transaction
/// id and the first question.
pub fn parse_query(packet: &[u8]) -> Result<(u16, QuestionKey), WireError> {
    if packet.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }
    let txid = read_u16(packet, 0)?;
    let qdcount = read_u16(packet, 4)?;
    if qdcount == 0 {
        return Err(WireError::NoQuestion);
    }

    let mut name = String::new();
    let mut pos = HEADER_LEN;
    loop {
        let len = *packet.get(pos).ok_or(WireError::Truncated)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        // Compression pointers never occur in the question of a fresh query.
        if len & 0xc0 != 0 {
            return Err(WireError::InvalidLabel);
        }
        let label = packet.get(pos..pos + len).ok_or(WireError::Truncated)?;
        if !name.is_empty() {
            name.push('.');
        }
        for &byte in label {
            name.push(byte.to_ascii_lowercase() as char);
        }
        pos += len;
    }
    let qtype = read_u16(packet, pos)?;
    let qclass = read_u16(packet, pos + 2)?;

    Ok((txid, QuestionKey::new(name, qtype, qclass)))
}

/// Minimum TTL across the answer records of a response, or `None` when the
/// answer section is empty.
pub fn min_answer_ttl(packet: &[u8]) -> Result<Option<u32>, WireError> {
    if packet.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }
    let qdcount = read_u16(packet, 4)?;
    let ancount = read_u16(packet, 6)?;

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        pos = skip_name(packet, pos)?;
        pos += 4; // QTYPE + QCLASS
    }

    let mut min_ttl = None;
    for _ in 0..ancount {
        pos = skip_name(packet, pos)?;
        let ttl = read_u32(packet, pos + 4)?;
        let rdlength = read_u16(packet, pos + 8)? as usize;
        pos += 10 + rdlength;
        if pos > packet.len() {
            return Err(WireError::Truncated);
        }
        min_ttl = Some(min_ttl.map_or(ttl, |current: u32| current.min(ttl)));
    }
    Ok(min_ttl)
}

/// Copy of `packet` with the transaction id replaced.
///
/// Cached bytes are shared between workers, so the rewrite always happens on
/// a fresh copy rather than in place.
pub fn with_txid(packet: &[u8], txid: u16) -> Vec<u8> {
    let mut out = packet.to_vec();
    if out.len() >= 2 {
        out[..2].copy_from_slice(&txid.to_be_bytes());
    }
    out
}

/// Encode a minimal recursion-desired query for `(name, qtype, IN)`.
pub fn build_query(txid: u16, name: &str, qtype: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    out.extend_from_slice(&txid.to_be_bytes());
    out.extend_from_slice(&[0x01, 0x00]); // RD=1
    out.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]); // QDCOUNT=1
    for label in name.trim_end_matches('.').split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out.extend_from_slice(&qtype.to_be_bytes());
    out.extend_from_slice(&QCLASS_IN.to_be_bytes());
    out
}

/// Address of the first A record answering `txid`, for the bootstrap path.
pub fn first_a_record(packet: &[u8], txid: u16) -> Result<Ipv4Addr, WireError> {
    if packet.len() < HEADER_LEN {
        return Err(WireError::Truncated);
    }
    if read_u16(packet, 0)? != txid {
        return Err(WireError::IdMismatch);
    }
    let qdcount = read_u16(packet, 4)?;
    let ancount = read_u16(packet, 6)?;

    let mut pos = HEADER_LEN;
    for _ in 0..qdcount {
        pos = skip_name(packet, pos)?;
        pos += 4;
    }

    for _ in 0..ancount {
        pos = skip_name(packet, pos)?;
        let rtype = read_u16(packet, pos)?;
        let rclass = read_u16(packet, pos + 2)?;
        let rdlength = read_u16(packet, pos + 8)? as usize;
        let rdata = pos + 10;
        if rtype == QTYPE_A && rclass == QCLASS_IN && rdlength == 4 {
            let octets = packet.get(rdata..rdata + 4).ok_or(WireError::Truncated)?;
            return Ok(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
        }
        pos = rdata + rdlength;
        if pos > packet.len() {
            return Err(WireError::Truncated);
        }
    }
    Err(WireError::NoAnswer)
}

/// Advance past a (possibly compressed) name, returning the next offset.
fn skip_name(packet: &[u8], mut pos: usize) -> Result<usize, WireError> {
    loop {
        let len = *packet.get(pos).ok_or(WireError::Truncated)? as usize;
        if len == 0 {
            return Ok(pos + 1);
        }
        if len & 0xc0 == 0xc0 {
            if pos + 2 > packet.len() {
                return Err(WireError::Truncated);
            }
            return Ok(pos + 2);
        }
        if len & 0xc0 != 0 {
            return Err(WireError::InvalidLabel);
        }
        pos += 1 + len;
    }
}

fn read_u16(packet: &[u8], pos: usize) -> Result<u16, WireError> {
    let bytes = packet.get(pos..pos + 2).ok_or(WireError::Truncated)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(packet: &[u8], pos: usize) -> Result<u32, WireError> {
    let bytes = packet.get(pos..pos + 4).ok_or(WireError::Truncated)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
