//! Minimal protobuf wire codec for MerkleDAG nodes and invocation payloads.
//!
//! Only wire types 0 (varint) and 2 (length-delimited) exist on this wire;
//! anything else is a protocol error. Encoding is byte-deterministic: fields
//! are emitted in a fixed order and links in their stored order, so the same
//! logical node always hashes to the same multihash.

use crate::dag::{DagLink, DagNode};
use crate::errors::{ChainError, ChainResult};
use crate::types::Invocation;

// DAG node: data = 1, links = 2. Link: hash = 1, name = 2, tsize = 3.
// Links are emitted before data, matching the canonical dag-pb layout.
const NODE_DATA: u64 = 1;
const NODE_LINKS: u64 = 2;
const LINK_HASH: u64 = 1;
const LINK_NAME: u64 = 2;
const LINK_TSIZE: u64 = 3;

const INVOCATION_FUNCTION: u64 = 1;
const INVOCATION_ARGS: u64 = 2;

const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn push_tag(out: &mut Vec<u8>, field: u64, wire_type: u64) {
    push_varint(out, field << 3 | wire_type);
}

fn push_bytes(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    push_tag(out, field, WIRE_LEN);
    push_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn encode_node(node: &DagNode) -> ChainResult<Vec<u8>> {
    let mut out = Vec::new();
    for link in &node.links {
        let raw = bs58::decode(&link.hash)
            .into_vec()
            .map_err(|err| ChainError::Protocol(format!("malformed link hash: {err}")))?;
        let mut body = Vec::new();
        push_bytes(&mut body, LINK_HASH, &raw);
        push_bytes(&mut body, LINK_NAME, link.name.as_bytes());
        push_tag(&mut body, LINK_TSIZE, WIRE_VARINT);
        push_varint(&mut body, link.size);
        push_bytes(&mut out, NODE_LINKS, &body);
    }
    if !node.data.is_empty() {
        push_bytes(&mut out, NODE_DATA, &node.data);
    }
    Ok(out)
}

pub fn decode_node(bytes: &[u8]) -> ChainResult<DagNode> {
    let mut node = DagNode::default();
    let mut cursor = Cursor::new(bytes);
    while !cursor.done() {
        let (field, wire_type) = cursor.tag()?;
        match (field, wire_type) {
            (NODE_DATA, WIRE_LEN) => node.data = cursor.bytes()?.to_vec(),
            (NODE_LINKS, WIRE_LEN) => node.links.push(decode_link(cursor.bytes()?)?),
            _ => cursor.skip(wire_type)?,
        }
    }
    Ok(node)
}

fn decode_link(bytes: &[u8]) -> ChainResult<DagLink> {
    let mut link = DagLink::default();
    let mut cursor = Cursor::new(bytes);
    while !cursor.done() {
        let (field, wire_type) = cursor.tag()?;
        match (field, wire_type) {
            (LINK_HASH, WIRE_LEN) => link.hash = bs58::encode(cursor.bytes()?).into_string(),
            (LINK_NAME, WIRE_LEN) => {
                link.name = String::from_utf8(cursor.bytes()?.to_vec())
                    .map_err(|err| ChainError::Protocol(format!("malformed link name: {err}")))?;
            }
            (LINK_TSIZE, WIRE_VARINT) => link.size = cursor.varint()?,
            _ => cursor.skip(wire_type)?,
        }
    }
    Ok(link)
}

/// Deterministic encoding of an invocation, used as the payload a client
/// signs. `function` is field 1, each argument a repeated field 2.
pub fn encode_invocation(invocation: &Invocation) -> Vec<u8> {
    let mut out = Vec::new();
    push_bytes(&mut out, INVOCATION_FUNCTION, invocation.function.as_bytes());
    for arg in &invocation.args {
        push_bytes(&mut out, INVOCATION_ARGS, arg.as_bytes());
    }
    out
}

pub fn decode_invocation(bytes: &[u8]) -> ChainResult<Invocation> {
    let mut function = String::new();
    let mut args = Vec::new();
    let mut cursor = Cursor::new(bytes);
    while !cursor.done() {
        let (field, wire_type) = cursor.tag()?;
        match (field, wire_type) {
            (INVOCATION_FUNCTION, WIRE_LEN) => {
                function = utf8_field(cursor.bytes()?, "function")?;
            }
            (INVOCATION_ARGS, WIRE_LEN) => args.push(utf8_field(cursor.bytes()?, "arg")?),
            _ => cursor.skip(wire_type)?,
        }
    }
    Ok(Invocation { function, args })
}

fn utf8_field(bytes: &[u8], what: &str) -> ChainResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| ChainError::Protocol(format!("malformed {what}: {err}")))
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn done(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn tag(&mut self) -> ChainResult<(u64, u64)> {
        let tag = self.varint()?;
        Ok((tag >> 3, tag & 0x7))
    }

    fn varint(&mut self) -> ChainResult<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .bytes
                .get(self.offset)
                .ok_or_else(|| ChainError::Protocol("truncated varint".into()))?;
            self.offset += 1;
            if shift >= 64 {
                return Err(ChainError::Protocol("varint overflow".into()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn bytes(&mut self) -> ChainResult<&'a [u8]> {
        let len = self.varint()? as usize;
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ChainError::Protocol("truncated length-delimited field".into()))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn skip(&mut self, wire_type: u64) -> ChainResult<()> {
        match wire_type {
            WIRE_VARINT => {
                self.varint()?;
            }
            WIRE_LEN => {
                self.bytes()?;
            }
            other => {
                return Err(ChainError::Protocol(format!(
                    "unsupported wire type {other}"
                )));
            }
        }
        Ok(())
    }
}
