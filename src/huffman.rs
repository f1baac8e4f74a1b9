//! Huffman coding over byte symbols.
//!
//! Tree construction is deterministic: equal frequencies are merged in
//! insertion order (leaves by ascending byte value, then merged nodes in
//! creation order). Codes are packed MSB-first; the bit count travels with
//! the payload so trailing padding is never decoded.

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::io::Cursor;

use crate::error::CompressError;

#[derive(Debug, Clone)]
struct HuffNode {
    freq: u64,
    order: usize,
    symbol: Option<u8>,
    left: Option<Box<HuffNode>>,
    right: Option<Box<HuffNode>>,
}

impl Eq for HuffNode {}
impl PartialEq for HuffNode {
    fn eq(&self, other: &Self) -> bool {
        self.freq == other.freq && self.order == other.order
    }
}
impl PartialOrd for HuffNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HuffNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on (freq, order)
        (other.freq, other.order).cmp(&(self.freq, self.order))
    }
}

fn build_tree(data: &[u8]) -> Option<HuffNode> {
    let mut freq = [0u64; 256];
    for &b in data {
        freq[b as usize] += 1;
    }

    let mut heap = BinaryHeap::new();
    let mut order = 0;
    for (i, &f) in freq.iter().enumerate() {
        if f > 0 {
            heap.push(HuffNode {
                freq: f,
                order,
                symbol: Some(i as u8),
                left: None,
                right: None,
            });
            order += 1;
        }
    }

    while heap.len() > 1 {
        let (Some(left), Some(right)) = (heap.pop(), heap.pop()) else {
            break;
        };
        heap.push(HuffNode {
            freq: left.freq + right.freq,
            order,
            symbol: None,
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        });
        order += 1;
    }

    heap.pop()
}

fn build_codes(node: &HuffNode, prefix: String, codes: &mut BTreeMap<u8, String>) {
    if let Some(sym) = node.symbol {
        // A lone symbol still needs one bit.
        let code = if prefix.is_empty() { "0".to_string() } else { prefix };
        codes.insert(sym, code);
        return;
    }
    if let Some(ref left) = node.left {
        build_codes(left, format!("{prefix}0"), codes);
    }
    if let Some(ref right) = node.right {
        build_codes(right, format!("{prefix}1"), codes);
    }
}

/// Byte → bit-string code table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HuffmanTable {
    codes: BTreeMap<u8, String>,
}

impl HuffmanTable {
    /// Build the optimal code table for `data`. Empty input gives an empty table.
    pub fn build(data: &[u8]) -> Self {
        let mut codes = BTreeMap::new();
        if let Some(tree) = build_tree(data) {
            build_codes(&tree, String::new(), &mut codes);
        }
        Self { codes }
    }

    /// Adopt an externally supplied table after checking it is a prefix code.
    pub fn from_codes(codes: BTreeMap<u8, String>) -> Result<Self, CompressError> {
        let table = Self { codes };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), CompressError> {
        DecodeTree::from_table(self).map(|_| ())
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn code(&self, symbol: u8) -> Option<&str> {
        self.codes.get(&symbol).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.codes.iter().map(|(s, c)| (*s, c.as_str()))
    }

    /// No code is a prefix of another.
    pub fn is_prefix_free(&self) -> bool {
        let codes: Vec<&String> = self.codes.values().collect();
        codes.iter().enumerate().all(|(i, a)| {
            codes
                .iter()
                .enumerate()
                .all(|(j, b)| i == j || !b.starts_with(a.as_str()))
        })
    }

    /// Bits needed to encode `data` with this table.
    pub fn encoded_bits(&self, data: &[u8]) -> u64 {
        data.iter()
            .map(|b| self.codes.get(b).map_or(0, |c| c.len() as u64))
            .sum()
    }
}

#[derive(Debug, Clone, Default)]
struct DecodeNode {
    children: [Option<usize>; 2],
    symbol: Option<u8>,
}

#[derive(Debug)]
struct DecodeTree {
    nodes: Vec<DecodeNode>,
}

impl DecodeTree {
    fn from_table(table: &HuffmanTable) -> Result<Self, CompressError> {
        let mut nodes = vec![DecodeNode::default()];
        for (&symbol, code) in &table.codes {
            if code.is_empty() {
                return Err(CompressError::Huffman(format!("empty code for symbol {symbol}")));
            }
            let mut cur = 0;
            for bit in code.bytes() {
                if nodes[cur].symbol.is_some() {
                    return Err(CompressError::Huffman(format!(
                        "code {code} for symbol {symbol} extends another code"
                    )));
                }
                let idx = match bit {
                    b'0' => 0,
                    b'1' => 1,
                    _ => {
                        return Err(CompressError::Huffman(format!(
                            "code {code:?} for symbol {symbol} is not binary"
                        )))
                    }
                };
                cur = match nodes[cur].children[idx] {
                    Some(next) => next,
                    None => {
                        nodes.push(DecodeNode::default());
                        let next = nodes.len() - 1;
                        nodes[cur].children[idx] = Some(next);
                        next
                    }
                };
            }
            let node = &mut nodes[cur];
            if node.symbol.is_some() || node.children.iter().any(Option::is_some) {
                return Err(CompressError::Huffman(format!(
                    "code {code} for symbol {symbol} is a prefix of another code"
                )));
            }
            node.symbol = Some(symbol);
        }
        Ok(Self { nodes })
    }
}

/// A packed bit stream and its exact length in bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub payload: Vec<u8>,
    pub bits: u64,
}

/// Encode `data` with `table`.
pub fn encode(data: &[u8], table: &HuffmanTable) -> Result<Encoded, CompressError> {
    let mut lookup: Vec<Option<&str>> = vec![None; 256];
    for (symbol, code) in table.iter() {
        lookup[symbol as usize] = Some(code);
    }

    let mut writer = BitWriter::endian(Vec::new(), BigEndian);
    let mut bits = 0u64;
    for &b in data {
        let code = lookup[b as usize]
            .ok_or_else(|| CompressError::Huffman(format!("symbol {b} missing from table")))?;
        for bit in code.bytes() {
            writer.write_bit(bit == b'1')?;
            bits += 1;
        }
    }
    writer.byte_align()?;
    Ok(Encoded {
        payload: writer.into_writer(),
        bits,
    })
}

/// Decode exactly `bits` bits of `payload` with `table`.
pub fn decode(payload: &[u8], bits: u64, table: &HuffmanTable) -> Result<Vec<u8>, CompressError> {
    if bits > payload.len() as u64 * 8 {
        return Err(CompressError::Huffman(format!(
            "payload holds {} bits, {bits} declared",
            payload.len() * 8
        )));
    }
    let tree = DecodeTree::from_table(table)?;
    let mut reader = BitReader::endian(Cursor::new(payload), BigEndian);
    let mut output = Vec::new();
    let mut cur = 0;
    for _ in 0..bits {
        let bit = reader.read_bit()?;
        let next = tree.nodes[cur].children[usize::from(bit)]
            .ok_or_else(|| CompressError::Huffman("bit sequence not in code table".into()))?;
        match tree.nodes[next].symbol {
            Some(sym) => {
                output.push(sym);
                cur = 0;
            }
            None => cur = next,
        }
    }
    if cur != 0 {
        return Err(CompressError::Huffman("payload ends inside a code".into()));
    }
    Ok(output)
}

/// `original bits / encoded bits`, rounded to three places; 1.0 for empty input.
pub fn compression_ratio(data: &[u8], table: &HuffmanTable) -> f64 {
    let encoded = table.encoded_bits(data);
    if data.is_empty() || encoded == 0 {
        return 1.0;
    }
    let ratio = (data.len() as u64 * 8) as f64 / encoded as f64;
    (ratio * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8]) -> Vec<u8> {
        let table = HuffmanTable::build(data);
        let encoded = encode(data, &table).unwrap();
        decode(&encoded.payload, encoded.bits, &table).unwrap()
    }

    #[test]
    fn test_huffman_roundtrip() {
        let data = b"hello world hello world hello";
        assert_eq!(roundtrip(data), data);
    }

    #[test]
    fn test_huffman_single_char() {
        let data = b"aaaaaa";
        let table = HuffmanTable::build(data);
        assert_eq!(table.code(b'a'), Some("0"));
        assert_eq!(roundtrip(data), data);
    }

    #[test]
    fn test_huffman_all_bytes() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(roundtrip(&data), data);
        assert!(HuffmanTable::build(&data).is_prefix_free());
    }

    #[test]
    fn test_huffman_empty() {
        let table = HuffmanTable::build(b"");
        assert!(table.is_empty());
        let encoded = encode(b"", &table).unwrap();
        assert_eq!(encoded.bits, 0);
        assert!(decode(&encoded.payload, 0, &table).unwrap().is_empty());
        assert_eq!(compression_ratio(b"", &table), 1.0);
    }

    #[test]
    fn test_huffman_compression_ratio() {
        let data = "aaabbbccc".repeat(100);
        let table = HuffmanTable::build(data.as_bytes());
        let encoded = encode(data.as_bytes(), &table).unwrap();
        assert!(encoded.payload.len() < data.len());
        assert!(compression_ratio(data.as_bytes(), &table) > 4.0);
    }

    #[test]
    fn test_deterministic_tie_break() {
        // Equal frequencies: lower byte values are merged first and sit on the left.
        let table = HuffmanTable::build(b"abcd");
        assert_eq!(table.code(b'a'), Some("00"));
        assert_eq!(table.code(b'b'), Some("01"));
        assert_eq!(table.code(b'c'), Some("10"));
        assert_eq!(table.code(b'd'), Some("11"));
        assert_eq!(HuffmanTable::build(b"abcd"), table);
    }

    #[test]
    fn test_rejects_non_prefix_table() {
        let codes = BTreeMap::from([(b'a', "0".to_string()), (b'b', "01".to_string())]);
        assert!(HuffmanTable::from_codes(codes).is_err());
        let codes = BTreeMap::from([(b'a', "02".to_string())]);
        assert!(HuffmanTable::from_codes(codes).is_err());
    }

    #[test]
    fn test_decode_detects_truncation() {
        let data = b"abcabcabd";
        let table = HuffmanTable::build(data);
        let encoded = encode(data, &table).unwrap();
        assert!(decode(&encoded.payload, encoded.bits + 64, &table).is_err());
        let single = HuffmanTable::build(b"zzz");
        assert!(decode(&[0xff], 8, &single).is_err());
    }
}
