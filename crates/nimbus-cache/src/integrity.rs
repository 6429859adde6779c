//! Content integrity hashing.
//!
//! OneDrive advertises two hashes depending on the drive type: personal
//! drives report SHA-1 (uppercase hex), business drives and document
//! libraries report QuickXorHash (base64). Cached blobs are only trusted
//! on open when the recomputed hash matches the recorded one.
//!
//! QuickXorHash has no ecosystem crate; the implementation below follows
//! the published algorithm: the input is XOR-folded into a 160-bit
//! circular register, each byte landing 11 bits after the previous one,
//! and the total input length is finally XORed into the trailing 8 bytes
//! of the digest.

use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

use nimbus_core::types::{ContentHashes, DriveType};

/// Digest width in bytes (160 bits).
const WIDTH_BYTES: usize = 20;

/// Digest width in bits.
const WIDTH_BITS: usize = 160;

/// Bit distance between consecutive input bytes in the register.
const SHIFT: usize = 11;

/// Streaming QuickXorHash state.
#[derive(Debug, Clone)]
pub struct QuickXorHash {
    cells: [u8; WIDTH_BYTES],
    bit_pos: usize,
    length: u64,
}

impl QuickXorHash {
    pub fn new() -> Self {
        Self {
            cells: [0; WIDTH_BYTES],
            bit_pos: 0,
            length: 0,
        }
    }

    /// Folds `data` into the register.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            // Each byte is XORed in at bit_pos, possibly straddling the
            // byte boundary; positions wrap modulo the 160-bit width.
            let spread = (byte as u16) << (self.bit_pos % 8);
            let idx = self.bit_pos / 8;
            self.cells[idx % WIDTH_BYTES] ^= (spread & 0xff) as u8;
            self.cells[(idx + 1) % WIDTH_BYTES] ^= (spread >> 8) as u8;
            self.bit_pos = (self.bit_pos + SHIFT) % WIDTH_BITS;
        }
        self.length = self.length.wrapping_add(data.len() as u64);
    }

    /// Finishes the digest: the input length is XORed into the last
    /// 8 bytes, little-endian.
    pub fn finalize(mut self) -> [u8; WIDTH_BYTES] {
        let length = self.length.to_le_bytes();
        for (i, b) in length.iter().enumerate() {
            self.cells[WIDTH_BYTES - 8 + i] ^= b;
        }
        self.cells
    }
}

impl Default for QuickXorHash {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot QuickXorHash, base64-encoded the way the server reports it.
pub fn quick_xor_base64(data: &[u8]) -> String {
    let mut hasher = QuickXorHash::new();
    hasher.update(data);
    BASE64.encode(hasher.finalize())
}

/// One-shot SHA-1, uppercase hex the way the server reports it.
pub fn sha1_hex(data: &[u8]) -> String {
    let digest = Sha1::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        write!(out, "{byte:02X}").expect("writing to a String cannot fail");
    }
    out
}

/// Computes the hash record relevant for `drive` over `data`.
pub fn hash_for_drive(drive: DriveType, data: &[u8]) -> ContentHashes {
    match drive {
        DriveType::Personal => ContentHashes {
            sha1: Some(sha1_hex(data)),
            quick_xor: None,
        },
        _ => ContentHashes {
            sha1: None,
            quick_xor: Some(quick_xor_base64(data)),
        },
    }
}

/// Whether `data` matches the recorded hashes for the given drive type.
///
/// A missing recorded hash fails validation; the caller decides whether
/// that means "refetch" (remote items) or "trust the only copy" (local
/// items that were never uploaded).
pub fn verify(drive: DriveType, recorded: &ContentHashes, data: &[u8]) -> bool {
    match drive {
        DriveType::Personal => recorded
            .sha1
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(&sha1_hex(data))),
        _ => recorded
            .quick_xor
            .as_deref()
            .is_some_and(|h| h == quick_xor_base64(data)),
    }
}
