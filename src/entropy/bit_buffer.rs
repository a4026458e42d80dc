// src/entropy/bit_buffer.rs

//! Bit-granular output and input buffers.
//!
//! Bits are packed least-significant first within each byte. Multi-bit values
//! are also written least-significant bit first. Both sides count every bit
//! that passed through them, so a budget can cover the stream header too.

use std::io::{self, Read, Write};

use bitvec::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bits: BitVec<u8, Lsb0>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn put_bit(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    /// Writes the low `width` bits of `value`, least significant first.
    pub fn put_bits(&mut self, value: u64, width: u32) {
        for i in 0..width {
            self.put_bit((value >> i) & 1 == 1);
        }
    }

    pub fn put_byte(&mut self, byte: u8) {
        self.put_bits(byte as u64, 8);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put_byte(b);
        }
    }

    /// Bits written so far.
    pub fn bit_count(&self) -> u64 {
        self.bits.len() as u64
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align(&mut self) {
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.align();
        self.bits.into_vec()
    }
}

impl Write for BitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.put_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bits: &'a BitSlice<u8, Lsb0>,
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bits: BitSlice::from_slice(bytes),
            position: 0,
        }
    }

    /// Next bit, or `None` once the input is used up.
    #[inline]
    pub fn get_bit(&mut self) -> Option<bool> {
        let bit = self.bits.get(self.position).map(|b| *b)?;
        self.position += 1;
        Some(bit)
    }

    /// Reads `width` bits, least significant first. `None` if fewer remain.
    pub fn get_bits(&mut self, width: u32) -> Option<u64> {
        if self.remaining() < width as u64 {
            return None;
        }
        let mut value = 0u64;
        for i in 0..width {
            if self.get_bit()? {
                value |= 1 << i;
            }
        }
        Some(value)
    }

    pub fn get_byte(&mut self) -> Option<u8> {
        self.get_bits(8).map(|v| v as u8)
    }

    /// Bits consumed so far.
    pub fn bit_count(&self) -> u64 {
        self.position as u64
    }

    pub fn remaining(&self) -> u64 {
        (self.bits.len() - self.position) as u64
    }

    /// Skips to the next byte boundary.
    pub fn align(&mut self) {
        let rem = self.position % 8;
        if rem != 0 {
            self.position = (self.position + 8 - rem).min(self.bits.len());
        }
    }
}

impl Read for BitReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut n = 0;
        for slot in buf.iter_mut() {
            match self.get_byte() {
                Some(b) => *slot = b,
                None => break,
            }
            n += 1;
        }
        Ok(n)
    }
}
