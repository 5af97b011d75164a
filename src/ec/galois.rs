//! GF(2^8) Arithmetic
//!
//! Byte arithmetic in the Galois field GF(2^8) built on the primitive
//! polynomial x^8 + x^4 + x^3 + x^2 + 1 (0x11D) with generator 2. Addition is
//! XOR; multiplication, division and powers go through the log/exp tables of
//! `reed_solomon_erasure::galois_8`, which implements the same field.
//!
//! The wrappers here make division total (`None` for a zero divisor) and
//! short-circuit the trivial slice coefficients.

use reed_solomon_erasure::galois_8;

/// Primitive polynomial x^8 + x^4 + x^3 + x^2 + 1
pub const FIELD_POLYNOMIAL: u16 = 0x11D;

/// Field addition (XOR)
#[inline]
pub fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field subtraction, identical to addition in characteristic 2
#[inline]
pub fn sub(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Field multiplication
#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    galois_8::mul(a, b)
}

/// Field division, `None` when dividing by zero
#[inline]
pub fn div(a: u8, b: u8) -> Option<u8> {
    if b == 0 {
        return None;
    }
    Some(galois_8::div(a, b))
}

/// Multiplicative inverse, `None` for zero
#[inline]
pub fn inverse(a: u8) -> Option<u8> {
    div(1, a)
}

/// `a` raised to the `n`-th power, with 0^0 = 1
pub fn exp(a: u8, n: usize) -> u8 {
    galois_8::exp(a, n)
}

/// `out[i] = c * input[i]`
pub fn mul_slice(c: u8, input: &[u8], out: &mut [u8]) {
    galois_8::mul_slice(c, input, out);
}

/// `out[i] ^= c * input[i]`
pub fn mul_slice_xor(c: u8, input: &[u8], out: &mut [u8]) {
    match c {
        0 => {}
        1 => xor_slice(input, out),
        _ => galois_8::mul_slice_xor(c, input, out),
    }
}

/// `out[i] ^= input[i]`
pub fn xor_slice(input: &[u8], out: &mut [u8]) {
    for (o, i) in out.iter_mut().zip(input.iter()) {
        *o ^= *i;
    }
}

// =============================================================================
// Tests
// =============================================================================
