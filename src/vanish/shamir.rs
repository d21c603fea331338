//! Threshold secret sharing over GF(2^8).
//!
//! Every byte of the secret is the constant term of its own random polynomial of degree
//! `threshold - 1`. Share `i` holds the evaluations of all polynomials at `x = i`, so any
//! `threshold` shares recover each byte by Lagrange interpolation at `x = 0`, while fewer shares
//! say nothing about it.

use rand::RngCore;

use super::KeyShare;
use crate::error::{Error, Result};

/// Multiplication in GF(2^8) modulo the AES polynomial `x^8 + x^4 + x^3 + x + 1`.
fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80 != 0;
        a <<= 1;
        if carry {
            a ^= 0x1B;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse in GF(2^8), computed as `a^254`. Maps 0 to 0.
fn gf_inv(a: u8) -> u8 {
    let mut result = 1;
    let mut base = a;
    let mut exp = 254u8;
    while exp > 0 {
        if exp & 1 == 1 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Evaluates the polynomial with `coefficients` (constant term first) at `x`.
fn evaluate(coefficients: &[u8], x: u8) -> u8 {
    coefficients
        .iter()
        .rev()
        .fold(0, |acc, &coefficient| gf_mul(acc, x) ^ coefficient)
}

/// Splits `secret` into `shares` shares, indexed from 1, any `threshold` of which recover it.
pub fn split(secret: &[u8], shares: u8, threshold: u8) -> Result<Vec<KeyShare>> {
    if threshold == 0 || shares < threshold {
        return Err(Error::InvalidShareParameters { shares, threshold });
    }

    let mut rng = rand::thread_rng();
    let mut ret: Vec<KeyShare> = (1..=shares)
        .map(|index| KeyShare {
            index,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coefficients = vec![0u8; threshold as usize];
    for &byte in secret {
        coefficients[0] = byte;
        rng.fill_bytes(&mut coefficients[1..]);
        for share in &mut ret {
            share.data.push(evaluate(&coefficients, share.index));
        }
    }
    Ok(ret)
}

/// Recovers the secret from shares with distinct, non-zero indices. The result is only the
/// original secret if at least `threshold` shares of the same split are given.
pub fn combine(shares: &[KeyShare]) -> Vec<u8> {
    let len = shares.iter().map(|share| share.data.len()).min().unwrap_or(0);

    // Lagrange basis polynomials evaluated at 0; subtraction is XOR in GF(2^8)
    let basis: Vec<u8> = shares
        .iter()
        .enumerate()
        .map(|(i, share)| {
            shares
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .fold(1, |acc, (_, other)| {
                    gf_mul(acc, gf_mul(other.index, gf_inv(other.index ^ share.index)))
                })
        })
        .collect();

    (0..len)
        .map(|byte| {
            shares
                .iter()
                .zip(&basis)
                .fold(0, |acc, (share, &weight)| acc ^ gf_mul(share.data[byte], weight))
        })
        .collect()
}
