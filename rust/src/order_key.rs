//! Fractional-indexing order keys for sibling ordering.
//!
//! A key is an integer part followed by an optional fractional part, both in
//! base-62 digits (`0-9A-Za-z`, which sort byte-wise in digit order):
//! - The head character encodes the integer part's length: `a`..`z` give 2..27
//!   characters (head included), `A`..`Z` give 27..2 and sort below every
//!   `a` key. `"a0"` is the first key handed out.
//! - The fractional part never ends in `0`, so between any two distinct keys
//!   there is always another key.
//!
//! Midpoint rule: walk the common prefix, then take the digit halfway between
//! the first differing digits; when they are adjacent, keep the lower digit and
//! recurse into the remainder against an open upper bound. New keys are
//! derived from their neighbours only, so no existing key is ever rewritten.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ZERO: u8 = b'0';
const BASE: usize = 62;
/// The smallest integer part; keys with it can only grow a fractional part downward.
const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

/// Errors from key generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderKeyError {
    #[error("Invalid order key: {0:?}")]
    InvalidKey(String),
    #[error("Order keys out of order: {0:?} is not below {1:?}")]
    OutOfOrder(String, String),
    #[error("Order key space exhausted")]
    Exhausted,
}

/// Opaque sort key. Compared byte-wise, never locale-aware.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderKey(String);

impl OrderKey {
    /// Wrap an existing key after checking it is well-formed.
    pub fn parse(key: impl Into<String>) -> Result<Self, OrderKeyError> {
        let key = key.into();
        validate(&key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrderKey {
    fn default() -> Self {
        Self("a0".to_string())
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Byte-wise comparison.
pub fn compare(a: &OrderKey, b: &OrderKey) -> Ordering {
    a.0.as_bytes().cmp(b.0.as_bytes())
}

/// A key greater than `last` (or the first key when there is none).
pub fn append_key(last: Option<&OrderKey>) -> Result<OrderKey, OrderKeyError> {
    insert_key(last, None)
}

/// A key less than `first` (or the first key when there is none).
pub fn prepend_key(first: Option<&OrderKey>) -> Result<OrderKey, OrderKeyError> {
    insert_key(None, first)
}

/// A key strictly between `before` and `after`. Either bound may be open.
pub fn insert_key(
    before: Option<&OrderKey>,
    after: Option<&OrderKey>,
) -> Result<OrderKey, OrderKeyError> {
    key_between(before.map(|k| k.as_str()), after.map(|k| k.as_str())).map(OrderKey)
}

/// `n` keys in increasing order, all strictly between the bounds.
pub fn bulk_keys(
    before: Option<&OrderKey>,
    after: Option<&OrderKey>,
    n: usize,
) -> Result<Vec<OrderKey>, OrderKeyError> {
    let keys = n_keys_between(before.map(|k| k.0.clone()), after.map(|k| k.0.clone()), n)?;
    Ok(keys.into_iter().map(OrderKey).collect())
}

fn digit_index(c: u8) -> Option<usize> {
    DIGITS.iter().position(|&d| d == c)
}

fn integer_length(head: u8) -> Option<usize> {
    match head {
        b'a'..=b'z' => Some((head - b'a') as usize + 2),
        b'A'..=b'Z' => Some((b'Z' - head) as usize + 2),
        _ => None,
    }
}

fn split_key(key: &str) -> Result<(&str, &str), OrderKeyError> {
    let invalid = || OrderKeyError::InvalidKey(key.to_string());
    let head = *key.as_bytes().first().ok_or_else(invalid)?;
    let len = integer_length(head).ok_or_else(invalid)?;
    if key.len() < len {
        return Err(invalid());
    }
    Ok(key.split_at(len))
}

fn validate(key: &str) -> Result<(), OrderKeyError> {
    if key == SMALLEST_INTEGER {
        return Err(OrderKeyError::InvalidKey(key.to_string()));
    }
    let (integer, fraction) = split_key(key)?;
    let all_digits = integer.bytes().skip(1).chain(fraction.bytes()).all(|c| digit_index(c).is_some());
    if !all_digits || fraction.as_bytes().last() == Some(&ZERO) {
        return Err(OrderKeyError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Fractional digits strictly between `a` and `b` (`None` = open upper bound).
///
/// Both inputs are fractional parts without trailing zeros, with `a < b`.
fn midpoint(a: &str, b: Option<&str>) -> String {
    let a = a.as_bytes();
    let b = b.map(str::as_bytes);
    let mut out: Vec<u8> = Vec::new();
    let mut a_pos = 0;
    let mut upper: Option<&[u8]> = b;

    loop {
        let a_rest = &a[a_pos.min(a.len())..];
        if let Some(b_rest) = upper {
            // Copy the shared prefix (missing digits of `a` count as zero).
            let mut n = 0;
            while n < b_rest.len() && a_rest.get(n).copied().unwrap_or(ZERO) == b_rest[n] {
                n += 1;
            }
            out.extend_from_slice(&b_rest[..n]);
            a_pos += n;
            upper = Some(&b_rest[n..]);
        }

        let a_rest = &a[a_pos.min(a.len())..];
        let digit_a = a_rest.first().and_then(|&c| digit_index(c)).unwrap_or(0);
        let digit_b = match upper {
            Some(rest) => rest.first().and_then(|&c| digit_index(c)).unwrap_or(BASE),
            None => BASE,
        };

        if digit_b - digit_a > 1 {
            let mid = (digit_a + digit_b + 1) / 2;
            out.push(DIGITS[mid]);
            return String::from_utf8_lossy(&out).into_owned();
        }
        if let Some(rest) = upper {
            if rest.len() > 1 {
                out.push(rest[0]);
                return String::from_utf8_lossy(&out).into_owned();
            }
        }
        out.push(DIGITS[digit_a]);
        a_pos += 1;
        upper = None;
    }
}

fn increment_integer(x: &str) -> Option<String> {
    let bytes = x.as_bytes();
    let head = bytes[0];
    let mut digits: Vec<u8> = bytes[1..].to_vec();
    let mut carry = true;
    for d in digits.iter_mut().rev() {
        let next = digit_index(*d).unwrap_or(0) + 1;
        if next == BASE {
            *d = ZERO;
        } else {
            *d = DIGITS[next];
            carry = false;
            break;
        }
    }
    if carry {
        if head == b'Z' {
            return Some("a0".to_string());
        }
        if head == b'z' {
            return None;
        }
        let new_head = head + 1;
        if new_head > b'a' {
            digits.push(ZERO);
        } else {
            digits.pop();
        }
        let mut out = vec![new_head];
        out.extend(digits);
        return Some(String::from_utf8_lossy(&out).into_owned());
    }
    let mut out = vec![head];
    out.extend(digits);
    Some(String::from_utf8_lossy(&out).into_owned())
}

fn decrement_integer(x: &str) -> Option<String> {
    let bytes = x.as_bytes();
    let head = bytes[0];
    let top = DIGITS[BASE - 1];
    let mut digits: Vec<u8> = bytes[1..].to_vec();
    let mut borrow = true;
    for d in digits.iter_mut().rev() {
        let idx = digit_index(*d).unwrap_or(0);
        if idx == 0 {
            *d = top;
        } else {
            *d = DIGITS[idx - 1];
            borrow = false;
            break;
        }
    }
    if borrow {
        if head == b'a' {
            return Some(format!("Z{}", top as char));
        }
        if head == b'A' {
            return None;
        }
        let new_head = head - 1;
        if new_head < b'Z' {
            digits.push(top);
        } else {
            digits.pop();
        }
        let mut out = vec![new_head];
        out.extend(digits);
        return Some(String::from_utf8_lossy(&out).into_owned());
    }
    let mut out = vec![head];
    out.extend(digits);
    Some(String::from_utf8_lossy(&out).into_owned())
}

fn key_between(a: Option<&str>, b: Option<&str>) -> Result<String, OrderKeyError> {
    if let Some(a) = a {
        validate(a)?;
    }
    if let Some(b) = b {
        validate(b)?;
    }
    if let (Some(a), Some(b)) = (a, b) {
        if a.as_bytes() >= b.as_bytes() {
            return Err(OrderKeyError::OutOfOrder(a.to_string(), b.to_string()));
        }
    }

    match (a, b) {
        (None, None) => Ok("a0".to_string()),
        (None, Some(b)) => {
            let (ib, fb) = split_key(b)?;
            if ib == SMALLEST_INTEGER {
                return Ok(format!("{ib}{}", midpoint("", Some(fb))));
            }
            if ib.len() < b.len() {
                return Ok(ib.to_string());
            }
            decrement_integer(ib).ok_or(OrderKeyError::Exhausted)
        }
        (Some(a), None) => {
            let (ia, fa) = split_key(a)?;
            match increment_integer(ia) {
                Some(i) => Ok(i),
                None => Ok(format!("{ia}{}", midpoint(fa, None))),
            }
        }
        (Some(a), Some(b)) => {
            let (ia, fa) = split_key(a)?;
            let (ib, fb) = split_key(b)?;
            if ia == ib {
                return Ok(format!("{ia}{}", midpoint(fa, Some(fb))));
            }
            let i = increment_integer(ia).ok_or(OrderKeyError::Exhausted)?;
            if i.as_bytes() < b.as_bytes() {
                return Ok(i);
            }
            Ok(format!("{ia}{}", midpoint(fa, None)))
        }
    }
}

fn n_keys_between(
    a: Option<String>,
    b: Option<String>,
    n: usize,
) -> Result<Vec<String>, OrderKeyError> {
    match n {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![key_between(a.as_deref(), b.as_deref())?]),
        _ => {}
    }
    match (&a, &b) {
        (_, None) => {
            let mut keys = Vec::with_capacity(n);
            let mut c = key_between(a.as_deref(), None)?;
            keys.push(c.clone());
            for _ in 1..n {
                c = key_between(Some(&c), None)?;
                keys.push(c.clone());
            }
            Ok(keys)
        }
        (None, Some(upper)) => {
            let mut keys = Vec::with_capacity(n);
            let mut c = key_between(None, Some(upper))?;
            keys.push(c.clone());
            for _ in 1..n {
                c = key_between(None, Some(&c))?;
                keys.push(c.clone());
            }
            keys.reverse();
            Ok(keys)
        }
        (Some(_), Some(_)) => {
            // Split the interval at a midpoint key and fill both halves.
            let mid = n / 2;
            let c = key_between(a.as_deref(), b.as_deref())?;
            let mut keys = n_keys_between(a, Some(c.clone()), mid)?;
            keys.push(c.clone());
            keys.extend(n_keys_between(Some(c), b, n - mid - 1)?);
            Ok(keys)
        }
    }
}
