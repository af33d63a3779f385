//! Two-lane 32-bit string hash rendered as fixed-width base-36.
//!
//! The input is consumed as UTF-16 code units so the same text always yields
//! the same digest regardless of how it was produced. The digest is not
//! cryptographic; it only gates change notification.

const LANE1_SEED: u32 = 0xdead_beef;
const LANE2_SEED: u32 = 0x41c6_ce57;

const LANE1_MUL: u32 = 2_654_435_761;
const LANE2_MUL: u32 = 1_597_334_677;
const AVALANCHE_A: u32 = 2_246_822_507;
const AVALANCHE_B: u32 = 3_266_489_909;

/// Width of one rendered lane. `u32::MAX` is `1z141z3` in base 36.
pub const LANE_WIDTH: usize = 7;

/// Total digest length in characters.
pub const DIGEST_LEN: usize = LANE_WIDTH * 2;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Hash `input` into two 32-bit lanes, returned as `(lane2, lane1)`.
#[must_use]
pub fn hash_lanes(input: &str, seed: u32) -> (u32, u32) {
    let mut h1 = LANE1_SEED ^ seed;
    let mut h2 = LANE2_SEED ^ seed;

    for unit in input.encode_utf16() {
        let ch = u32::from(unit);
        h1 = (h1 ^ ch).wrapping_mul(LANE1_MUL);
        h2 = (h2 ^ ch).wrapping_mul(LANE2_MUL);
    }

    h1 = (h1 ^ (h1 >> 16)).wrapping_mul(AVALANCHE_A);
    h1 ^= (h2 ^ (h2 >> 13)).wrapping_mul(AVALANCHE_B);
    h2 = (h2 ^ (h2 >> 16)).wrapping_mul(AVALANCHE_A);
    h2 ^= (h1 ^ (h1 >> 13)).wrapping_mul(AVALANCHE_B);

    (h2, h1)
}

/// Hash `input` and render it as a [`DIGEST_LEN`]-character digest.
#[must_use]
pub fn digest(input: &str, seed: u32) -> String {
    let (hi, lo) = hash_lanes(input, seed);
    let mut out = String::with_capacity(DIGEST_LEN);
    push_base36(&mut out, hi);
    push_base36(&mut out, lo);
    out
}

fn push_base36(out: &mut String, mut n: u32) {
    let mut buf = [b'0'; LANE_WIDTH];
    let mut i = LANE_WIDTH;
    while n > 0 {
        i -= 1;
        buf[i] = DIGITS[(n % 36) as usize];
        n /= 36;
    }
    // buf is ASCII by construction.
    out.extend(buf.iter().map(|&b| char::from(b)));
}
