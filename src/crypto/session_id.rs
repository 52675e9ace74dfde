use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes behind every session id.
pub const SESSION_ID_ENTROPY: usize = 32;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generates a new session id: 32 random bytes, base32 encoded without padding.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_ENTROPY];
    OsRng.fill_bytes(&mut bytes);
    base32_nopad(&bytes)
}

/// RFC 4648 base32 with the trailing `=` padding stripped.
fn base32_nopad(input: &[u8]) -> String {
    let mut out = String::with_capacity((input.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0u8;

    for &byte in input {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[usize::from((buffer >> bits) & 0x1f)] as char);
        }
    }

    if bits > 0 {
        out.push(BASE32_ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }

    out
}
