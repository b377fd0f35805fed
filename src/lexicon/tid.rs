/// TID record-key generation
///
/// A TID is a 13-character base32-sortable string encoding a 64-bit value:
/// microseconds since the UNIX epoch in the high bits, a 10-bit clock
/// identifier in the low bits. Lexicographic order matches creation order,
/// so repo listings come back chronologically.
use rand::Rng;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const TID_ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";

pub const TID_LENGTH: usize = 13;

static LAST_MICROS: Mutex<u64> = Mutex::new(0);

/// Generate the next TID, strictly increasing within this process
pub fn next_tid() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let micros = {
        let mut last = LAST_MICROS.lock().unwrap_or_else(|e| e.into_inner());
        let micros = now.max(*last + 1);
        *last = micros;
        micros
    };

    let clock_id = rand::thread_rng().gen_range(0..1024u64);
    s32_encode((micros << 10) | clock_id)
}

/// Encode a 64-bit value as 13 base32-sortable characters
fn s32_encode(mut value: u64) -> String {
    let mut out = [0u8; TID_LENGTH];
    for slot in out.iter_mut().rev() {
        *slot = TID_ALPHABET[(value & 0x1f) as usize];
        value >>= 5;
    }
    // The alphabet is ASCII
    String::from_utf8(out.to_vec()).unwrap_or_default()
}
