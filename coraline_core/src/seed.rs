use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of a generated session seed.
pub const SEED_LEN: usize = 16;

/// Draws a fresh alphanumeric session seed from the thread-local CSPRNG.
///
/// Called once when a session starts without a caller-supplied seed.
pub fn generate() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SEED_LEN)
        .map(char::from)
        .collect()
}

/// Lower-case hex encoding of the seed's bytes, used in file names.
pub fn hex(seed: &str) -> String {
    seed.bytes().map(|b| format!("{b:02x}")).collect()
}
