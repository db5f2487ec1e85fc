use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const CONNECTION_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const CONNECTION_ID_LEN: usize = 20;

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Random URL-safe connection id
pub fn generate_connection_id() -> String {
    let mut rng = rand::thread_rng();
    (0..CONNECTION_ID_LEN)
        .map(|_| {
            let index = rng.gen_range(0..CONNECTION_ID_ALPHABET.len());
            CONNECTION_ID_ALPHABET[index] as char
        })
        .collect()
}
