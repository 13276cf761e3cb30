//! License key generation in the `XXXX-XXXX-XXXX-XXXX` format.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const GROUPS: usize = 4;
const GROUP_LEN: usize = 4;

/// Generate a random key: four groups of four uppercase letters or digits.
pub fn generate_license_key() -> String {
    let mut rng = rand::thread_rng();
    let mut key = String::with_capacity(GROUPS * GROUP_LEN + GROUPS - 1);
    for group in 0..GROUPS {
        if group > 0 {
            key.push('-');
        }
        for _ in 0..GROUP_LEN {
            key.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
    }
    key
}

/// Whether `key` has the generated shape. Operator-supplied keys need not match.
pub fn is_generated_format(key: &str) -> bool {
    let groups: Vec<&str> = key.split('-').collect();
    groups.len() == GROUPS
        && groups
            .iter()
            .all(|g| g.len() == GROUP_LEN && g.bytes().all(|b| ALPHABET.contains(&b)))
}
