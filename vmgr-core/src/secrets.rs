//! Secret generation for provisioned VMs.

use rand::prelude::*;

/// Generate a random password.
///
/// With `special` false the password stays alphanumeric, which keeps it
/// safe to pass through boot scripts and cloud-init without quoting.
pub fn generate_password(length: usize, special: bool) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                            abcdefghijklmnopqrstuvwxyz\
                            0123456789";
    const SPECIAL: &[u8] = b"!@#$%&*-_=+";

    let pool: Vec<u8> = if special {
        CHARSET.iter().chain(SPECIAL.iter()).copied().collect()
    } else {
        CHARSET.to_vec()
    };

    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..pool.len());
            pool[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_length() {
        assert_eq!(generate_password(16, false).len(), 16);
        assert_eq!(generate_password(32, true).len(), 32);
    }

    #[test]
    fn no_special_stays_alphanumeric() {
        let password = generate_password(64, false);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
