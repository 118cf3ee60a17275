//! History database naming
//!
//! One database per `(device identity, destination, protocol)` triple,
//! named by a stable hash so re-runs land on the same file and devices
//! never collide.

use sha2::{Digest, Sha256};

use quillsync_core::devices::Protocol;

/// File name for the history database of this sync pairing.
pub fn database_name(protocol: Protocol, ids: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
    }
    hasher.update(protocol.tag().as_bytes());
    format!("{}.db", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_stable() {
        let a = database_name(Protocol::Usb, &["SERIAL1", "documents/mybooks"]);
        let b = database_name(Protocol::Usb, &["SERIAL1", "documents/mybooks"]);
        assert_eq!(a, b);
        assert!(a.ends_with(".db"));
        assert_eq!(a.len(), 64 + 3);
    }

    #[test]
    fn name_depends_on_every_input() {
        let base = database_name(Protocol::Usb, &["SERIAL1", "documents/mybooks"]);
        assert_ne!(base, database_name(Protocol::Usb, &["SERIAL2", "documents/mybooks"]));
        assert_ne!(base, database_name(Protocol::Usb, &["SERIAL1", "documents/other"]));
        assert_ne!(base, database_name(Protocol::Mtp, &["SERIAL1", "documents/mybooks"]));
    }
}
