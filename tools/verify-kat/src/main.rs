//! Known-answer checker for the session key schedule.
//!
//! Recomputes session id, encryption key, and MAC key from an HPKE exporter
//! secret — independently of sage-core, straight from the KDF crates — and
//! compares against the expectations in a JSON vector file. With no
//! `expected` block the tool prints the derived values, which is how vector
//! files get minted in the first place.

use aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use hkdf::Hkdf;
use serde::Deserialize;
use sha2::Sha256;

const SESSION_ID_INFO: &[u8] = b"sage/hpke v1";
const ENC_KEY_INFO: &[u8] = b"sage/session enc v1";
const MAC_KEY_INFO: &[u8] = b"sage/session mac v1";

#[derive(Deserialize)]
struct Kat {
    /// 32-byte HPKE exporter secret, hex.
    exporter_hex: String,
    #[serde(default)]
    expected: Option<Expected>,
    /// Optional AEAD probe sealed initiator→responder at counter 0.
    #[serde(default)]
    probe: Option<Probe>,
}

#[derive(Deserialize)]
struct Expected {
    session_id: String,
    enc_key_hex: String,
    mac_key_hex: String,
}

#[derive(Deserialize)]
struct Probe {
    plaintext_utf8: String,
    ciphertext_hex: String,
}

struct Derived {
    session_id: String,
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

fn derive(exporter: &[u8]) -> anyhow::Result<Derived> {
    let hk = Hkdf::<Sha256>::new(Some(b""), exporter);
    let mut id = [0u8; 16];
    hk.expand(SESSION_ID_INFO, &mut id)
        .map_err(|e| anyhow::anyhow!("session id expand: {e}"))?;

    let hk = Hkdf::<Sha256>::from_prk(exporter)
        .map_err(|e| anyhow::anyhow!("exporter is not a valid PRK: {e}"))?;
    let mut enc_key = [0u8; 32];
    hk.expand(ENC_KEY_INFO, &mut enc_key)
        .map_err(|e| anyhow::anyhow!("enc key expand: {e}"))?;
    let mut mac_key = [0u8; 32];
    hk.expand(MAC_KEY_INFO, &mut mac_key)
        .map_err(|e| anyhow::anyhow!("mac key expand: {e}"))?;

    Ok(Derived { session_id: hex::encode(id), enc_key, mac_key })
}

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: verify-kat file.json"))?;
    let data = std::fs::read_to_string(path)?;
    let kat: Kat = serde_json::from_str(&data)?;

    let exporter = hex::decode(&kat.exporter_hex)?;
    anyhow::ensure!(exporter.len() == 32, "exporter must be 32 bytes");
    let derived = derive(&exporter)?;

    let Some(expected) = &kat.expected else {
        println!("session_id: {}", derived.session_id);
        println!("enc_key_hex: {}", hex::encode(derived.enc_key));
        println!("mac_key_hex: {}", hex::encode(derived.mac_key));
        return Ok(());
    };

    anyhow::ensure!(
        derived.session_id == expected.session_id,
        "session id mismatch: derived {}, expected {}",
        derived.session_id,
        expected.session_id
    );
    anyhow::ensure!(
        hex::encode(derived.enc_key) == expected.enc_key_hex,
        "enc key mismatch"
    );
    anyhow::ensure!(
        hex::encode(derived.mac_key) == expected.mac_key_hex,
        "mac key mismatch"
    );
    println!("key schedule OK");

    if let Some(probe) = &kat.probe {
        // Initiator-to-responder nonce at counter 0: 0x01 ‖ 11 zero bytes.
        let mut nonce = [0u8; 12];
        nonce[0] = 0x01;
        let cipher = ChaCha20Poly1305::new_from_slice(&derived.enc_key)
            .map_err(|e| anyhow::anyhow!("AEAD key: {e}"))?;
        let ct = cipher
            .encrypt(
                chacha20poly1305::Nonce::from_slice(&nonce),
                Payload {
                    msg: probe.plaintext_utf8.as_bytes(),
                    aad: derived.session_id.as_bytes(),
                },
            )
            .map_err(|e| anyhow::anyhow!("AEAD seal: {e}"))?;
        anyhow::ensure!(hex::encode(&ct) == probe.ciphertext_hex, "probe ciphertext mismatch");
        println!("probe OK");
    }

    Ok(())
}
