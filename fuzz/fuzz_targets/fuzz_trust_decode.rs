#![no_main]

//! Fuzz target for certificate and key decoding.
//!
//! The input is split in three: CA certificate, own certificate and
//! private key. Each part is tried both raw and wrapped as PEM. Decoding
//! must never panic, and anything accepted keeps every part it was given.

use libfuzzer_sys::fuzz_target;

use tlswrap::TrustMaterial;

fn split(data: &[u8]) -> (&[u8], &[u8], &[u8]) {
    if data.len() < 2 {
        return (data, &[], &[]);
    }
    let a = data[0] as usize % data.len();
    let b = data[1] as usize % data.len();
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    (&data[..lo], &data[lo..hi], &data[hi..])
}

fn pem(label: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!("-----BEGIN {label}-----\n").into_bytes();
    out.extend_from_slice(body);
    out.extend_from_slice(format!("\n-----END {label}-----\n").as_bytes());
    out
}

fuzz_target!(|data: &[u8]| {
    let (ca, cert, key) = split(data);

    if let Ok(trust) = TrustMaterial::decode(Some(ca), Some(cert), Some(key)) {
        assert!(trust.has_identity());
        assert!(trust.ca_der().is_some());
    }

    let _ = TrustMaterial::decode(Some(ca), None, None);
    let _ = TrustMaterial::decode(None, Some(cert), None);

    let cert_pem = pem("CERTIFICATE", cert);
    let key_pem = pem("PRIVATE KEY", key);
    let _ = TrustMaterial::decode(None, Some(&cert_pem), Some(&key_pem));
});
