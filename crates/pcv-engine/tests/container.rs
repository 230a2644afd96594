//! Container-level scenarios: damage recovery, keyfile handling,
//! deniability, and the error taxonomy.

use secrecy::SecretString;
use sha3::{Digest, Sha3_256};

use pcv_engine::{
    header_size, Engine, EngineError, EngineResult, MasterKey, Seeds, Settings, SALT_SIZE,
};

fn stub_argon(password: &[u8], salt: &[u8; SALT_SIZE]) -> EngineResult<MasterKey> {
    let mut h = Sha3_256::new();
    h.update(password);
    h.update(salt);
    Ok(MasterKey::from_bytes(h.finalize().into()))
}

fn test_engine() -> Engine {
    Engine::with_kdf(stub_argon)
}

fn fixed_seeds() -> Seeds {
    Seeds {
        salt: [0xa1; 16],
        hkdf_salt: [0xa2; 32],
        serpent_iv: [0xa3; 16],
        nonce: [0xa4; 24],
        deny_salt: [0xa5; 16],
        deny_nonce: [0xa6; 24],
    }
}

fn encrypt_container(
    plaintext: &[u8],
    password: &str,
    keyfiles: &mut [&mut dyn std::io::Read],
    settings: &Settings,
) -> Vec<u8> {
    let mut body = Vec::new();
    let header = test_engine()
        .encrypt_with_seeds(
            &mut &plaintext[..],
            &mut body,
            &SecretString::from(password),
            keyfiles,
            settings,
            &fixed_seeds(),
        )
        .expect("encrypt");
    let mut container = header;
    container.extend_from_slice(&body);
    container
}

fn decrypt(
    container: &[u8],
    password: &str,
    keyfiles: &mut [&mut dyn std::io::Read],
    keep_corrupted: bool,
) -> EngineResult<(Vec<u8>, bool)> {
    let mut plaintext = Vec::new();
    let damaged = test_engine().decrypt(
        &mut &container[..],
        &mut plaintext,
        &SecretString::from(password),
        keyfiles,
        keep_corrupted,
    )?;
    Ok((plaintext, damaged))
}

// ── Reed-Solomon damage recovery ───────────────────────────────────────────

#[test]
fn flipped_body_byte_is_repaired_under_rs() {
    let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    let settings = Settings {
        reed_solomon: true,
        ..Settings::default()
    };
    let mut container = encrypt_container(&data, "password", &mut [], &settings);

    // Offset 1000 lands inside the RS-coded body (header is 789 bytes).
    container[1000] = container[1000].wrapping_add(1);

    let (restored, damaged) = decrypt(&container, "password", &mut [], false).unwrap();
    assert_eq!(restored, data);
    assert!(damaged);
}

#[test]
fn heavy_body_damage_without_keep_fails() {
    let data = vec![0x77u8; 2000];
    let settings = Settings {
        reed_solomon: true,
        ..Settings::default()
    };
    let mut container = encrypt_container(&data, "password", &mut [], &settings);

    // More errors in one frame than 8 parity bytes can fix.
    for i in 0..20 {
        container[900 + i] ^= 0x3c;
    }
    assert!(matches!(
        decrypt(&container, "password", &mut [], false),
        Err(EngineError::BodyCorrupted)
    ));
}

#[test]
fn keep_corrupted_yields_best_effort_plaintext() {
    let data = vec![0x77u8; 2000];
    let settings = Settings {
        reed_solomon: true,
        ..Settings::default()
    };
    let mut container = encrypt_container(&data, "password", &mut [], &settings);
    for i in 0..20 {
        container[900 + i] ^= 0x3c;
    }

    let mut plaintext = Vec::new();
    let err = test_engine()
        .decrypt(
            &mut &container[..],
            &mut plaintext,
            &SecretString::from("password"),
            &mut [],
            true,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::BodyCorrupted));
    // Everything outside the trashed frame decrypted correctly.
    assert_eq!(plaintext.len(), data.len());
    assert_eq!(plaintext[256..], data[256..]);
}

#[test]
fn tampered_body_without_rs_is_body_corrupted() {
    let data = b"authenticated bytes".to_vec();
    let mut container = encrypt_container(&data, "password", &mut [], &Settings::default());
    let last = container.len() - 1;
    container[last] ^= 0x01;
    assert!(matches!(
        decrypt(&container, "password", &mut [], false),
        Err(EngineError::BodyCorrupted)
    ));
}

// ── Keyfiles ───────────────────────────────────────────────────────────────

#[test]
fn ordered_keyfiles_reject_swapped_order() {
    let settings = Settings {
        paranoid: true,
        ordered_keyfiles: true,
        ..Settings::default()
    };
    let (mut kf1, mut kf2) = (&b"first keyfile"[..], &b"second keyfile"[..]);
    let container = encrypt_container(b"hello", "password", &mut [&mut kf1, &mut kf2], &settings);

    let (mut kf1, mut kf2) = (&b"first keyfile"[..], &b"second keyfile"[..]);
    let (restored, _) = decrypt(&container, "password", &mut [&mut kf1, &mut kf2], false).unwrap();
    assert_eq!(restored, b"hello");

    let (mut kf1, mut kf2) = (&b"first keyfile"[..], &b"second keyfile"[..]);
    assert!(matches!(
        decrypt(&container, "password", &mut [&mut kf2, &mut kf1], false),
        Err(EngineError::IncorrectOrMisorderedKeyfiles)
    ));
}

#[test]
fn unordered_keyfiles_accept_any_order() {
    let settings = Settings::default();
    let (mut kf1, mut kf2) = (&b"alpha"[..], &b"beta"[..]);
    let container = encrypt_container(b"hello", "password", &mut [&mut kf1, &mut kf2], &settings);

    let (mut kf1, mut kf2) = (&b"alpha"[..], &b"beta"[..]);
    let (restored, _) = decrypt(&container, "password", &mut [&mut kf2, &mut kf1], false).unwrap();
    assert_eq!(restored, b"hello");
}

#[test]
fn wrong_keyfile_set_is_rejected() {
    let settings = Settings::default();
    let mut kf = &b"the real keyfile"[..];
    let container = encrypt_container(b"hello", "password", &mut [&mut kf], &settings);

    let mut wrong = &b"some other keyfile"[..];
    assert!(matches!(
        decrypt(&container, "password", &mut [&mut wrong], false),
        Err(EngineError::IncorrectKeyfiles)
    ));
}

#[test]
fn keyfile_presence_must_match_header() {
    let mut kf = &b"keyfile"[..];
    let with_kf = encrypt_container(b"x", "password", &mut [&mut kf], &Settings::default());
    assert!(matches!(
        decrypt(&with_kf, "password", &mut [], false),
        Err(EngineError::KeyfilesRequired)
    ));

    let without_kf = encrypt_container(b"x", "password", &mut [], &Settings::default());
    let mut kf = &b"keyfile"[..];
    assert!(matches!(
        decrypt(&without_kf, "password", &mut [&mut kf], false),
        Err(EngineError::KeyfilesNotRequired)
    ));
}

#[test]
fn duplicate_unordered_keyfiles_are_rejected_at_encrypt() {
    let (mut kf1, mut kf2) = (&b"same"[..], &b"same"[..]);
    let err = test_engine()
        .encrypt(
            &mut &b"data"[..],
            &mut Vec::new(),
            &SecretString::from("password"),
            &mut [&mut kf1, &mut kf2],
            &Settings::default(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateKeyfiles));
}

// ── Deniability ────────────────────────────────────────────────────────────

#[test]
fn deniability_hides_the_version_magic() {
    let settings = Settings {
        deniability: true,
        ..Settings::default()
    };
    let container = encrypt_container(b"secret", "password", &mut [], &settings);
    assert_ne!(&container[40..45], b"v1.48");

    let plain = encrypt_container(b"secret", "password", &mut [], &Settings::default());
    assert_eq!(&plain[..5], &pcv_engine::FORMAT_VERSION.as_bytes()[..]);

    let (restored, damaged) = decrypt(&container, "password", &mut [], false).unwrap();
    assert_eq!(restored, b"secret");
    assert!(!damaged);
}

#[test]
fn read_settings_reports_deniability_for_short_prefix() {
    let settings = Settings {
        deniability: true,
        ..Settings::default()
    };
    let container = encrypt_container(b"secret", "password", &mut [], &settings);

    let reported = test_engine()
        .read_settings(&mut &container[..40])
        .unwrap();
    assert!(reported.deniability);
}

#[test]
fn read_settings_reports_plain_container_settings() {
    let settings = Settings {
        comments: "plaintext comment".into(),
        reed_solomon: true,
        paranoid: true,
        ..Settings::default()
    };
    let container = encrypt_container(b"secret", "password", &mut [], &settings);

    let reported = test_engine().read_settings(&mut &container[..]).unwrap();
    assert_eq!(reported, settings);
}

#[test]
fn deniability_roundtrips_with_all_layers() {
    let settings = Settings {
        comments: "covered by the wrap".into(),
        reed_solomon: true,
        paranoid: true,
        deniability: true,
        ..Settings::default()
    };
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
    let container = encrypt_container(&data, "password", &mut [], &settings);
    assert_eq!(
        container.len(),
        header_size(&settings) + (data.len() + 128 - data.len() % 128) / 128 * 136
    );

    let (restored, damaged) = decrypt(&container, "password", &mut [], false).unwrap();
    assert_eq!(restored, data);
    assert!(!damaged);
}

// ── Header damage ──────────────────────────────────────────────────────────

#[test]
fn header_field_damage_within_radius_still_decrypts() {
    let data = b"survives header bit-rot".to_vec();
    let mut container = encrypt_container(&data, "password", &mut [], &Settings::default());

    // Two byte errors inside the salt codeword (offsets 45..93).
    container[50] ^= 0xff;
    container[70] ^= 0x55;

    let (restored, damaged) = decrypt(&container, "password", &mut [], false).unwrap();
    assert_eq!(restored, data);
    assert!(!damaged);
}

#[test]
fn destroyed_header_field_is_header_corrupted() {
    let data = b"too much header damage".to_vec();
    let mut container = encrypt_container(&data, "password", &mut [], &Settings::default());
    for b in &mut container[45..93] {
        *b = !*b;
    }
    assert!(matches!(
        decrypt(&container, "password", &mut [], false),
        Err(EngineError::HeaderCorrupted)
    ));
}

// ── Error taxonomy ─────────────────────────────────────────────────────────

#[test]
fn short_input_is_file_too_short() {
    for len in [0usize, 10, 500, 788] {
        let junk = vec![0x42u8; len];
        assert!(
            matches!(
                decrypt(&junk, "password", &mut [], false),
                Err(EngineError::FileTooShort)
            ),
            "len {len}"
        );
    }
}

#[test]
fn random_long_input_is_header_corrupted() {
    let junk: Vec<u8> = (0..1000u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    assert!(matches!(
        decrypt(&junk, "password", &mut [], false),
        Err(EngineError::HeaderCorrupted)
    ));
}

#[test]
fn wrong_password_is_detected_before_any_output() {
    let container = encrypt_container(b"data", "password", &mut [], &Settings::default());
    let mut plaintext = Vec::new();
    let err = test_engine()
        .decrypt(
            &mut &container[..],
            &mut plaintext,
            &SecretString::from("wrong-password"),
            &mut [],
            false,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::IncorrectPassword));
    assert!(plaintext.is_empty());
}

#[test]
fn oversized_comments_are_rejected() {
    let settings = Settings {
        comments: "c".repeat(pcv_engine::MAX_COMMENTS_LEN + 1),
        ..Settings::default()
    };
    let err = test_engine()
        .encrypt(
            &mut &b""[..],
            &mut Vec::new(),
            &SecretString::from("password"),
            &mut [],
            &settings,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::CommentsTooLong));
}

#[test]
fn truncated_body_is_body_corrupted() {
    let data = vec![1u8; 500];
    let settings = Settings {
        reed_solomon: true,
        ..Settings::default()
    };
    let container = encrypt_container(&data, "password", &mut [], &settings);
    let truncated = &container[..container.len() - 50];
    assert!(matches!(
        decrypt(truncated, "password", &mut [], false),
        Err(EngineError::BodyCorrupted)
    ));
}
