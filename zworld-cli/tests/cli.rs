//! End-to-end runs of the zworld-fixer binary on small synthetic files.

use std::ffi::OsStr;
use std::fs;
use std::process::{Command, Output};

fn fixer<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_zworld-fixer"))
        .args(args)
        .output()
        .expect("failed to run zworld-fixer")
}

/// Room header at 0 with one actor list: an excluded id (0x0001) then a
/// supported one (0x0009).
fn room_file() -> Vec<u8> {
    let mut data = vec![0u8; 0x60];
    data[0x00] = 0x01;
    data[0x01] = 2;
    data[0x04..0x08].copy_from_slice(&[0x03, 0x00, 0x00, 0x20]);
    data[0x08] = 0x14;
    data[0x20..0x22].copy_from_slice(&[0x00, 0x01]);
    data[0x22..0x30].fill(0x11);
    data[0x30..0x32].copy_from_slice(&[0x00, 0x09]);
    data[0x32..0x40].fill(0x22);
    data
}

#[test]
fn patches_room_into_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("room_0.zmap");
    let output = dir.path().join("room_0.fixed.zmap");
    fs::write(&input, room_file()).unwrap();

    let result = fixer([&input, &output]);
    assert!(result.status.success(), "{}", String::from_utf8_lossy(&result.stderr));

    let fixed = fs::read(&output).unwrap();
    assert_eq!(fixed.len(), 0x60);
    assert_eq!(fixed[0x01], 1);
    assert_eq!(&fixed[0x20..0x22], &[0x00, 0x09]);
    assert!(fixed[0x22..0x30].iter().all(|b| *b == 0x22));
    assert!(fixed[0x30..0x40].iter().all(|b| *b == 0));

    // The input is left alone when an output path is given.
    assert_eq!(fs::read(&input).unwrap(), room_file());
}

#[test]
fn overwrites_input_without_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("room_0.zmap");
    fs::write(&input, room_file()).unwrap();

    let result = fixer([&input]);
    assert!(result.status.success());
    assert_eq!(fs::read(&input).unwrap()[0x01], 1);
}

#[test]
fn missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let result = fixer([dir.path().join("nope.zscene")]);

    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("Error:"));
}

#[test]
fn bad_profile_fails_before_touching_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("room_0.zmap");
    let profile = dir.path().join("profile.json");
    fs::write(&input, room_file()).unwrap();
    fs::write(&profile, "{ not json").unwrap();

    let result = Command::new(env!("CARGO_BIN_EXE_zworld-fixer"))
        .arg(&input)
        .arg("--profile")
        .arg(&profile)
        .output()
        .unwrap();

    assert!(!result.status.success());
    assert_eq!(fs::read(&input).unwrap(), room_file());
}
