extern crate assert_cmd;
extern crate image;
extern crate predicates;
extern crate tempfile;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;

const CLASSIC: [&str; 7] = ["100", "-2", "1", "-1", "1", "80", "80"];

fn decode(path: &Path) -> (u32, u32, Vec<u8>) {
    let img = image::open(path).unwrap().to_rgb();
    let (width, height) = img.dimensions();
    (width, height, img.into_raw())
}

fn pixel(raw: &[u8], width: u32, x: u32, y: u32) -> &[u8] {
    let at = ((y * width + x) * 3) as usize;
    &raw[at..at + 3]
}

#[test]
fn renders_the_classic_view() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("classic.png");
    Command::cargo_bin("mandel")
        .unwrap()
        .arg(&out)
        .args(&CLASSIC)
        .arg("--threads")
        .arg("3")
        .assert()
        .success();

    let (width, height, raw) = decode(&out);
    assert_eq!((width, height), (80, 80));
    // Grid row 40 (imaginary 0) lands on image row 39 after the flip.
    assert_eq!(pixel(&raw, width, 40, 39), &[0, 0, 0]);
    // Column 79 is real 0.9625, which escapes after 3 iterations.
    assert_eq!(pixel(&raw, width, 79, 39), &[48, 0, 0]);
}

#[test]
fn cluster_and_threads_agree() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared.png");
    let cluster = dir.path().join("cluster.png");
    let view = ["250", "-0.8", "-0.7", "0.05", "0.15", "43", "37"];

    Command::cargo_bin("mandel")
        .unwrap()
        .arg(&shared)
        .args(&view)
        .assert()
        .success();
    Command::cargo_bin("mandel-cluster")
        .unwrap()
        .args(&["-p", "4", "-t", "2"])
        .arg(&cluster)
        .args(&view)
        .assert()
        .success();

    assert_eq!(decode(&shared), decode(&cluster));
}

#[test]
fn tcp_cluster_writes_the_same_image() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared.png");
    let cluster = dir.path().join("cluster.png");
    let view = ["120", "-2", "1", "-1", "1", "50", "31"];

    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let addr = format!("127.0.0.1:{}", port);

    let workers: Vec<_> = (1..3)
        .map(|rank: usize| {
            let rank = rank.to_string();
            Command::cargo_bin("mandel-cluster")
                .unwrap()
                .args(&["-p", "3", "-c", addr.as_str(), "-r", rank.as_str()])
                .arg(dir.path().join("ignored.png"))
                .args(&view)
                .spawn()
                .unwrap()
        })
        .collect();
    Command::cargo_bin("mandel-cluster")
        .unwrap()
        .args(&["-p", "3", "-c", addr.as_str(), "-r", "0"])
        .arg(&cluster)
        .args(&view)
        .assert()
        .success();
    for mut worker in workers {
        assert!(worker.wait().unwrap().success());
    }
    assert!(!dir.path().join("ignored.png").exists());

    Command::cargo_bin("mandel")
        .unwrap()
        .arg(&shared)
        .args(&view)
        .assert()
        .success();
    assert_eq!(decode(&shared), decode(&cluster));
}

#[test]
fn missing_arguments_fail() {
    Command::cargo_bin("mandel")
        .unwrap()
        .args(&["out.png", "100", "-2"])
        .assert()
        .failure();
}

#[test]
fn inverted_region_fails_before_rendering() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("never.png");
    Command::cargo_bin("mandel")
        .unwrap()
        .arg(&out)
        .args(&["100", "1", "-2", "-1", "1", "8", "8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Render failure"));
    assert!(!out.exists());
}

#[test]
fn unwritable_output_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("no-such-dir").join("out.png");
    Command::cargo_bin("mandel")
        .unwrap()
        .arg(&out)
        .args(&CLASSIC)
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not write"));
}

#[test]
fn silent_worker_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("never.png");
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    Command::cargo_bin("mandel-cluster")
        .unwrap()
        .args(&["-p", "2", "--timeout", "1", "-r", "0", "-c"])
        .arg(format!("127.0.0.1:{}", port))
        .arg(&out)
        .args(&CLASSIC)
        .assert()
        .failure()
        .stderr(predicate::str::contains("rank 1 sent nothing"));
    assert!(!out.exists());
}
