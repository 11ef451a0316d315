use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn streamarch() -> Command {
    Command::cargo_bin("streamarch").unwrap()
}

#[test]
fn test_cli_create_list_extract_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a small tree with a nested and an empty file
    let source_dir = tempdir()?;
    let root = source_dir.path().join("project");
    fs::create_dir_all(root.join("nested"))?;
    fs::write(root.join("file1.txt"), "Hello, this is the first file.\n")?;
    fs::write(root.join("nested/nested_file.dat"), [0u8, 1, 2, 3, 4, 5])?;
    fs::write(root.join("nested/empty"), b"")?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("project.sarc");

    // 2. Create archive
    streamarch()
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg("--block-size")
        .arg("3")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(archive_path.exists());

    // 3. List contents of the archive
    streamarch()
        .arg("list")
        .arg("-i")
        .arg(&archive_path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("31\tproject/file1.txt")
                .and(predicate::str::contains("6\tproject/nested/nested_file.dat"))
                .and(predicate::str::contains("0\tproject/nested/empty")),
        );

    // 4. Extract archive to a new directory
    let extract_dir = tempdir()?;
    streamarch()
        .arg("x")
        .arg("-i")
        .arg(&archive_path)
        .arg("-C")
        .arg(extract_dir.path())
        .assert()
        .success();

    // 5. Verify extracted files
    for rel in ["file1.txt", "nested/nested_file.dat", "nested/empty"] {
        let extracted = fs::read(extract_dir.path().join("project").join(rel))?;
        assert_eq!(extracted, fs::read(root.join(rel))?, "{rel}");
    }
    Ok(())
}

#[test]
fn create_pipes_into_extract() -> Result<(), Box<dyn std::error::Error>> {
    let source_dir = tempdir()?;
    let root = source_dir.path().join("piped");
    fs::create_dir_all(root.join("a/b"))?;
    fs::write(root.join("a/b/data.bin"), vec![42u8; 100_000])?;

    let created = streamarch().arg("c").arg(&root).output()?;
    assert!(created.status.success());
    assert!(!created.stdout.is_empty());

    let extract_dir = tempdir()?;
    streamarch()
        .arg("extract")
        .arg("-C")
        .arg(extract_dir.path())
        .write_stdin(created.stdout)
        .assert()
        .success();

    assert_eq!(fs::read(extract_dir.path().join("piped/a/b/data.bin"))?, vec![42u8; 100_000]);
    Ok(())
}

#[test]
fn corrupt_stream_fails_with_message() {
    let extract_dir = tempdir().unwrap();
    // Path "f" followed by an undefined kind byte.
    streamarch()
        .arg("extract")
        .arg("-C")
        .arg(extract_dir.path())
        .write_stdin(vec![0u8, 1, b'f', 9])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:").and(predicate::str::contains("0x09")));
}

#[test]
fn missing_input_directory_fails() {
    let dir = tempdir().unwrap();
    streamarch()
        .arg("create")
        .arg(dir.path().join("does-not-exist"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist"));
}

#[test]
fn zero_block_size_is_a_usage_error() {
    streamarch().args(["create", "--block-size", "0", "."]).assert().failure().code(2);
}
