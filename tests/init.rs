use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tars"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(output.status.success(), "tars init failed: {}", String::from_utf8_lossy(&output.stderr));

    let config_path = dir.path().join(".tars.toml");
    assert!(config_path.exists(), ".tars.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[memory]"));
    assert!(content.contains("[embedding]"));

    // Everything is commented out, so it parses to the defaults
    let config: tars_core::TarsConfig = toml::from_str(&content).unwrap();
    assert_eq!(config.memory.collection, "tars_memory");
    assert_eq!(config.search.rrf_k, 60);
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".tars.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tars"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join(".tars.toml")).unwrap(),
        "# existing"
    );
}

#[test]
fn stats_without_index_reports_missing() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tars"))
        .args(["stats", "--memory-dir"])
        .arg(dir.path())
        .current_dir(dir.path())
        .env_remove("TARS_MEMORY_DIR")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No memory index"), "{stdout}");
    assert!(!dir.path().join("tars.db").exists());
}

#[test]
fn search_without_memory_dir_fails() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tars"))
        .args(["search", "anything"])
        .current_dir(dir.path())
        .env_remove("TARS_MEMORY_DIR")
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No memory directory configured"));
}

#[test]
fn memory_dir_flag_combines_with_configured_database_name() {
    let dir = tempfile::tempdir().unwrap();
    let memory = dir.path().join("memory");
    std::fs::create_dir(&memory).unwrap();
    std::fs::write(dir.path().join(".tars.toml"), "[memory]\ndatabase = \"custom.db\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tars"))
        .args(["stats", "--memory-dir"])
        .arg(&memory)
        .current_dir(dir.path())
        .env_remove("TARS_MEMORY_DIR")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let expected = memory.join("custom.db");
    assert!(stdout.contains(&expected.display().to_string()), "{stdout}");
}
