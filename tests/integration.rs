//! End-to-end tests of the `docportal` binary with the offline hash
//! embedder and no generative backend configured.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docportal_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docportal"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha\n\nThe alpha contract sets the delivery fee at 10 euros.\n\nPayment is due in 30 days.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.txt"),
        "Beta contract.\x0cThe delivery fee is 12 euros.\x0cWarranty lasts two years.",
    )
    .unwrap();
    fs::write(files_dir.join("tool.exe"), "MZ").unwrap();
    fs::write(files_dir.join("report.docx"), minimal_docx_with_text("quarterly revenue grew")).unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{root}/data"
index_dir = "{root}/data/index"

[chunking]
chunk_size = 200
chunk_overlap = 40

[retrieval]
top_k = 3

[embedding]
provider = "hash"
dims = 64

[generation]
provider = "disabled"
"#,
        root = root.display()
    );
    let config_path = root.join("config").join("docportal.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn minimal_docx_with_text(phrase: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            phrase
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

struct Run {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

fn run_docportal(config_path: &Path, args: &[&str]) -> Run {
    let binary = docportal_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docportal binary at {:?}: {}", binary, e));

    Run {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        code: output.status.code(),
    }
}

fn error_kind(run: &Run) -> String {
    let line = run
        .stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("{\"error\""))
        .unwrap_or_else(|| panic!("no JSON error on stderr: {}", run.stderr));
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    value["error"]["kind"].as_str().unwrap().to_string()
}

fn file(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .to_string_lossy()
        .to_string()
}

#[test]
fn test_ingest_reports_session_and_counts() {
    let (_tmp, config) = setup_test_env();
    let run = run_docportal(
        &config,
        &["ingest", &file(&config, "alpha.md"), &file(&config, "beta.txt"), "--session", "s1"],
    );
    assert_eq!(run.code, Some(0), "stderr: {}", run.stderr);

    let report: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert_eq!(report["session_id"], "s1");
    assert_eq!(report["pages"], 4);
    assert!(report["chunks"].as_u64().unwrap() >= 4);
    assert!(Path::new(report["index_path"].as_str().unwrap())
        .join("manifest.json")
        .exists());
}

#[test]
fn test_ingest_docx() {
    let (_tmp, config) = setup_test_env();
    let run = run_docportal(&config, &["ingest", &file(&config, "report.docx")]);
    assert_eq!(run.code, Some(0), "stderr: {}", run.stderr);
    let report: serde_json::Value = serde_json::from_str(&run.stdout).unwrap();
    assert!(report["session_id"].as_str().unwrap().starts_with("session_"));
    assert_eq!(report["chunks"], 1);
}

#[test]
fn test_ingest_chunking_overrides() {
    let (_tmp, config) = setup_test_env();
    let alpha = file(&config, "alpha.md");

    let default = run_docportal(&config, &["ingest", &alpha]);
    assert_eq!(default.code, Some(0), "stderr: {}", default.stderr);
    let default: serde_json::Value = serde_json::from_str(&default.stdout).unwrap();

    let small = run_docportal(
        &config,
        &["ingest", &alpha, "--chunk-size", "30", "--chunk-overlap", "0"],
    );
    assert_eq!(small.code, Some(0), "stderr: {}", small.stderr);
    let small: serde_json::Value = serde_json::from_str(&small.stdout).unwrap();
    assert!(small["chunks"].as_u64().unwrap() > default["chunks"].as_u64().unwrap());

    let bad = run_docportal(
        &config,
        &["ingest", &alpha, "--chunk-size", "20", "--chunk-overlap", "20"],
    );
    assert_eq!(bad.code, Some(2));
    assert_eq!(error_kind(&bad), "input");
}

#[test]
fn test_unsupported_file_is_input_error() {
    let (_tmp, config) = setup_test_env();
    let run = run_docportal(&config, &["ingest", &file(&config, "tool.exe")]);
    assert_eq!(run.code, Some(2));
    assert_eq!(error_kind(&run), "input");
}

#[test]
fn test_chat_without_index_is_index_error() {
    let (_tmp, config) = setup_test_env();
    let run = run_docportal(&config, &["chat", "nosuch", "what changed?"]);
    assert_eq!(run.code, Some(4));
    assert_eq!(error_kind(&run), "index");
}

#[test]
fn test_invalid_session_id_is_input_error() {
    let (_tmp, config) = setup_test_env();
    let run = run_docportal(&config, &["chat", "../escape", "what changed?"]);
    assert_eq!(run.code, Some(2));
    assert_eq!(error_kind(&run), "input");
}

#[test]
fn test_chat_with_disabled_generator_is_backend_error() {
    let (_tmp, config) = setup_test_env();
    let ingest = run_docportal(&config, &["ingest", &file(&config, "alpha.md"), "--session", "s1"]);
    assert_eq!(ingest.code, Some(0), "stderr: {}", ingest.stderr);

    let run = run_docportal(&config, &["chat", "s1", "what is the delivery fee?"]);
    assert_eq!(run.code, Some(5));
    assert_eq!(error_kind(&run), "backend");
}

#[test]
fn test_analyze_with_disabled_generator_is_backend_error() {
    let (_tmp, config) = setup_test_env();
    let run = run_docportal(&config, &["analyze", &file(&config, "alpha.md")]);
    assert_eq!(run.code, Some(5));
    assert_eq!(error_kind(&run), "backend");
}

#[test]
fn test_sessions_and_cleanup() {
    let (tmp, config) = setup_test_env();
    let ingest = run_docportal(&config, &["ingest", &file(&config, "alpha.md"), "--session", "s1"]);
    assert_eq!(ingest.code, Some(0), "stderr: {}", ingest.stderr);

    let list = run_docportal(&config, &["sessions"]);
    let ids: Vec<String> = serde_json::from_str(&list.stdout).unwrap();
    assert_eq!(ids, vec!["s1"]);

    let first = run_docportal(&config, &["cleanup", "s1"]);
    assert_eq!(first.code, Some(0));
    let body: serde_json::Value = serde_json::from_str(&first.stdout).unwrap();
    assert_eq!(body["removed"], true);

    let second = run_docportal(&config, &["cleanup", "s1"]);
    assert_eq!(second.code, Some(0));
    let body: serde_json::Value = serde_json::from_str(&second.stdout).unwrap();
    assert_eq!(body["removed"], false);

    // The index outlives the session's working directory.
    assert!(tmp.path().join("data/index/s1/manifest.json").exists());
    let list = run_docportal(&config, &["sessions"]);
    let ids: Vec<String> = serde_json::from_str(&list.stdout).unwrap();
    assert!(ids.is_empty());
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let output = Command::new(docportal_binary())
        .current_dir(tmp.path())
        .args(["--config", "does-not-exist.toml", "sessions"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let ids: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert!(ids.is_empty());
}
