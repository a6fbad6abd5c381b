use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docvec_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docvec");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::create_dir_all(files_dir.join(".git")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha\n\nThe alpha team shipped the release on Monday.\n\nNext review is in two weeks.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.TXT"),
        "Beta notes. Budget approved for three new hires.",
    )
    .unwrap();
    fs::write(
        files_dir.join("nested").join("gamma.txt"),
        "Gamma plain text file about Kubernetes and Docker.",
    )
    .unwrap();
    fs::write(files_dir.join("ignored.csv"), "a,b,c").unwrap();
    fs::write(files_dir.join(".git").join("HEAD.txt"), "ref: main").unwrap();

    let config_content = format!(
        r#"[index]
name = "notes"

[chunking]
chunk_size = 200
chunk_overlap = 20

[ingest]
folder = "{}/files"
"#,
        root.display()
    );
    let config_path = config_dir.join("docvec.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docvec(root: &Path, config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(docvec_binary())
        .current_dir(root)
        .env_remove("OPENAI_API_KEY")
        .env_remove("PINECONE_API_KEY")
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run docvec binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_chunk_prints_chunks_and_ids() {
    let (tmp, config) = setup_test_env();
    let file = tmp.path().join("files").join("alpha.md");

    let (stdout, stderr, ok) = run_docvec(tmp.path(), &config, &["chunk", file.to_str().unwrap()]);
    assert!(ok, "chunk failed: {}", stderr);
    assert!(stdout.contains("alpha.md: 1 chunk(s)"));
    assert!(stdout.contains("--- chunk 0 ("));
    assert!(stdout.contains("id=alpha_0_"));
    assert!(stdout.contains("The alpha team shipped the release on Monday."));
}

#[test]
fn test_chunk_works_without_config_file() {
    let (tmp, _) = setup_test_env();
    let file = tmp.path().join("files").join("beta.TXT");
    let missing = tmp.path().join("config").join("absent.toml");

    let (stdout, stderr, ok) = run_docvec(tmp.path(), &missing, &["chunk", file.to_str().unwrap()]);
    assert!(ok, "chunk failed: {}", stderr);
    assert!(stdout.contains("beta.TXT: 1 chunk(s)"));
}

#[test]
fn test_ingest_dry_run_reports_plan() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_docvec(tmp.path(), &config, &["ingest", "--dry-run"]);
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("  files found: 3\n"));
    assert!(stdout.contains("  files processed: 3\n"));
    assert!(stdout.contains("  chunks created: 3\n"));
    assert!(stdout.contains("  chunks uploaded: 0\n"));
    assert!(stdout.contains("  sample ids:"));
}

#[test]
fn test_ingest_dry_run_folder_override() {
    let (tmp, config) = setup_test_env();
    let nested = tmp.path().join("files").join("nested");

    let (stdout, stderr, ok) = run_docvec(
        tmp.path(),
        &config,
        &["ingest", "--dry-run", "--folder", nested.to_str().unwrap()],
    );
    assert!(ok, "dry run failed: {}", stderr);
    assert!(stdout.contains("  files found: 1\n"));
    assert!(stdout.contains("    gamma_0_"));
}

#[test]
fn test_ingest_empty_folder() {
    let (tmp, config) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    let (stdout, _, ok) = run_docvec(
        tmp.path(),
        &config,
        &["ingest", "--dry-run", "--folder", empty.to_str().unwrap()],
    );
    assert!(ok);
    assert!(stdout.contains("No supported files found"));
}

#[test]
fn test_ask_without_api_key_fails() {
    let (tmp, config) = setup_test_env();

    let (_, stderr, ok) = run_docvec(tmp.path(), &config, &["ask", "When was the release?"]);
    assert!(!ok);
    assert!(stderr.contains("OPENAI_API_KEY environment variable not set"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, config) = setup_test_env();
    fs::write(
        &config,
        "[index]\nname = \"notes\"\n\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .unwrap();

    let (_, stderr, ok) = run_docvec(tmp.path(), &config, &["search", "release"]);
    assert!(!ok);
    assert!(stderr.contains("chunk_overlap"));
}
