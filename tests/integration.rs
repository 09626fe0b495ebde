use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn grants_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("grants");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let feeds_dir = root.join("feeds");
    fs::create_dir_all(&feeds_dir).unwrap();
    fs::write(
        feeds_dir.join("city.xml"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>City of Syracuse Notices</title>
    <item>
      <title>Syracuse Home Repair Grant</title>
      <link>https://www.syr.gov/repair</link>
      <guid>city-repair-2026</guid>
      <description>Housing grants up to $20,000 for Syracuse homeowners. Call (315) 448-8000.</description>
    </item>
    <item>
      <title>Parks Summer Schedule</title>
      <link>https://www.syr.gov/parks</link>
      <description>Pool hours for July.</description>
    </item>
  </channel>
</rss>"#,
    )
    .unwrap();
    fs::write(
        feeds_dir.join("county.json"),
        r#"[
  {"id": "oc-1", "title": "Onondaga County Weatherization Assistance",
   "agency": "Onondaga County", "email": "weather@ongov.net",
   "description": "Insulation and furnace help for income-eligible households."}
]"#,
    )
    .unwrap();
    fs::write(
        feeds_dir.join("notes.txt"),
        "not a feed and not matched by the include globs",
    )
    .unwrap();

    fs::write(
        root.join("programs.json"),
        r#"[
  {"program_key": "syracuse_home_repair", "name": "Syracuse Home Repair Grant", "agency": "City of Syracuse", "menu_category": "REPAIRS"}
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/grants.sqlite"

[server]
bind = "127.0.0.1:0"
admin_secret = "cli-test-secret"

[discovery]
trigger_mode = "sync"

[sources.filesystem.seed]
root = "{root}/feeds"
keywords = ["housing", "weatherization"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("grants.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_grants(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = grants_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run grants binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn init_and_discover(config_path: &Path) -> String {
    let (_, stderr, success) = run_grants(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_grants(config_path, &["discover", "--no-notify"]);
    assert!(success, "discover failed: {}", stderr);
    stdout
}

/// Pulls the grant id off the listing line that mentions `name`.
fn grant_id(listing: &str, name: &str) -> String {
    listing
        .lines()
        .find(|l| l.contains(name))
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_else(|| panic!("no grant named {} in:\n{}", name, listing))
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_grants(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/grants.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, first) = run_grants(&config_path, &["init"]);
    let (_, stderr, second) = run_grants(&config_path, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_sources_lists_filesystem_source() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_grants(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("filesystem:seed"), "got: {}", stdout);
}

#[test]
fn test_discover_filesystem_feeds() {
    let (_tmp, config_path) = setup_test_env();
    let stdout = init_and_discover(&config_path);
    assert!(stdout.contains("status:      completed"), "got: {}", stdout);
    assert!(stdout.contains("discovered:  2"), "got: {}", stdout);

    let (listing, _, success) = run_grants(&config_path, &["grants", "--status", "pending"]);
    assert!(success);
    assert!(listing.contains("Syracuse Home Repair Grant"));
    assert!(listing.contains("Onondaga County Weatherization Assistance"));
    assert!(!listing.contains("Parks Summer Schedule"));
}

#[test]
fn test_discover_twice_adds_nothing() {
    let (_tmp, config_path) = setup_test_env();
    init_and_discover(&config_path);
    let (stdout, _, success) = run_grants(&config_path, &["discover", "filesystem", "--no-notify"]);
    assert!(success);
    assert!(stdout.contains("discovered:  0"), "got: {}", stdout);

    let (runs, _, success) = run_grants(&config_path, &["runs"]);
    assert!(success);
    assert_eq!(runs.lines().filter(|l| l.contains("completed")).count(), 2);
}

#[test]
fn test_discover_unknown_source_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_grants(&config_path, &["init"]);
    let (_, stderr, success) = run_grants(&config_path, &["discover", "rss:nowhere"]);
    assert!(!success);
    assert!(stderr.contains("rss:nowhere"), "got: {}", stderr);
}

#[test]
fn test_catalog_import_flags_duplicate() {
    let (tmp, config_path) = setup_test_env();
    run_grants(&config_path, &["init"]);
    let programs = tmp.path().join("programs.json");
    let (stdout, stderr, success) =
        run_grants(&config_path, &["catalog", "import", programs.to_str().unwrap()]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("Imported 1 program"));

    let (stdout, _, _) = run_grants(&config_path, &["discover", "--no-notify"]);
    assert!(stdout.contains("duplicates:  1"), "got: {}", stdout);

    let (listing, _, _) = run_grants(&config_path, &["grants"]);
    assert!(listing.contains("probable_duplicate"), "got: {}", listing);
    assert!(listing.contains("matches 'syracuse_home_repair'"));
}

#[test]
fn test_approve_and_reject_from_cli() {
    let (_tmp, config_path) = setup_test_env();
    init_and_discover(&config_path);
    let (listing, _, _) = run_grants(&config_path, &["grants"]);

    let repair = grant_id(&listing, "Syracuse Home Repair Grant");
    let (stdout, stderr, success) = run_grants(
        &config_path,
        &["approve", &repair, "--program-key", "home_repair", "--reviewer", "dana"],
    );
    assert!(success, "approve failed: {}", stderr);
    assert!(stdout.contains("home_repair"));

    let (_, stderr, success) = run_grants(&config_path, &["approve", &repair]);
    assert!(!success);
    assert!(stderr.contains("already approved"), "got: {}", stderr);

    let weather = grant_id(&listing, "Weatherization");
    let (_, _, success) = run_grants(&config_path, &["reject", &weather, ""]);
    assert!(!success, "empty reason must be rejected");
    let (_, stderr, success) = run_grants(&config_path, &["reject", &weather, "County program"]);
    assert!(success, "reject failed: {}", stderr);

    let (catalog, _, _) = run_grants(&config_path, &["catalog", "list"]);
    assert!(catalog.contains("home_repair"));

    let (stats, _, success) = run_grants(&config_path, &["stats"]);
    assert!(success);
    assert!(stats.contains("approved:  1"), "got: {}", stats);
    assert!(stats.contains("rejected:  1"), "got: {}", stats);
}

#[test]
fn test_token_round_trips_through_auth() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_grants(&config_path, &["token", "dana"]);
    assert!(success);
    let token = stdout.trim();
    assert!(token.starts_with("dana."));
    let identity = grant_discovery::auth::verify_token("cli-test-secret", token).unwrap();
    assert_eq!(identity.admin_id, "dana");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_grants(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("nope.toml"), "got: {}", stderr);
}
