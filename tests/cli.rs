mod common;

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;

use common::TestWorkspace;

fn record_import() -> Command {
    let mut cmd = Command::cargo_bin("record-import").expect("binary exists");
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn preview_prints_rows_and_counts() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("items.csv", "name,price,sku\nWidget,10,W-1\nGadget,12,G-1\n");
    record_import()
        .args(["preview", "-i", input.to_str().unwrap(), "--rows", "1"])
        .assert()
        .success()
        .stdout(contains("Widget"))
        .stdout(contains("(1 of 2 row(s), 3 column(s))"));
}

#[test]
fn fields_lists_flattened_paths_as_json() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config();
    let output = record_import()
        .args(["fields", "-c", config.to_str().unwrap(), "--collection", "products", "--json"])
        .output()
        .expect("run fields");
    assert!(output.status.success());
    let fields: Value = serde_json::from_slice(&output.stdout).expect("fields json");
    let paths = fields
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(paths, vec!["id", "title", "sku", "price", "status", "featured"]);
    assert_eq!(fields[4]["required"], Value::Bool(false));
    assert_eq!(fields[4]["hasDefaultValue"], Value::Bool(true));
}

#[test]
fn unknown_collection_is_reported() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config();
    record_import()
        .args(["fields", "-c", config.to_str().unwrap(), "--collection", "ghosts"])
        .assert()
        .failure()
        .stderr(contains("Unknown collection 'ghosts'"));
}

#[test]
fn sample_csv_uses_field_paths_as_headers() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config();
    let output = workspace.path().join("sample.csv");
    record_import()
        .args([
            "sample",
            "-c",
            config.to_str().unwrap(),
            "--collection",
            "products",
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();
    let contents = fs::read_to_string(&output).expect("read sample");
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some(r#""id","title","sku","price","status","featured""#)
    );
    assert_eq!(contents.lines().count(), 4);

    record_import()
        .args([
            "recommend",
            "-i",
            output.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--collection",
            "products",
        ])
        .assert()
        .success()
        .stdout(contains("1.0"));
}

#[test]
fn import_creates_then_upserts_into_the_store() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config();
    let store = workspace.path().join("store.json");
    let first = workspace.write("first.csv", "Title,SKU,Cost\nLamp,L-1,5\nDesk,D-1,abc\n");

    let output = record_import()
        .args([
            "import",
            "-i",
            first.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--collection",
            "products",
            "-s",
            store.to_str().unwrap(),
        ])
        .output()
        .expect("run import");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout).expect("report json");
    assert_eq!(report["created"], 2);
    assert_eq!(report["message"], "Import completed: created 2, updated 0");

    let saved = workspace.read_json("store.json");
    let products = saved["products"].as_array().unwrap();
    assert_eq!(products.len(), 2);
    assert_eq!(products[0]["price"], 5);
    assert_eq!(products[1]["price"], 0);
    assert_eq!(products[1]["status"], "draft");

    let second = workspace.write("second.csv", "Title,SKU\nLamp v2,L-1\nChair,C-1\n");
    record_import()
        .args([
            "import",
            "-i",
            second.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--collection",
            "products",
            "-s",
            store.to_str().unwrap(),
            "--mode",
            "upsert",
            "--compare-field",
            "sku",
        ])
        .assert()
        .success()
        .stdout(contains("created 1, updated 1"));

    let saved = workspace.read_json("store.json");
    let products = saved["products"].as_array().unwrap();
    assert_eq!(products.len(), 3);
    assert_eq!(products[0]["title"], "Lamp v2");
    assert_eq!(products[0]["price"], 5);
}

#[test]
fn import_refuses_to_start_without_required_mappings() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config();
    let store = workspace.path().join("store.json");
    let input = workspace.write("items.csv", "Title,Cost\nLamp,5\n");
    record_import()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--collection",
            "products",
            "-s",
            store.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("required field \"sku\" is not mapped"));
    assert!(!store.exists());

    record_import()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-c",
            config.to_str().unwrap(),
            "--collection",
            "products",
            "-s",
            store.to_str().unwrap(),
            "--map",
            "Cost=sku",
        ])
        .assert()
        .success();
}

#[test]
fn request_answers_with_status_and_body() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config();
    let store = workspace.path().join("store.json");
    let body = workspace.write(
        "request.json",
        r#"{"collection": "products",
            "data": [{"title": "Lamp", "sku": "L-1"}],
            "settings": {"mode": "create",
                         "fieldMappings": [{"csvField": "title", "collectionField": "title"},
                                           {"csvField": "sku", "collectionField": "sku"}]}}"#,
    );
    record_import()
        .args([
            "request",
            "-c",
            config.to_str().unwrap(),
            "-s",
            store.to_str().unwrap(),
            "-b",
            body.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("\"status\": 200"));
    assert_eq!(workspace.read_json("store.json")["products"].as_array().unwrap().len(), 1);

    let bad = workspace.write("bad.json", r#"{"data": []}"#);
    record_import()
        .args([
            "request",
            "-c",
            config.to_str().unwrap(),
            "-s",
            store.to_str().unwrap(),
            "-b",
            bad.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stdout(contains("\"status\": 400"))
        .stdout(contains("Missing required fields: collection, data"));
}
