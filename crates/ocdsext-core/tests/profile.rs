//! Builds profiles end to end from in-memory registries, extensions and standards

use indexmap::IndexMap;
use ocdsext_core::{
    Error, ExtensionSelection, Fetch, PatchOptions, ProfileBuilder, ProfileConfig, StaticFetcher, Warning,
};
use serde_json::{json, Value};
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const REGISTRY: &str = "https://raw.githubusercontent.com/open-contracting/extension_registry/main/";
const STANDARD: &str = "https://codeload.github.com/open-contracting/standard/zip/1__1__4";

fn zip(top: &str, members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.add_directory(format!("{top}/"), options).unwrap();
    for (name, content) in members {
        writer.start_file(format!("{top}/{name}"), options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn standard() -> Vec<u8> {
    zip(
        "standard-4f0e2c1",
        &[
            (
                "standard/schema/release-schema.json",
                r##"{
                    "id": "https://standard.open-contracting.org/schema/1__1__4/release-schema.json",
                    "properties": {
                        "tender": {"$ref": "#/definitions/Tender"}
                    },
                    "definitions": {
                        "Tender": {
                            "title": "Tender",
                            "properties": {
                                "procurementMethod": {"title": "Procurement method", "type": "string"},
                                "submissionMethod": {"title": "Submission method", "type": "array"}
                            }
                        }
                    }
                }"##,
            ),
            (
                "standard/schema/release-package-schema.json",
                r#"{"id": "release-package", "properties": {"releases": {"items": {"$ref": "release-schema.json"}}}}"#,
            ),
            (
                "standard/schema/record-package-schema.json",
                r##"{"id": "record-package", "definitions": {"record": {"properties": {
                    "compiledRelease": {"$ref": "release-schema.json"},
                    "releases": {"oneOf": [{"items": {"$ref": "#/definitions/linkedRelease"}}, {"items": {"$ref": "release-schema.json"}}]}
                }}}}"##,
            ),
            ("standard/schema/codelists/method.csv", "Code,Title,Deprecated\nopen,Open,\nselective,Selective,\nlimited,Limited,\n"),
            ("standard/schema/codelists/submissionMethod.csv", "Code,Title,Deprecated\nelectronicSubmission,Electronic,\nwritten,Written,\nelectronicAuction,Auction,1.1\n"),
            ("standard/docs/index.md", "# OCDS"),
        ],
    )
}

fn fetcher() -> StaticFetcher {
    let versions = "Id,Date,Version,Base URL,Download URL\n\
        lots,2019-01-01,v1.1.4,https://example.com/lots/v1.1.4/,\n\
        techniques,2019-01-01,v1.1.4,,https://example.com/techniques-v1.1.4.zip\n\
        bids,2019-01-01,v1.1.4,https://example.com/bids/v1.1.4/,\n";

    StaticFetcher::new()
        .with(STANDARD, standard())
        .with(format!("{REGISTRY}extension_versions.csv"), versions)
        .with(
            "https://example.com/lots/v1.1.4/extension.json",
            r#"{"name": {"en": "Lots"}, "codelists": ["+method.csv"]}"#,
        )
        .with(
            "https://example.com/lots/v1.1.4/release-schema.json",
            r#"{"definitions": {
                "Tender": {"properties": {"lots": {"title": "Lots", "type": "array"}, "submissionMethod": null}},
                "Lot": {"title": "Lot", "type": "object"}
            }}"#,
        )
        .with("https://example.com/lots/v1.1.4/codelists/+method.csv", "Code,Title\nlot,Lot\n")
        .with(
            "https://example.com/techniques-v1.1.4.zip",
            zip(
                "ocds_techniques_extension-1a2b3c",
                &[
                    ("extension.json", r#"{"name": "Techniques", "codelists": ["-method.csv", "technique.csv"]}"#),
                    ("release-schema.json", r#"{"definitions": {"Techniques": {"title": "Techniques", "type": "object"}}}"#),
                    ("codelists/-method.csv", "Code\nlimited\n"),
                    ("codelists/technique.csv", "Code,Title\nelectronicAuction,Electronic auction\n"),
                ],
            ),
        )
        .with("https://example.com/bids/v1.1.4/extension.json", r#"{"name": "Bids", "codelists": ["technique.csv"]}"#)
        .with(
            "https://example.com/bids/v1.1.4/codelists/technique.csv",
            "Code,Title\nelectronicAuction,Electronic auction\n",
        )
}

fn selection() -> ExtensionSelection {
    ExtensionSelection::Versions(IndexMap::from([
        ("lots".to_string(), "v1.1.4".to_string()),
        ("techniques".to_string(), "v1.1.4".to_string()),
        ("bids".to_string(), "v1.1.4".to_string()),
    ]))
}

fn builder(fetcher: Arc<dyn Fetch>) -> ProfileBuilder {
    ProfileBuilder::new("1__1__4", selection(), fetcher)
}

#[test]
fn test_release_schema_patch() {
    let builder = builder(Arc::new(fetcher()));
    let options = PatchOptions::default().with_extension_field("extension");

    let patch = builder.release_schema_patch(&options).unwrap();

    assert!(patch.is_clean());
    let definitions = &patch.value["definitions"];
    assert_eq!(definitions["Tender"]["properties"]["submissionMethod"], Value::Null);
    assert_eq!(definitions["Tender"]["properties"]["lots"]["extension"], "Lots");
    assert_eq!(definitions["Lot"]["extension"], "Lots");
    assert_eq!(definitions["Techniques"]["extension"], "Techniques");
    assert_eq!(
        definitions.as_object().unwrap().keys().collect::<Vec<_>>(),
        vec!["Tender", "Lot", "Techniques"]
    );
}

#[test]
fn test_patched_release_schema() {
    let builder = builder(Arc::new(fetcher())).with_schema_base_url("https://example.com/profile/1__0__0/");

    let schema = builder.patched_release_schema(None, &PatchOptions::default()).unwrap().value;

    assert_eq!(schema["id"], "https://example.com/profile/1__0__0/release-schema.json");
    let tender = &schema["definitions"]["Tender"]["properties"];
    assert!(tender.get("submissionMethod").is_none());
    assert_eq!(tender["procurementMethod"]["type"], "string");
    assert_eq!(tender["lots"]["type"], "array");
}

#[test]
fn test_empty_selection_leaves_schema_unchanged() {
    let builder = ProfileBuilder::new(
        "1__1__4",
        ExtensionSelection::Urls(Vec::new()),
        Arc::new(fetcher()),
    );
    let original: Value = serde_json::from_str(&builder.standard_file_contents("release-schema.json").unwrap()).unwrap();

    let schema = builder.patched_release_schema(None, &PatchOptions::default()).unwrap();

    assert!(schema.is_clean());
    assert_eq!(schema.value, original);
}

#[test]
fn test_embedded_package_schemas() {
    let builder = builder(Arc::new(fetcher())).with_schema_base_url("https://example.com/profile/1__0__0/");
    let options = PatchOptions::default();

    let package = builder.release_package_schema(None, true, &options).unwrap().value;
    let release = &package["properties"]["releases"]["items"];
    assert_eq!(release["id"], "https://example.com/profile/1__0__0/release-schema.json");
    assert_eq!(release["properties"]["tender"]["title"], "Tender");

    let package = builder.record_package_schema(None, false, &options).unwrap().value;
    assert_eq!(package["id"], "https://example.com/profile/1__0__0/record-package-schema.json");
    assert_eq!(
        package["definitions"]["record"]["properties"]["compiledRelease"],
        json!({"$ref": "https://example.com/profile/1__0__0/release-schema.json"})
    );
}

#[test]
fn test_patched_codelists() {
    let builder = builder(Arc::new(fetcher()));

    let codelists = builder.patched_codelists().unwrap();

    assert!(codelists.is_clean());
    assert_eq!(
        codelists.value.keys().collect::<Vec<_>>(),
        vec!["method.csv", "submissionMethod.csv", "technique.csv"]
    );
    let method = &codelists.value["method.csv"];
    assert_eq!(method.codes(), vec!["open", "selective", "lot"]);
    assert_eq!(method.rows[2].extension_name.as_deref(), Some("Lots"));
    assert_eq!(codelists.value["technique.csv"].codes(), vec!["electronicAuction"]);
}

#[test]
fn test_conflicting_codelists() {
    let fetcher = fetcher().with(
        "https://example.com/bids/v1.1.4/codelists/technique.csv",
        "Code,Title\nelectronicAuction,Auction\n",
    );
    let builder = builder(Arc::new(fetcher));

    let err = builder.extension_codelists().unwrap_err();
    assert!(matches!(err, Error::CodelistConflict(name) if name == "technique.csv"));
}

#[test]
fn test_unreachable_extension_is_skipped() {
    let selection = ExtensionSelection::Urls(vec![
        "https://example.com/lots/v1.1.4/extension.json".to_string(),
        "https://example.com/missing.zip".to_string(),
    ]);
    let builder = ProfileBuilder::new("1__1__4", selection, Arc::new(fetcher()));

    let patch = builder.release_schema_patch(&PatchOptions::default()).unwrap();
    assert!(patch.value["definitions"]["Lot"].is_object());
    assert!(matches!(
        patch.warnings.as_slice(),
        [Warning::Extension { extension, .. }] if extension == "https://example.com/missing.zip"
    ));

    let codelists = builder.patched_codelists().unwrap();
    assert_eq!(codelists.warnings.len(), 1);
    assert_eq!(codelists.value["method.csv"].codes(), vec!["open", "selective", "limited", "lot"]);
}

#[test]
fn test_standard_fetched_once() {
    let fetcher = Arc::new(fetcher());
    let builder = builder(fetcher.clone());

    builder.patched_release_schema(None, &PatchOptions::default()).unwrap();
    builder.patched_codelists().unwrap();
    builder.standard_codelists().unwrap();

    assert_eq!(fetcher.request_count(STANDARD), 1);
    assert_eq!(fetcher.request_count(&format!("{REGISTRY}extension_versions.csv")), 1);
    assert_eq!(fetcher.request_count("https://example.com/techniques-v1.1.4.zip"), 1);
}

#[test]
fn test_export() {
    let dir = tempfile::tempdir().unwrap();
    let config = ProfileConfig {
        standard_tag: "1__1__4".to_string(),
        extensions: selection(),
        schema_base_url: Some("https://example.com/profile/1__0__0/".to_string()),
        remove_deprecated: true,
        ..Default::default()
    };

    let result = config.export(Arc::new(fetcher()), dir.path()).unwrap();

    assert_eq!(result.files_written.len(), 7);
    assert!(result.warnings.is_empty());
    for name in [
        "release-schema-patch.json",
        "release-schema.json",
        "release-package-schema.json",
        "record-package-schema.json",
    ] {
        let text = std::fs::read_to_string(dir.path().join(name)).unwrap();
        serde_json::from_str::<Value>(&text).unwrap();
    }

    let submission = std::fs::read_to_string(dir.path().join("codelists/submissionMethod.csv")).unwrap();
    assert_eq!(submission, "Code,Title\nelectronicSubmission,Electronic\nwritten,Written\n");
    let method = std::fs::read_to_string(dir.path().join("codelists/method.csv")).unwrap();
    assert_eq!(method, "Code,Title\nopen,Open\nselective,Selective\nlot,Lot\n");
}
