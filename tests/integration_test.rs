//! Integration tests for tokentrim

use std::sync::Arc;

use rand::Rng;
use tokentrim::service::{self, CompressRequest, DecodeRequest, ExportFormat, ExportRequest};
use tokentrim::*;

fn scenario_a_source() -> String {
    let mut out = String::new();
    for i in 0..200 {
        if i % 5 == 0 {
            out.push_str(&format!("total_{i} = countVal * {i}\n"));
        } else {
            out.push_str(&format!("value_{i} = {i}\n"));
        }
    }
    out
}

#[test]
fn test_repeated_identifier_is_hashed() {
    let source = scenario_a_source();
    assert_eq!(source.lines().count(), 200);
    assert_eq!(source.matches("countVal").count(), 40);

    let result = Engine::default()
        .compress_file("scenario.py", source.as_bytes())
        .unwrap();
    assert!(result.hash_table.entries_count >= 1);
    assert!(result.summary_levels[&Level::Compressed].token_count < result.minification.tokens);
    assert!(result
        .decode_preamble
        .as_deref()
        .unwrap()
        .contains("= countVal"));
}

#[test]
fn test_empty_file_all_zero() {
    let result = Engine::default().compress_file("empty.rs", b"").unwrap();
    assert_eq!(result.original_tokens, 0);
    for level in [Level::Architecture, Level::Skeleton, Level::Compressed] {
        assert_eq!(result.summary_levels[&level].token_count, 0);
    }
}

#[test]
fn test_flipped_payload_byte_reports_mismatch() {
    let engine = Engine::default();
    let inputs = vec![FileInput::new(
        "1",
        "server.js",
        "function handle(req, res) {\n  res.send(req.body);\n}\n".repeat(6),
    )];
    let bundle = engine.encode_bundle(&inputs).bundle;
    let mut archive: serde_json::Value =
        serde_json::from_str(&engine.export(&bundle, ArchiveFormat::Json).unwrap()).unwrap();

    use base64::Engine as _;
    let b64 = base64::engine::general_purpose::STANDARD;
    let payload = archive["files"][0]["payload"].as_str().unwrap().to_string();
    let mut raw = b64.decode(payload).unwrap();
    let mid = raw.len() / 2;
    raw[mid] ^= 0xFF;
    archive["files"][0]["payload"] = serde_json::Value::String(b64.encode(&raw));

    let response = engine.decode(&archive.to_string()).unwrap();
    assert_eq!(response.total_files, 1);
    let file = &response.files[0];
    assert!(!file.matches);
    assert!(file.error.is_some());
    assert_eq!(file.verify().unwrap_err().kind(), "IntegrityMismatch");
}

#[test]
fn test_batch_with_oversized_file() {
    let engine = Engine::new(CompressionConfig {
        max_input_size: 1024,
        ..CompressionConfig::default()
    })
    .unwrap();
    let inputs = vec![
        FileInput::new("1", "a.rs", "fn a() -> u8 {\n    1\n}\n"),
        FileInput::new("2", "big.rs", "// filler\n".repeat(500)),
        FileInput::new("3", "c.py", "def c():\n    return 3\n"),
    ];
    let reports = engine.compress_batch(&inputs);
    assert_eq!(reports.len(), 3);
    assert_eq!(
        reports.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        ["1", "2", "3"]
    );
    assert!(reports[0].result.is_some());
    assert_eq!(reports[1].error.as_ref().unwrap().kind, "ContentError");
    assert!(reports[1].result.is_none());
    assert!(reports[2].result.is_some());
}

#[test]
fn test_sequential_batch_matches_parallel() {
    let inputs: Vec<FileInput> = (0..8)
        .map(|i| FileInput::new(i.to_string(), format!("m{i}.go"), format!("func f{i}() int {{\n\treturn {i}\n}}\n")))
        .collect();
    let parallel = Engine::default().compress_batch(&inputs);
    let sequential = Engine::new(CompressionConfig {
        parallel: false,
        ..CompressionConfig::default()
    })
    .unwrap()
    .compress_batch(&inputs);
    assert_eq!(parallel, sequential);
}

#[test]
fn test_export_keeps_admitted_files() {
    let engine = Engine::new(CompressionConfig {
        max_input_size: 64,
        ..CompressionConfig::default()
    })
    .unwrap();
    let inputs = vec![
        FileInput::new("a", "a.txt", "abc"),
        FileInput::new("b", "b.txt", "b".repeat(100)),
    ];
    let export = engine.encode_bundle(&inputs);
    assert_eq!(export.bundle.total_files, 1);
    assert_eq!(export.rejected.len(), 1);
    assert_eq!(export.rejected[0].filename, "b.txt");
    assert_eq!(export.rejected[0].error.as_ref().unwrap().kind, "ContentError");

    let response = engine
        .decode(&engine.export(&export.bundle, ArchiveFormat::Json).unwrap())
        .unwrap();
    assert_eq!(response.total_files, 1);
    assert_eq!(response.files[0].filename, "a.txt");
    assert_eq!(response.files[0].content, "abc");
}

#[test]
fn test_roundtrip_random_text() {
    const ALPHABET: &[char] = &[
        'a', 'b', 'Z', '_', ' ', '\n', '\t', '{', '}', '(', ')', ';', '§', 'é', '漢', '"', '/', '*', '#',
    ];
    let engine = Engine::default();
    let mut rng = rand::thread_rng();
    let inputs: Vec<FileInput> = (0..5)
        .map(|i| {
            let len = rng.gen_range(0..2000);
            let text: String = (0..len)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
                .collect();
            FileInput::new(i.to_string(), format!("f{i}.txt"), text)
        })
        .collect();
    let bundle = engine.encode_bundle(&inputs).bundle;
    let response = engine
        .decode(&engine.export(&bundle, ArchiveFormat::Json).unwrap())
        .unwrap();
    for (input, recovered) in inputs.iter().zip(&response.files) {
        assert!(recovered.matches, "{} did not round-trip", input.filename);
        assert_eq!(recovered.content, input.content);
        assert_eq!(recovered.recovered_size, input.content.len());
    }
}

#[test]
fn test_envelope_inside_conversation() {
    let engine = Engine::default();
    let inputs = vec![
        FileInput::new("1", "main.rs", "fn main() {\n    println!(\"hello\");\n}\n"),
        FileInput::new("2", "README.md", "# Demo\n\nRun it.\n"),
    ];
    let bundle = engine.encode_bundle(&inputs).bundle;
    let envelope = engine.export(&bundle, ArchiveFormat::Envelope).unwrap();
    let message = format!("Sure, here are the files:\n\n{envelope}\nAnything else?");

    let response = engine.decode(&message).unwrap();
    assert_eq!(response.total_files, 2);
    assert!(response.all_match());
    assert_eq!(response.files[1].filename, "README.md");
    assert_eq!(response.files[1].content, "# Demo\n\nRun it.\n");
}

#[test]
fn test_malformed_bundles_fail_cleanly() {
    let engine = Engine::default();
    for text in [
        "",
        "not a bundle",
        r#"{"version": 1}"#,
        r#"{"version": 2, "files": [], "total_files": 0}"#,
        r#"{"version": 1, "files": [], "total_files": 4}"#,
        "<<<TOKENTRIM-LOSSLESS:BEGIN>>>\nAAAA\n",
    ] {
        let err = engine.decode(text).unwrap_err();
        assert_eq!(err.kind(), "BundleFormatError", "input {text:?}");
    }
}

#[test]
fn test_invalid_huffman_table_is_format_error() {
    let engine = Engine::default();
    let bundle = engine
        .encode_bundle(&[FileInput::new("1", "a.txt", "abcabc")])
        .bundle;
    let mut archive: serde_json::Value =
        serde_json::from_str(&engine.export(&bundle, ArchiveFormat::Json).unwrap()).unwrap();
    archive["files"][0]["huffman_table"] = serde_json::json!({"97": "0", "98": "01"});
    let err = engine.decode(&archive.to_string()).unwrap_err();
    assert_eq!(err.kind(), "BundleFormatError");
}

#[test]
fn test_archive_files_on_disk() -> anyhow::Result<()> {
    let engine = Engine::default();
    let bundle = engine
        .encode_bundle(&[FileInput::new("1", "lib.py", "import os\n\nprint(os.name)\n")])
        .bundle;
    let dir = tempfile::tempdir()?;

    let json_path = dir.path().join("bundle.json");
    bundle.write_to(&json_path, ArchiveFormat::Json, engine.config())?;
    assert_eq!(LosslessBundle::read_from(&json_path)?, bundle);

    let txt_path = dir.path().join("bundle.txt");
    bundle.write_to(&txt_path, ArchiveFormat::Envelope, engine.config())?;
    let restored = LosslessBundle::read_from(&txt_path)?;
    assert!(restored.decode().all_match());

    let missing = LosslessBundle::read_from(dir.path().join("absent.json")).unwrap_err();
    assert_eq!(missing.kind(), "CompressionError");
    Ok(())
}

#[tokio::test]
async fn test_service_roundtrip() {
    let engine = Arc::new(Engine::default());
    let files = vec![
        FileInput::new("x", "app.ts", "export function run(): void {\n  console.log(\"run\");\n}\n"),
        FileInput::new("y", "blob.bin", "\0\0\0"),
    ];
    let response = service::compress(engine.clone(), CompressRequest { files })
        .await
        .unwrap();
    assert!(response.results[0].result.is_some());
    assert_eq!(response.results[1].error.as_ref().unwrap().kind, "ContentError");

    let exported = service::export(
        engine.clone(),
        ExportRequest {
            files: vec![
                FileInput::new("x", "app.ts", "export const x = 1;\n"),
                FileInput::new("y", "blob.bin", "\0\0\0"),
            ],
            format: ExportFormat::Archive,
        },
    )
    .await
    .unwrap();
    assert_eq!(exported.rejected.len(), 1);
    assert_eq!(exported.rejected[0].id, "y");
    let decoded = service::decode(
        engine.clone(),
        DecodeRequest {
            bundle: exported.content,
        },
    )
    .await
    .unwrap();
    assert_eq!(decoded.total_files, 1);
    assert!(decoded.all_match());

    let decoded = service::decode(engine, DecodeRequest { bundle: "{}".into() }).await;
    assert!(decoded.is_err());
}
