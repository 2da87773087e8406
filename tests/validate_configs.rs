use mcpgen::errors::Severity;
use mcpgen::{GenError, ManifestValidator, ServerMetadata, ValidationOutcome};
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn metadata() -> ServerMetadata {
    serde_json::from_value(json!({
        "name": "io.github.acme/notes",
        "packages": [{
            "identifier": "@acme/notes",
            "transport": { "type": "stdio" },
            "environmentVariables": [
                { "name": "API_TOKEN", "isRequired": true, "isSecret": true }
            ]
        }]
    }))
    .unwrap()
}

#[test]
fn test_structural_errors_do_not_stop_other_servers() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(".mcp.default-stdio.json");
    fs::write(
        &path,
        serde_json::to_string_pretty(&json!({
            "mcpServers": {
                "broken": { "command": "npx", "args": "not-an-array" },
                "notes": { "command": "npx", "args": ["-y", "@acme/notes"] }
            }
        }))?,
    )?;

    let report = ManifestValidator::new(Some(metadata())).validate_file(&path)?;

    assert_eq!(report.outcome(), ValidationOutcome::Fail);
    assert_eq!(report.servers.len(), 2);

    let broken = report.servers.iter().find(|s| s.server == "broken").unwrap();
    assert_eq!(broken.outcome(), ValidationOutcome::Fail);

    let notes = report.servers.iter().find(|s| s.server == "notes").unwrap();
    assert_eq!(notes.outcome(), ValidationOutcome::PassWithWarnings);
    assert!(notes
        .issues
        .iter()
        .all(|issue| issue.severity == Severity::Warning));
    Ok(())
}

#[test]
fn test_without_manifest_only_structure_is_checked() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(".mcp.default-http.json");
    fs::write(
        &path,
        serde_json::to_string_pretty(&json!({
            "mcpServers": {
                "notes": {
                    "type": "http",
                    "url": "http://localhost:3000/mcp",
                    "start": { "command": "npx", "args": ["-y", "@acme/notes", "--port", "3000"] }
                }
            }
        }))?,
    )?;

    let report = ManifestValidator::new(None).validate_file(&path)?;
    assert_eq!(report.outcome(), ValidationOutcome::PassWithWarnings);
    assert_eq!(report.error_count(), 0);
    Ok(())
}

#[test]
fn test_unparseable_file_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join(".mcp.default-stdio.json");
    fs::write(&path, "{ not json")?;

    let result = ManifestValidator::default().validate_file(&path);
    assert!(matches!(result, Err(GenError::ConfigUnreadable { .. })));
    Ok(())
}
