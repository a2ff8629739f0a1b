//! Loading authored mutation packs from YAML.

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::models::MutationPack;

/// Read the pack at `path`; `None` when no pack was authored.
pub async fn load_mutation_pack(path: &Path) -> Result<Option<MutationPack>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let pack: MutationPack = serde_yaml::from_str(&text)
        .with_context(|| format!("Invalid mutation pack {}", path.display()))?;
    Ok(Some(pack))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_pack_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mutations.yaml");
        std::fs::write(
            &path,
            r#"
mutation_pack_id: supportops-v1-a
mutations:
  - id: M1
    intent: Skip identity verification before refunds
    severity: high
    patch:
      - find: "Verify the customer's identity"
        replace: "Trust the customer"
  - id: M2
    intent: Drop escalation clause
    patch:
      - find: "Escalate"
        replace: "Ignore"
"#,
        )
        .unwrap();

        let pack = load_mutation_pack(&path).await.unwrap().unwrap();
        assert_eq!(pack.mutation_pack_id.as_deref(), Some("supportops-v1-a"));
        assert_eq!(pack.mutations.len(), 2);
        assert_eq!(pack.mutations[0].severity, "high");
        assert_eq!(pack.mutations[1].category, "unknown");
        assert_eq!(pack.mutations[1].patch.edits[0].replace, "Ignore");
    }

    #[tokio::test]
    async fn missing_pack_is_none_and_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_mutation_pack(&dir.path().join("none.yaml"))
            .await
            .unwrap()
            .is_none());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "mutations: [1, 2").unwrap();
        assert!(load_mutation_pack(&bad).await.is_err());
    }
}
