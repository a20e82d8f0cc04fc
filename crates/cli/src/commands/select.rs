//! `promptweave select` — Show which fragments activate for some text.

use super::new_session;
use promptweave_config::AssemblyConfig;
use promptweave_core::error::preview;
use promptweave_worldinfo::{ActivationCondition, WorldBook};
use std::path::{Path, PathBuf};

pub async fn run(
    config: AssemblyConfig,
    worlds: &[PathBuf],
    keywords: &str,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = new_session(config, seed);
    for path in worlds {
        let book = read_world(path)?;
        tracing::debug!(world = %book.name, entries = book.entries.len(), "Loaded world book");
        session.add_source(Box::new(book));
    }

    let activated = session.select_activated_entries(keywords, &ActivationCondition::default());
    if activated.is_empty() {
        println!("No fragments activated.");
        return Ok(());
    }

    println!("{} fragment(s) activated:", activated.len());
    for fragment in &activated {
        let label = if fragment.comment.is_empty() {
            String::new()
        } else {
            format!(" [{}]", fragment.comment)
        };
        println!(
            "  {}{label}  {}",
            fragment.id(),
            preview(fragment.content.trim(), 60)
        );
    }
    Ok(())
}

/// Read a world book from a JSON file.
pub fn read_world(path: &Path) -> Result<WorldBook, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let book = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
    Ok(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_world_book_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"name":"lore","entries":[{{"uid":1,"key":["dragon"],"content":"@@activate\nScales."}}]}}"#
        )
        .unwrap();

        let book = read_world(file.path()).unwrap();
        assert_eq!(book.name, "lore");
        assert!(book.enabled);
        assert_eq!(book.entries[0].content, "Scales.");
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = read_world(Path::new("/nonexistent/world.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
