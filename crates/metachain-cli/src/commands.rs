use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use metachain_store::{LookupOptions, ScalarStore, Value};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Get(args) => cmd_get(args, cli.format),
        Command::Names(args) => cmd_names(args, cli.format),
    }
}

fn load_store(path: &Path) -> anyhow::Result<ScalarStore> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    match Value::from_json(json)? {
        Value::Store(store) => Ok(store),
        other => bail!(
            "{}: top-level value must be an object, found {}",
            path.display(),
            other.kind()
        ),
    }
}

/// Load the document and link each defaults document to the next.
fn load_chain(args: &ChainArgs) -> anyhow::Result<ScalarStore> {
    let root = load_store(&args.file)?;
    let mut tail = root.clone();
    for path in &args.defaults {
        let parent = load_store(path)?;
        tail.set_defaults(Some(parent.clone()))?;
        debug!(path = %path.display(), "linked defaults document");
        tail = parent;
    }
    Ok(root)
}

fn render_text(value: &Value) -> String {
    match value.to_json() {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn cmd_get(args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = load_chain(&args.chain)?;
    let fallback = args.fallback.map(Value::from);
    let Some(value) = store.get_with(&args.key, fallback, LookupOptions::default()) else {
        bail!("{} does not resolve", args.key);
    };
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value.to_json())?),
        OutputFormat::Text => println!("{} = {}", args.key.yellow(), render_text(&value).bold()),
    }
    Ok(())
}

fn cmd_names(args: NamesArgs, format: OutputFormat) -> anyhow::Result<()> {
    let store = load_chain(&args.chain)?;
    let names = store.metadatum_names();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Text => {
            for name in &names {
                let marker = if store.contains_key(name) {
                    "local".green()
                } else {
                    "inherited".cyan()
                };
                println!("{name}  ({marker})");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_doc(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn chain_links_defaults_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let leaf = write_doc(dir.path(), "leaf.json", r#"{ "OBJECT": "M31" }"#);
        let mid = write_doc(dir.path(), "mid.json", r#"{ "EQUINOX": 2000, "OBJECT": "none" }"#);
        let root = write_doc(
            dir.path(),
            "root.json",
            r#"{ "EQUINOX": 1950, "Axes": [ { "name": "RA" }, { "name": "Dec" } ] }"#,
        );

        let store = load_chain(&ChainArgs {
            file: leaf,
            defaults: vec![mid, root],
        })
        .unwrap();

        assert_eq!(store.get("OBJECT"), Some(Value::from("M31")));
        assert_eq!(store.get("EQUINOX"), Some(Value::from(2000)));
        assert_eq!(store.get("Axes[1].name"), Some(Value::from("Dec")));
        assert_eq!(store.metadatum_names(), vec!["Axes", "EQUINOX", "OBJECT"]);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(dir.path(), "list.json", "[1, 2]");
        let err = load_store(&path).unwrap_err();
        assert!(err.to_string().contains("must be an object"));
    }

    #[test]
    fn text_rendering_unquotes_strings() {
        assert_eq!(render_text(&Value::from("RA")), "RA");
        assert_eq!(render_text(&Value::from(3)), "3");
    }
}
