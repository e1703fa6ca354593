// src/cli/plugins.rs — `plugscript plugins`: catalog listing

use std::path::Path;

use crate::plugins::record::{Dependencies, PluginRecord};
use crate::plugins::registry::PluginRegistry;
use crate::plugins::resolver;

/// Print the catalog under `root` and the order it would load in.
/// Nothing is loaded.
pub fn show_plugins(root: &Path) -> anyhow::Result<()> {
    let registry = PluginRegistry::discover(root);
    println!("Plugins in {}", root.display());
    if registry.is_empty() {
        println!("  (none)");
        return Ok(());
    }

    for record in registry.records() {
        println!("{}", describe(record));
    }
    println!();

    match resolver::resolve(registry.records()) {
        Ok(order) => {
            let names: Vec<&str> = order
                .iter()
                .map(|&i| registry.records()[i].name.as_str())
                .collect();
            println!("Load order: {}", names.join(" -> "));
        }
        Err(e) => println!("Load order: unresolved ({e})"),
    }
    Ok(())
}

/// One listing line for a plugin record.
pub fn describe(record: &PluginRecord) -> String {
    let deps = match &record.dependencies {
        Dependencies::Declared(names) if names.is_empty() => String::new(),
        Dependencies::Declared(names) => format!(" [needs {}]", names.join(", ")),
        Dependencies::Malformed(why) => format!(" [bad dependencies: {why}]"),
    };
    let artifact = if record.library_path.is_file() {
        ""
    } else {
        " (no artifact)"
    };
    format!(
        "  {:<20} v{:<10} {:<10} {}{}{}",
        record.name,
        record.version,
        record.state().to_string(),
        record.description,
        deps,
        artifact
    )
}
