//! Display formatting for CLI output
//!
//! - App records
//! - Rendered resource collections
//! - Release summaries

use console::style;
use tuber_core::{App, ResourceRef};
use tuber_kube::{RenderedResource, ReleaseSummary, ResourceCollection};

/// Pluralize a word based on count
pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

pub fn print_app(app: &App) {
    println!("{}", style(&app.name).cyan().bold());
    println!("{}", style("=".repeat(app.name.len())).dim());
    println!();

    println!("{}: {}", style("Image").bold(), app.image_tag);
    if !app.slack_channel.is_empty() {
        println!("{}: {}", style("Channel").bold(), app.slack_channel);
    }
    if app.paused {
        println!("{}: {}", style("Paused").bold(), style("yes").yellow());
    }
    if app.review_app {
        println!("{}: yes", style("Review app").bold());
    }
    if !app.current_tags.is_empty() {
        println!("{}: {}", style("Tags").bold(), app.current_tags.join(", "));
    }
    if let Some(released_at) = app.released_at {
        println!("{}: {}", style("Released").bold(), released_at.to_rfc3339());
    }

    if !app.vars.is_empty() {
        println!();
        println!("{}:", style("Vars").bold());
        for (key, value) in &app.vars {
            println!("  {} = {}", key, value);
        }
    }

    if !app.excluded_resources.is_empty() {
        println!();
        println!("{}:", style("Excluded").bold());
        for resource in &app.excluded_resources {
            println!("  - {}", resource);
        }
    }

    println!();
    println!(
        "{}: {}",
        style("Current").bold(),
        pluralize(app.state.current.len(), "resource", "resources")
    );
    for resource in &app.state.current {
        println!("  - {}", resource.resource_ref());
    }
    println!(
        "{}: {}",
        style("Previous").bold(),
        pluralize(app.state.previous.len(), "resource", "resources")
    );
}

/// Rendered manifests as one multi-document YAML stream, in apply order
pub fn collection_yaml(collection: &ResourceCollection) -> String {
    let groups: [(&str, &[RenderedResource]); 4] = [
        ("prerelease", &collection.prerelease),
        ("config", &collection.configs),
        ("workload", &collection.workloads),
        ("postrelease", &collection.postrelease),
    ];

    let mut out = String::new();
    for (group, resources) in groups {
        for resource in resources {
            out.push_str("---\n");
            out.push_str(&format!("# {}: {}\n", group, resource.resource_ref()));
            out.push_str(resource.manifest.trim_end());
            out.push('\n');
        }
    }
    out
}

pub fn print_summary(app: &str, summary: &ReleaseSummary) {
    println!(
        "{} Released {} ({} applied, {} watched)",
        style("✓").green().bold(),
        style(app).cyan(),
        summary.applied.len(),
        summary.watched.len()
    );
    print_refs("Removed", &summary.removed);
    if !summary.tags.is_empty() {
        println!("  {}: {}", style("Tags").bold(), summary.tags.join(", "));
    }
}

fn print_refs(label: &str, refs: &[ResourceRef]) {
    if refs.is_empty() {
        return;
    }
    println!("  {}:", style(label).bold());
    for r in refs {
        println!("    - {}", r);
    }
}
