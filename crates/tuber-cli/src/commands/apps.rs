//! Apps commands - create and edit app records in the store

use console::style;
use tuber_core::App;
use tuber_kube::AppStore;

use super::Context;
use crate::display;
use crate::error::{CliError, Result};
use crate::util::{parse_resources, parse_vars};

pub async fn create(
    ctx: &Context,
    name: &str,
    image: &str,
    channel: Option<&str>,
    review_app: bool,
) -> Result<()> {
    validate_name(name)?;
    let store = ctx.store().await?;
    if store.exists(name).await? {
        return Err(CliError::input(format!("app '{}' already exists", name)));
    }

    let mut app = App::new(name, image);
    app.slack_channel = channel.unwrap_or_default().to_string();
    app.review_app = review_app;
    store.save(&app).await?;

    println!(
        "{} Created app {} ({})",
        style("✓").green().bold(),
        style(name).cyan(),
        image
    );
    Ok(())
}

pub async fn show(ctx: &Context, name: &str) -> Result<()> {
    let store = ctx.store().await?;
    let app = store.get(name).await?;
    display::print_app(&app);
    Ok(())
}

pub async fn exclude(ctx: &Context, name: &str, resources: &[String], remove: bool) -> Result<()> {
    let resources = parse_resources(resources)?;
    edit(ctx, name, |app| {
        for resource in resources {
            if remove {
                app.excluded_resources.retain(|r| r != &resource);
            } else {
                app.exclude(resource);
            }
        }
    })
    .await?;
    println!(
        "{} Updated exclusions for {}",
        style("✓").green().bold(),
        style(name).cyan()
    );
    Ok(())
}

pub async fn set_var(ctx: &Context, name: &str, pairs: &[String], unset: &[String]) -> Result<()> {
    let vars = parse_vars(pairs)?;
    edit(ctx, name, |app| {
        app.vars.extend(vars);
        for key in unset {
            app.vars.remove(key);
        }
    })
    .await?;
    println!(
        "{} Updated vars for {}",
        style("✓").green().bold(),
        style(name).cyan()
    );
    Ok(())
}

pub async fn set_paused(ctx: &Context, name: &str, paused: bool) -> Result<()> {
    edit(ctx, name, |app| app.paused = paused).await?;
    let verb = if paused { "Paused" } else { "Resumed" };
    println!("{} {} {}", style("✓").green().bold(), verb, style(name).cyan());
    Ok(())
}

/// Load, modify and save one app record
async fn edit(ctx: &Context, name: &str, change: impl FnOnce(&mut App)) -> Result<App> {
    let store = ctx.store().await?;
    let mut app = store.get(name).await?;
    change(&mut app);
    store.save(&app).await?;
    tracing::debug!(app = %name, "app record saved");
    Ok(app)
}

/// App names double as namespaces, so they follow DNS label rules
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(CliError::input_with_help(
            format!("'{}' is not a valid app name", name),
            "use lowercase letters, digits and '-', at most 63 characters",
        ))
    }
}
