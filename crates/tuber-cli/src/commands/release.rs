//! Release command - run one supervised release of an app

use std::path::Path;
use std::sync::Arc;

use console::style;
use tuber_kube::{AppStore, DirectoryResolver, ReleaseOutcome, Releaser};

use super::Context;
use crate::display;
use crate::error::Result;

pub async fn run(
    ctx: &Context,
    app_name: &str,
    digest: &str,
    manifests: &Path,
    tags: &[String],
) -> Result<()> {
    let store = ctx.store().await?;
    let app = store.get(app_name).await?;
    let cluster = ctx.cluster().await?;
    let resolver = DirectoryResolver::new(manifests).with_tags(tags.to_vec());

    println!(
        "{} Releasing {} at {}",
        style("→").blue().bold(),
        style(app_name).cyan(),
        style(digest).yellow()
    );

    let releaser = Releaser::from_config(&ctx.config, cluster, store, Arc::new(resolver));
    match releaser.release(&app, digest, &ctx.config.cluster).await? {
        ReleaseOutcome::Released(summary) => display::print_summary(app_name, &summary),
        ReleaseOutcome::Paused => println!(
            "{} {} is paused, release skipped",
            style("⏸").yellow().bold(),
            style(app_name).cyan()
        ),
    }
    Ok(())
}
