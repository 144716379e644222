//! Render command - interpolate and classify manifests locally

use std::path::Path;

use tuber_core::App;
use tuber_engine::Engine;
use tuber_kube::{DirectoryResolver, ManifestResolver, RenderedResource, Renderer};

use super::Context;
use crate::display;
use crate::error::{CliError, Result};
use crate::util::{parse_resources, parse_vars};

pub async fn run(
    ctx: &Context,
    app_name: &str,
    digest: &str,
    manifests: &Path,
    exclude: &[String],
    vars: &[String],
    json: bool,
) -> Result<()> {
    let mut app = App::new(app_name, "");
    app.vars = parse_vars(vars)?;
    for resource in parse_resources(exclude)? {
        app.exclude(resource);
    }

    let yamls = DirectoryResolver::new(manifests)
        .resolve(app_name, digest)
        .await
        .map_err(|e| CliError::Render {
            message: e.to_string(),
        })?;

    let engine = Engine::default();
    let vars = app.interpolation_vars(digest, &ctx.config.cluster);
    let collection = Renderer::new(&engine, &vars).render(&yamls, &app.excluded_resources)?;

    if json {
        let refs = |group: &[RenderedResource]| -> Vec<_> {
            group.iter().map(RenderedResource::resource_ref).collect()
        };
        let out = serde_json::json!({
            "app": app_name,
            "digest": digest,
            "prerelease": refs(&collection.prerelease),
            "configs": refs(&collection.configs),
            "workloads": refs(&collection.workloads),
            "postrelease": refs(&collection.postrelease),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).map_err(|e| CliError::Other {
                message: e.to_string()
            })?
        );
    } else {
        print!("{}", display::collection_yaml(&collection));
    }
    Ok(())
}
