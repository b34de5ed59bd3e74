mod cli;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use cli::{Cli, Command};
use mosaic_core::builder::{self, AssetFeature, KeepAll, PathAccessor};
use mosaic_core::config::BuilderOptions;
use mosaic_core::error::{ErrorKind, MosaicError, Result};
use mosaic_core::{backends, logging, query};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    logging::init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &MosaicError) -> ExitCode {
    match err.kind() {
        ErrorKind::UserError => ExitCode::from(1),
        ErrorKind::Io => ExitCode::from(2),
        ErrorKind::NotFound => ExitCode::from(3),
        ErrorKind::AlreadyExists => ExitCode::from(4),
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::CreateFromFeatures {
            features,
            output,
            minzoom,
            maxzoom,
            quadkey_zoom,
            tms_id,
            min_tile_cover,
            tile_cover_sort,
            overwrite,
        } => {
            let features = load_features(&features)?;
            let options = BuilderOptions {
                minzoom,
                maxzoom,
                quadkey_zoom,
                tms_id,
                min_tile_cover,
                tile_cover_sort,
                quiet: false,
            };
            let doc = builder::from_features(&features, &options, &PathAccessor, &KeepAll)?;
            let backend = backends::open(&output).await?;
            backend.write(&doc, overwrite).await?;
            println!("wrote {} cells to {output}", doc.tiles.len());
            Ok(())
        }

        Command::Update {
            mosaic,
            features,
            add_last,
            ..
        } => {
            let features = load_features(&features)?;
            let backend = backends::open(&mosaic).await?;
            let mut doc = backend.read().await?;
            // `--add-first`/`--add-last` are mutually overriding; `add_last`
            // alone is the source of truth since add-first is the default.
            let add_first = !add_last;
            let changed = builder::update_with_features(&mut doc, &features, &PathAccessor, add_first)?;
            if changed {
                backend.write(&doc, true).await?;
                println!("updated {mosaic} to version {}", doc.version);
            } else {
                println!("no changes: {mosaic} already covers every supplied feature");
            }
            Ok(())
        }

        Command::Info { mosaic } => {
            let backend = backends::open(&mosaic).await?;
            let doc = backend.read().await?;
            println!("mosaicjson: {}", doc.mosaicjson);
            println!("version:    {}", doc.version);
            println!("zoom:       {}-{}", doc.minzoom, doc.maxzoom);
            println!("quadkey_zoom: {}", doc.quadkey_zoom());
            println!(
                "bounds:     [{}, {}, {}, {}]",
                doc.bounds[0], doc.bounds[1], doc.bounds[2], doc.bounds[3]
            );
            println!(
                "center:     [{}, {}, {}]",
                doc.center[0], doc.center[1], doc.center[2]
            );
            println!("cells:      {}", doc.tiles.len());
            println!("mosaicid:   {}", doc.mosaicid()?);
            Ok(())
        }

        Command::ToGeojson { mosaic } => {
            let backend = backends::open(&mosaic).await?;
            let doc = backend.read().await?;
            let collection = doc.to_geojson()?;
            println!("{}", serde_json::to_string_pretty(&collection)?);
            Ok(())
        }

        Command::Upload {
            source,
            destination,
            overwrite,
        } => {
            let source_backend = backends::open(&source).await?;
            let doc = source_backend.read().await?;
            let dest_backend = backends::open(&destination).await?;
            dest_backend.write(&doc, overwrite).await?;
            println!("copied {source} -> {destination}");
            Ok(())
        }

        Command::Tile { mosaic, x, y, z, tms_id } => {
            let backend = backends::open(&mosaic).await?;
            let doc = backend.read().await?;
            let assets = query::assets_for_tile(&doc, x, y, z, &tms_id)?;
            for asset in assets {
                println!("{asset}");
            }
            Ok(())
        }

        Command::Point { mosaic, lng, lat } => {
            let backend = backends::open(&mosaic).await?;
            let doc = backend.read().await?;
            let assets = query::assets_for_point(&doc, lng, lat)?;
            for asset in assets {
                println!("{asset}");
            }
            Ok(())
        }

        Command::Bbox {
            mosaic,
            xmin,
            ymin,
            xmax,
            ymax,
        } => {
            let backend = backends::open(&mosaic).await?;
            let doc = backend.read().await?;
            let assets = query::assets_for_bbox(&doc, xmin, ymin, xmax, ymax)?;
            for asset in assets {
                println!("{asset}");
            }
            Ok(())
        }
    }
}

/// Load a GeoJSON FeatureCollection where each feature's
/// `properties.assets` (array) or `properties.asset` (single string)
/// names the asset(s) it contributes.
fn load_features(path: &Path) -> Result<Vec<AssetFeature>> {
    let raw = std::fs::read_to_string(path)?;
    let geojson: geojson::GeoJson = raw
        .parse()
        .map_err(|e| MosaicError::Validation(format!("invalid GeoJSON in {path:?}: {e}")))?;
    let geojson::GeoJson::FeatureCollection(collection) = geojson else {
        return Err(MosaicError::Validation(format!(
            "{path:?} must contain a GeoJSON FeatureCollection"
        )));
    };

    let mut out = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let geometry = feature
            .geometry
            .clone()
            .ok_or_else(|| MosaicError::Validation("feature is missing a geometry".to_string()))?;
        let assets = feature
            .properties
            .as_ref()
            .and_then(|props| props.get("assets").or_else(|| props.get("asset")))
            .and_then(|value| match value {
                serde_json::Value::String(s) => Some(vec![s.clone()]),
                serde_json::Value::Array(items) => Some(
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .ok_or_else(|| {
                MosaicError::Validation(
                    "feature is missing a string or array `assets`/`asset` property".to_string(),
                )
            })?;
        out.push(AssetFeature {
            assets,
            geojson: geojson::GeoJson::Feature(geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }),
        });
    }
    Ok(out)
}
