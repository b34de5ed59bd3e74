use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mosaicjson")]
#[command(author, version, about = "Build, store and query MosaicJSON spatial indexes", long_about = None)]
pub struct Cli {
    /// Enable verbose (debug-level) logging, overriding RUST_LOG.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a mosaic from a GeoJSON FeatureCollection of asset footprints
    /// and write it to a storage URI.
    CreateFromFeatures {
        /// Path to a GeoJSON FeatureCollection; each feature's
        /// `properties.assets` (or `properties.asset`) names the
        /// asset(s) it contributes.
        #[arg(long, value_name = "FILE")]
        features: PathBuf,

        /// Destination URI (file path, `s3://...`, `sqlite://...`, ...).
        #[arg(long, value_name = "URI")]
        output: String,

        #[arg(long, default_value_t = 0)]
        minzoom: u8,

        #[arg(long, default_value_t = 22)]
        maxzoom: u8,

        /// Zoom level `tiles` is keyed at, defaults to `minzoom`.
        #[arg(long)]
        quadkey_zoom: Option<u8>,

        #[arg(long, default_value = "WebMercatorQuad", env = "MOSAIC_TMS_ID")]
        tms_id: String,

        #[arg(long)]
        min_tile_cover: Option<f64>,

        #[arg(long, default_value_t = false)]
        tile_cover_sort: bool,

        /// Overwrite an existing document at `output`.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Merge new features into an existing mosaic, re-deriving bounds
    /// and bumping its version.
    Update {
        #[arg(long, value_name = "URI")]
        mosaic: String,

        #[arg(long, value_name = "FILE")]
        features: PathBuf,

        /// Give newly-added assets priority over existing ones at a
        /// cell (the default).
        #[arg(long, overrides_with = "add_last")]
        add_first: bool,

        /// Append newly-added assets after existing ones at a cell,
        /// instead of prioritizing them.
        #[arg(long, overrides_with = "add_first")]
        add_last: bool,
    },

    /// Print a mosaic's metadata: bounds, center, zoom range, cell
    /// count and its `mosaicid`.
    Info {
        #[arg(value_name = "URI")]
        mosaic: String,
    },

    /// Print a mosaic's indexed cells as a GeoJSON FeatureCollection.
    ToGeojson {
        #[arg(value_name = "URI")]
        mosaic: String,
    },

    /// Copy a mosaic document from one backend to another.
    Upload {
        #[arg(value_name = "SOURCE_URI")]
        source: String,

        #[arg(value_name = "DEST_URI")]
        destination: String,

        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Resolve the asset(s) covering an output tile.
    Tile {
        #[arg(value_name = "URI")]
        mosaic: String,
        x: u32,
        y: u32,
        z: u8,

        #[arg(long, default_value = "WebMercatorQuad")]
        tms_id: String,
    },

    /// Resolve the asset(s) covering a geographic point.
    Point {
        #[arg(value_name = "URI")]
        mosaic: String,
        lng: f64,
        lat: f64,
    },

    /// Resolve the asset(s) covering a geographic bounding box.
    Bbox {
        #[arg(value_name = "URI")]
        mosaic: String,
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },
}
