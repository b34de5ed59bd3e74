//! mosaic-core: build, store and query MosaicJSON spatial indexes over
//! pluggable storage backends.

pub mod backends;
pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod query;
pub mod tms;

pub use builder::{
    from_features, from_urls, update_with_features, Accessor, AssetFeature, AssetFilter, KeepAll,
    PathAccessor,
};
pub use error::{MosaicError, Result};
pub use model::{validate, MosaicJson};
pub use query::{
    assets_for_bbox, assets_for_geometry, assets_for_point, assets_for_tile, PixelSelection,
    RasterReader,
};
