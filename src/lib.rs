pub mod archive;
pub mod config;
pub mod dissolve;
pub mod domain;
pub mod error;
pub mod gpkg;
pub mod output;
pub mod pallet;
pub mod pipeline;
pub mod schema;
pub mod wkb;
pub mod workspace;
