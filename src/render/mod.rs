pub mod assets;
pub mod export;
pub mod fonts;
pub mod layout;
pub mod raster;
