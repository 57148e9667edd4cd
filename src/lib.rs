//! CO2 frame acquisition engine.
//!
//! Pulls one month of daily Level-3 CO2 grids from the GES DISC OPeNDAP
//! archive behind Earthdata Login and hands them, in date order, to a frame
//! sink for rendering.

pub mod collections;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod select;
pub mod sink;
