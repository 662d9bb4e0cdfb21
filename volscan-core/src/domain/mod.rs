//! Domain types for volscan

pub mod bar;
pub mod instrument;
pub mod series;

pub use bar::Bar;
pub use instrument::{days_before, DateRange, Instrument};
pub use series::{Series, SeriesError};

/// Symbol type alias
pub type Symbol = String;
