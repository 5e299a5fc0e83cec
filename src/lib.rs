mod api;
mod config;
mod coordinator;
mod diff;
mod engine;
mod error;
mod fuzzy;
mod logger;
mod normalize;
mod protocol;
mod session;
mod types;
mod web;

pub use api::{Module, ModuleCatalog};
pub use config::{
    Config, DEFAULT_API_SCAN_INTERVAL, DEFAULT_BASE_URL, DEFAULT_FUZZY_THRESHOLD,
    DEFAULT_SCAN_INTERVAL, Mode,
};
pub use coordinator::{Coordinator, DEFAULT_COOL_DOWN, DEFAULT_CYCLE_TIMEOUT, MAX_CONSECUTIVE_FAILURES};
pub use engine::{WemPortal, WemPortalBuilder};
pub use error::{Error, Result};
pub use fuzzy::{FuzzyMatcher, Levenshtein, Similarity};
pub use logger::MessageLogMode;
pub use normalize::{normalize_unit, parse_scraped_value};
pub use protocol::{EnumValue, ParameterDef};
pub use types::*;
pub use web::{FAILURE_THRESHOLD as SCRAPE_FAILURE_THRESHOLD, Outcome};
