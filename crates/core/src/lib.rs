pub mod config;
pub mod config_loader;
pub mod pl;
pub mod result;

pub use config::{AppConfig, DatabaseConfig, LedgerConfig};
pub use config_loader::ConfigLoader;
pub use pl::{
    display_pl, place_pl, settle, win_pl, PlConfig, PlError, SettledPl, SystemProfile, MAX_PRICE,
};
pub use result::RaceResult;
