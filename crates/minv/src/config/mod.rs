pub mod duration;
pub mod loader;
pub mod schema;

pub use duration::{format_duration, parse_duration};
pub use loader::{
    check_collection_configuration, load_collection_config, load_settings,
    load_settings_from_str, save_collection_config,
};
pub use schema::{CollectionConfig, DaemonConfig, Settings, TASK_MODULES};
