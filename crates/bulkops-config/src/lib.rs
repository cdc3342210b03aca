//! Bulkops Config
//!
//! Serializable configuration types shared by the engine, the scripts and the
//! command line:
//!
//! - [`Settings`]: where requests go (base URL, proxy) and how runs behave
//!   (concurrency, chunk size, timeout, retry attempts). Persisted as JSON in
//!   the data directory by [`SettingsStore`].
//! - [`FieldSpec`]: the configuration surface a script exposes to whatever
//!   renders its form.
//! - [`ScriptValues`]: the values collected for those fields, with loose
//!   accessors for numbers, flags and id lists.

mod error;
mod field;
mod settings;
mod values;

pub use error::ConfigError;
pub use field::{FieldKind, FieldOption, FieldSpec};
pub use settings::{Settings, SettingsStore};
pub use values::{ScriptValues, parse_id_list};
