//! Result type definition for opkit core operations.

use crate::error::Error;

/// The standard Result type for opkit core operations.
///
/// Use the `?` operator, `match`, or combinator methods to handle results.
///
/// # Examples
///
/// ```ignore
/// fn load() -> Result<OperatorConfig> {
///     let config = OperatorConfig::from_path("opkit.toml")?;
///     Ok(config)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;
