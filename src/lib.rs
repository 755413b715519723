//! Tokenizer and loader for RADIUS-family protocol dictionary files.
//!
//! A "dictionary" in this sense is the line-oriented `ATTRIBUTE`/`VALUE`/
//! `VENDOR`/`TLV`/`STRUCT` source format used to describe a protocol's
//! attribute space, as carried by `freeradius`, `radiusd`, and their
//! descendants. [`Loader`] turns a directory tree of these files into a
//! queryable [`Dictionary`] catalog.
//!
//! ```no_run
//! use radius_dict::{Loader, LoaderConfig, ProtocolTable};
//!
//! let loader = Loader::new("/usr/share/radius-dict", LoaderConfig::default());
//! let mut protocols = ProtocolTable::new();
//! loader.load_internal(&mut protocols)?;
//! let radius = loader.load_protocol(&mut protocols, "radius")?;
//! let attr = radius.by_name("User-Name");
//! # Ok::<(), radius_dict::DictError>(())
//! ```

mod context;
mod engine;
mod fixup;
mod line;
mod number;

pub mod dict;
pub mod error;
pub mod flags;
pub mod loader;
pub mod types;

pub use dict::{AttrId, Attribute, Dictionary, EnumValue, Value, Vendor};
pub use error::{DictError, DictErrorKind};
pub use flags::FlagSet;
pub use loader::{Loader, LoaderConfig, ProtocolTable};
pub use types::AttributeType;
