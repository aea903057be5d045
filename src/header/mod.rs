//! FITS-style header assembly.
//!
//! - [`definition`]: loading of the declarative header-definition tables
//! - [`builder`]: merging a table with a status snapshot into an assembled header
//! - [`card`]: the assembled header and its 80-column card encoding

pub mod builder;
pub mod card;
pub mod definition;

pub use builder::{
    build, dec_to_degrees, ra_to_degrees, BuildOptions, ExposureTiming, HeaderSource,
    MissingKeyPolicy, RequestContext,
};
pub use card::{AssembledHeader, HeaderCard};
pub use definition::{HeaderDefinitionEntry, HeaderDefinitionTable};
