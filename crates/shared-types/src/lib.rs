pub mod document;
pub mod error;
pub mod link;
pub mod placement;
pub mod types;

pub use document::DocumentRecord;
pub use error::{Result, SigningError};
pub use link::PublicLink;
pub use placement::{NewPlacement, PlacementStats, SignaturePlacement};
pub use types::{DocumentStatus, LinkStatus, ParseEnumError, SignatureStatus, SignatureType};
