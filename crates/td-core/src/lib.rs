//! # td-core: The "Vocabulary" of TANDEM
//!
//! Everything a caller and an upstream platform need to agree on, and
//! nothing that touches the network.
//!
//! A [`UnifiedQuery`] speaks in canonical field names. Each platform's
//! [`CapabilityDescriptor`] maps those names to its native ones. The
//! [`translate`] step turns a query into a [`NativeRequest`]; the
//! [`Normalizer`] turns native result rows back into [`NormalizedRow`]s.
//!
//! Both directions consult the same descriptor, so the descriptor is the
//! single source of truth for naming and typing.

pub mod capability;
pub mod error;
pub mod native;
pub mod normalize;
pub mod platform;
pub mod query;
pub mod result;
pub mod translate;
pub mod value;

pub use capability::{
    CapabilityDescriptor, CapabilityRegistry, CapabilitySummary, Casing, FieldRole, FieldSpec,
    FilterSupport,
};
pub use error::{ErrorKind, PlatformFailure, QueryError};
pub use native::{ContinuationToken, NativeBody, NativeRequest, NativeRow, ResultPage};
pub use normalize::{NormalizedRow, Normalizer};
pub use platform::PlatformId;
pub use query::{DateRange, FilterConstraint, OrderBy, SortDirection, UnifiedQuery};
pub use result::{PlatformOutcome, PlatformReport, ResultStatus, UnifiedResult};
pub use translate::translate;
pub use value::{FieldType, Value};
