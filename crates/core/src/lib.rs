pub mod attribute;
pub mod cache;
pub mod descriptor;
pub mod dn;
pub mod error;
pub mod filter;
pub mod operation;
pub mod password;
pub mod registry;
pub mod time;
pub mod value;

pub use attribute::{AttributeData, AttributeModification, EntryData, ModificationType, OBJECT_CLASS, USER_PASSWORD};
pub use descriptor::{AttributeEnum, AttributeFlags, CustomAttribute, EntityDescriptor, Entry};
pub use error::PersistenceError;
pub use filter::Filter;
pub use operation::*;
pub use registry::SchemaRegistry;
pub use time::TimeCodec;
pub use value::AttributeValue;
