//! Forms, form schemas and the ownership rules guarding them.

pub mod ownership;
pub mod service;
pub mod types;

pub use ownership::{Mutated, Mutation, OwnedResource, OwnerResolver, OwnershipError, mutate};
pub use service::{ResourceApi, ResourceError, ResourceService};
pub use types::{Form, FormTitle, NewSchema, Schema, SchemaPatch};
