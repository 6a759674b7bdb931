//! External clients for managed resources.
//!
//! A [`Connector`] turns a managed resource into an [`ExternalClient`]: it
//! resolves provider credentials, connects a bridge for the resource type,
//! resolves secret-backed parameters and, when the engine has no cached
//! provider state for the resource, reconstructs one from the resource
//! itself. The client then runs Observe/Create/Update/Delete; the
//! [`AsyncExternalClient`] variant runs the mutations in the background.

#![forbid(unsafe_code)]

mod async_client;
mod client;
mod config;
mod connector;
mod reconstruct;

pub use async_client::{AsyncExternalClient, CallbackProvider, ChannelCallback, CompletionEvent, NoopCallback};
pub use client::{Applied, ExternalClient, Observation};
pub use config::{
    ConfigInjector, ConnectionDetailsFn, ExternalNamer, IdentifierFromProvider, MessageNotFound, NameAsIdentifier, NeverNotFound,
    NotFoundPredicate, ResourceConfig, TemplatedIdentifier, ID_ATTRIBUTE,
};
pub use connector::{Connector, ProviderSetupResolver, SecretCredentialsSetup, StaticSetup};
pub use reconstruct::{private_from_annotations, store_private, StateReconstructor};
