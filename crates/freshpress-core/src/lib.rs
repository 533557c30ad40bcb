//! # freshpress-core
//!
//! The REST request pipeline for FreshPress - THE PIPELINE.
//!
//! A call enters as a [`Request`], is matched against the route table of
//! the [`RestServer`], has its arguments defaulted, validated and sanitized
//! against the endpoint's schema, passes the controller's permission check
//! and is answered by the controller as a [`Response`].
//!
//! ## Architectural Constraints
//!
//! - Synchronous: one request is fully processed before the next
//! - No async, no network dependencies (pure Rust)
//! - Registries are built once and read-only while serving
//! - Storage, authorization, rendering and oEmbed fetching are collaborators
//!   behind traits; [`MemoryStore`] is the reference store

// =============================================================================
// MODULES
// =============================================================================

pub mod auth;
pub mod compat;
pub mod controller;
pub mod dates;
pub mod formats;
pub mod model;
pub mod registry;
pub mod request;
pub mod response;
pub mod schema;
pub mod server;
pub mod store;
pub mod text;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{Context, FreshPressError, Method, Methods, RestError, RestResult, StoreError};

// =============================================================================
// RE-EXPORTS: Pipeline
// =============================================================================

pub use auth::{Anonymous, Authorizer, Cap, RoleAuthorizer};
pub use controller::comments::CommentsController;
pub use controller::meta::MetaFields;
pub use controller::oembed::{
    MemoryTransientCache, NoProvider, OEMBED_NAMESPACE, OEmbedController, OEmbedProvider,
    TransientCache,
};
pub use controller::post_types::PostTypesController;
pub use controller::posts::PostsController;
pub use controller::revisions::RevisionsController;
pub use controller::taxonomies::TaxonomiesController;
pub use controller::{Controller, Endpoint, Env, ItemLifecycle, NAMESPACE, Operation, Route};
pub use registry::{Registry, SiteOptions};
pub use request::Request;
pub use response::{Link, Response};
pub use schema::{Property, Schema, SchemaBuilder};
pub use server::RestServer;

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use formats::{SnapshotHeader, store_from_bytes, store_to_bytes};
pub use model::{Comment, Post, Role, Term, User};
pub use store::{MemoryStore, Store};
