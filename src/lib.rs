//! # Tether
//!
//! A reactive-programming runtime built around structured teardown of
//! nested resource lifetimes.
//!
//! The central contract: every value a [`Realm`] publishes to an observer is
//! *owned* by that observation. The [`Resource`] the observer returns in
//! response is the receipt for that ownership — releasing the top-level
//! `Resource` a call to [`Realm::instantiate`] returned must release every
//! child `Resource` any observer call along the way returned, and must do so
//! exactly once no matter how many times `release` is called or from how
//! many clones.
//!
//! Three families build on that contract:
//!
//! - [`BasicRealm`] and the combinators in [`RealmExt`] (`map`, `filter`,
//!   `merge`, `flat_map`) compose realms without ever reaching for buffering
//!   or batching.
//! - [`CellRealm`], [`portal`] and [`Store`] are the containers: a single
//!   mutable value, an externally-fed multi-value source, and the
//!   memoizing/fan-out layer that lets many observers share one upstream
//!   observation.
//! - [`blueprint::to_realm`] compiles a straight-line function that calls
//!   [`BlueprintCtx::use_in`] into a lazy `Realm`, using replay rather than
//!   native `async`/`await` to give suspension the resumption semantics this
//!   crate's ownership model needs. See the [`blueprint`] module docs for why.
//!
//! [`wrappers`] collects the convenience constructors (`use_effect`,
//! `use_cell`, `use_timeout`, ...) that most callers reach for instead of
//! the primitives directly.

mod basic_realm;
mod blueprint;
mod cell;
mod context;
mod effect_realm;
mod error;
mod portal;
mod realm;
mod resource;
mod store;
mod wrappers;

pub use basic_realm::BasicRealm;
pub use blueprint::{to_realm, BlueprintCtx, BlueprintError, Suspended};
pub use cell::{CellRealm, Structural};
pub use context::{ContextKey};
pub use effect_realm::{AbortSignal, AddResource, EffectOutcome, EffectRealm, FailurePolicy};
pub use error::{ReactiveError, ReleaseError};
pub use portal::portal;
pub use realm::{lazy, never, pure, Lazy, Never, Observer, Pure, Realm, RealmExt};
pub use resource::Resource;
pub use store::Store;
pub use wrappers::{
    to_store, use_cell, use_effect, use_guard, use_iterable, use_never, use_portal, use_store,
    use_timeout,
};
