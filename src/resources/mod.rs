//! This module contains the tiered resource graph that keeps track of dependencies between assets
//! and provides deduplication, streaming ("async loading") and GPU memory management.
//!
//! Every asset occupies one of three ordered [`tier::Tier`]s: `Drive` (it exists on backing
//! storage), `Ram` (decoded data lives in memory) and `Gpu` (it has been uploaded). A
//! [`resource::Resource`] moves along this ladder one step at a time and only when somebody asks
//! for it: requests are counted per tier, so a resource requested at `Ram` by one caller and at
//! `Gpu` by another stays in memory when the `Gpu` request goes away.
//!
//! Deduplication comes from the [`registry::ResourceRegistry`]: whoever looks up a key first
//! creates the resource, everybody after that gets a clone of the same [`std::sync::Arc`].
//! Creating a resource is cheap, the expensive work only happens in the kind's load hooks.
//!
//! Dependencies are declared per tier: a mesh can't be on the GPU before its materials are, and a
//! material can't build its device block before the texture bytes are in memory. Declarations are
//! [`std::sync::Weak`], the dependency is only held strongly while the owning tier is. When a step
//! fails half way through acquiring its dependencies, the ones acquired so far are released again.
//!
//! Streaming is the job of the [`manager::ResourceManager`]: `load`/`unload` calls end up on the
//! background [`loading_thread::LoadingThread`], except for transitions that have to happen on the
//! thread owning the device, which wait in a second queue until that thread drains it.
//!
//! Note: every tier walk runs under the resource's lock and requires its dependencies while holding
//! it, so the dependency graph is also a lock order. It has to stay acyclic, otherwise two
//! resources promoting each other will deadlock. This is not detected.
pub mod error;
pub mod kind;
pub mod loading_thread;
pub mod manager;
pub mod registry;
pub mod resource;
pub mod tier;
