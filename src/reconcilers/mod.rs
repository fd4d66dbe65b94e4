// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for `Glue` and `GlueOperator` resources.
//!
//! # Reconciliation Architecture
//!
//! Both controllers follow the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - dynamic watches on managed, related and parent kinds route
//!    events back to the owning instance
//! 2. **Reconcile** - render the desired objects and converge the cluster to them
//! 3. **Status** - report `observedGeneration` or the last error back to the resource
//!
//! Deletion is gated by finalizers, so cleanup always runs before an instance
//! disappears.
//!
//! # Available Reconcilers
//!
//! - [`reconcile_glue`] - Materializes the child resource graph of a `Glue`
//! - [`delete_glue`] - Tears the graph down in reverse dependency order
//! - [`reconcile_glue_operator`] - Keeps one `Glue` per parent object
//! - [`delete_glue_operator`] - Stops watching the parent kind
//!
//! # Example: Using a Reconciler
//!
//! ```rust,no_run
//! use glue_operator::context::Context;
//! use glue_operator::crd::Glue;
//! use glue_operator::reconcilers::reconcile_glue;
//!
//! async fn reconcile(ctx: &Context, glue: &Glue) -> anyhow::Result<()> {
//!     reconcile_glue(ctx, glue).await?;
//!     Ok(())
//! }
//! ```

pub mod finalizers;
pub mod glue;
pub mod glue_operator;
pub mod status;

pub use glue::{delete_glue, reconcile_glue};
pub use glue_operator::{delete_glue_operator, operators_for_glue, reconcile_glue_operator};
