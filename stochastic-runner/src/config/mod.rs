// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stochastic test configuration.
//!
//! A configuration is a closed set of [`Policy`] thresholds and [`Plan`]s that
//! assign policies to tests by pattern. Plans may fall back to a parent plan
//! through a [`PlanFallback`] edge, and every chain ends at the root plan
//! [`PlanId::DEFAULT`].
//!
//! Configuration is parsed and validated once, into a [`StochasticConfig`].
//! Tests are then mapped to policies through a [`PolicyResolver`] for the
//! active plan.

mod imp;
mod plan;
mod policy;
mod resolver;

pub use imp::*;
pub use plan::*;
pub use policy::*;
pub use resolver::*;
