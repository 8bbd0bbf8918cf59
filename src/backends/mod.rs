// SPDX-License-Identifier: MPL-2.0

//! Hardware backends
//!
//! - [`capture`]: V4L2 streaming capture with a copy-then-requeue buffer ring

pub mod capture;
