// SPDX-License-Identifier: MPL-2.0

//! Format and codec metadata
//!
//! Camera-side pixel formats and sink-side container kinds.

pub mod codec;

pub use codec::{ContainerKind, PixelFormat};
