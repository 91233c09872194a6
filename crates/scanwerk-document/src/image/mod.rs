// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image module — in-process pixel operations on page images.

pub mod processor;

pub use processor::{ChannelStats, ImageProcessor, SplitDirection, clamp_region};
