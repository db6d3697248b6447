// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rewrites `__symbols__` paths from overlay-internal form into the
//! live-tree path they occupy after apply.
//!
//! A symbol value looks like `/fragment@0/__overlay__/foo/bar`. Before it is
//! installed into the live `/__symbols__` node, the `/fragment@0/__overlay__`
//! prefix must be replaced with the live path the fragment actually attached
//! to.

use alloc::string::String;

use crate::error::{OverlayError, OverlayErrorKind};
use crate::live::LiveTree;

use super::Fragment;

fn invalid(reason: &'static str) -> OverlayError {
    OverlayError::new(OverlayErrorKind::Invalid(reason), String::new())
}

/// Rewrites `original_path` against `fragments`, returning the live-tree
/// path it should become. Callers are expected to drop the symbol and log a
/// warning on error rather than fail the whole apply.
pub(crate) fn fixup_symbol_path(
    live: &LiveTree,
    fragments: &[Fragment],
    original_path: &str,
) -> Result<String, OverlayError> {
    let rest = original_path
        .strip_prefix('/')
        .ok_or_else(|| invalid("symbol path is not absolute"))?;
    let mut segments = rest.splitn(3, '/');
    let fragment_name = segments.next().filter(|s| !s.is_empty());
    let overlay_marker = segments.next();
    let tail = segments.next().unwrap_or("");

    let (fragment_name, overlay_marker) = match (fragment_name, overlay_marker) {
        (Some(name), Some(marker)) => (name, marker),
        _ => return Err(invalid("symbol path is missing fragment or overlay segment")),
    };
    if overlay_marker != "__overlay__" {
        return Err(invalid("symbol path does not reference an __overlay__ child"));
    }

    let fragment = fragments
        .iter()
        .find(|f| f.name == fragment_name)
        .ok_or_else(|| invalid("symbol path references an unknown fragment"))?;

    let mut rewritten = live.node_path(fragment.target);
    if !tail.is_empty() {
        if !rewritten.ends_with('/') {
            rewritten.push('/');
        }
        rewritten.push_str(tail);
    }
    Ok(rewritten)
}
