// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for the `dt_overlay_engine` crate.
//!
//! Parsing a flat devicetree blob and applying an overlay to a live tree are
//! different failure domains with different context to report, so they get
//! different error types: [`FdtError`] for the former, [`OverlayError`] for
//! the latter. Both follow the same shape (an opaque struct wrapping a
//! `#[non_exhaustive]` kind enum) so callers match on `.kind` rather than the
//! struct itself.

use alloc::string::String;
use core::fmt;

/// An error that can occur when parsing a device tree.
#[derive(Debug)]
#[non_exhaustive]
pub struct FdtError {
    offset: usize,
    /// The kind of parse failure.
    pub kind: FdtErrorKind,
}

impl FdtError {
    pub(crate) fn new(kind: FdtErrorKind, offset: usize) -> Self {
        Self { offset, kind }
    }

    /// Returns the byte offset into the FDT blob at which the error was
    /// detected.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// The kind of an error that can occur when parsing a device tree.
#[derive(Debug)]
#[non_exhaustive]
pub enum FdtErrorKind {
    /// The magic number of the device tree is invalid.
    InvalidMagic,
    /// The Device Tree version is not supported by this library.
    UnsupportedVersion(u32),
    /// The length of the device tree is invalid.
    InvalidLength,
    /// An invalid token was encountered.
    BadToken(u32),
    /// A header offset or size failed an integrity check.
    InvalidHeader(&'static str),
    /// An offset referred to a location outside of the blob.
    InvalidOffset,
    /// An invalid string was encountered.
    InvalidString,
}

impl fmt::Display for FdtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.kind, self.offset)
    }
}

impl fmt::Display for FdtErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdtErrorKind::InvalidMagic => write!(f, "invalid FDT magic number"),
            FdtErrorKind::UnsupportedVersion(version) => {
                write!(f, "the FDT version {version} is not supported")
            }
            FdtErrorKind::InvalidLength => write!(f, "invalid FDT length"),
            FdtErrorKind::BadToken(token) => write!(f, "bad FDT token: 0x{token:x}"),
            FdtErrorKind::InvalidHeader(reason) => write!(f, "invalid FDT header: {reason}"),
            FdtErrorKind::InvalidOffset => write!(f, "offset out of bounds"),
            FdtErrorKind::InvalidString => write!(f, "invalid string in FDT"),
        }
    }
}

impl core::error::Error for FdtError {}

/// An error that can occur while applying or removing a devicetree overlay.
#[derive(Debug)]
#[non_exhaustive]
pub struct OverlayError {
    /// The full path of the node the error concerns, when known.
    context: String,
    /// The kind of overlay failure.
    pub kind: OverlayErrorKind,
}

impl OverlayError {
    pub(crate) fn new(kind: OverlayErrorKind, context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            kind,
        }
    }

    /// Builds the error a [`NotifierCallback`](crate::overlay::NotifierCallback)
    /// returns from a `PreApply`/`PreRemove` notification to veto the
    /// operation in progress. Any other error kind is only ever produced
    /// internally.
    #[must_use]
    pub fn vetoed(context: impl Into<String>) -> Self {
        Self::new(OverlayErrorKind::Vetoed, context)
    }

    /// Returns the path or fragment name the error was raised against.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }
}

/// The kind of an error that can occur while applying or removing an
/// overlay. Mirrors the four boundary error classes: malformed/semantically
/// invalid input, allocation failure, policy refusal, and unknown id.
#[derive(Debug)]
#[non_exhaustive]
pub enum OverlayErrorKind {
    /// Malformed overlay input or a violated build-time invariant (missing
    /// target, phandle collision, forbidden `#address-cells`/`#size-cells`
    /// change, symbols update, duplicate edit, zero fragments, ...).
    Invalid(&'static str),
    /// An allocation could not be satisfied. Reachable only through
    /// fallible-allocation paths; dead in practice on platforms where the
    /// global allocator aborts instead.
    NoMemory,
    /// The corruption latch is set, or the changeset is not topmost.
    Busy(&'static str),
    /// The changeset id is not present in the registry.
    NoSuchChangeset,
    /// A PRE_APPLY or PRE_REMOVE notifier vetoed the operation.
    Vetoed,
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} ({})", self.kind, self.context)
        }
    }
}

impl fmt::Display for OverlayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayErrorKind::Invalid(reason) => write!(f, "invalid overlay: {reason}"),
            OverlayErrorKind::NoMemory => write!(f, "allocation failure while applying overlay"),
            OverlayErrorKind::Busy(reason) => write!(f, "busy: {reason}"),
            OverlayErrorKind::NoSuchChangeset => write!(f, "no such overlay changeset"),
            OverlayErrorKind::Vetoed => write!(f, "rejected by a registered notifier"),
        }
    }
}

impl core::error::Error for OverlayError {}

impl From<FdtError> for OverlayError {
    fn from(err: FdtError) -> Self {
        OverlayError::new(OverlayErrorKind::Invalid("malformed overlay blob"), {
            let mut s = String::new();
            let _ = core::fmt::write(&mut s, format_args!("{err}"));
            s
        })
    }
}
