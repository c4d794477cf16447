// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Etikett Bridge — routes named requests with argument maps to the
// engine and shapes results for a remote caller. Argument validation
// fails fast with stable error codes before any I/O is attempted.

pub mod request;
pub mod router;

pub use request::BridgeRequest;
pub use router::{Bridge, BridgeError};
