// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printhead API: the authenticated management surface.  Status, test print,
// feed, cut, device information, and runtime settings over JSON.

pub mod auth;
pub mod error;
pub mod routes;
pub mod server;

pub use auth::{AdminAccount, TokenStore};
pub use error::{ApiError, ApiResponse};
pub use routes::{router, ApiState, DeviceInfo};
pub use server::{ApiServer, ApiServerConfig};
