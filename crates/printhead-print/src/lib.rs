// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printhead Print: the network print front ends.  The IPP server decodes
// binary IPP over HTTP and renders documents onto the head, the raw server
// passes socket bytes straight through, and the lifecycle manager starts and
// stops them alongside the management API.

pub mod advertise;
pub mod http;
pub mod ipp;
pub mod ipp_server;
pub mod lifecycle;
pub mod raw_server;
pub mod render;

pub use advertise::{MdnsAdvertiser, NoopAdvertiser, PrinterIdentity, ServiceAdvertiser};
pub use ipp::IppMessage;
pub use ipp_server::{IppServer, IppServerConfig, PrintPipeline};
pub use lifecycle::{BoxFuture, ManagedServer, ServerManager};
pub use raw_server::{RawServer, RawServerConfig};
pub use render::{renderer_from_config, PageRenderer};
